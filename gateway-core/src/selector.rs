//! Account selector and load balancer.
//!
//! Pure decision logic over a snapshot of accounts; does not itself talk to
//! the store. The forwarder reads a snapshot, calls [`select_account`], then
//! asks the store to persist post-dispatch bookkeeping.

use gateway_types::{Account, BalanceStrategy};

/// Picks one eligible account (active, under its daily limit) from
/// `accounts`, which must already be filtered to one provider. Returns
/// `None` when no account is eligible.
pub fn select_account(accounts: &[Account], strategy: BalanceStrategy, failed_recently: &dyn Fn(&str) -> bool) -> Option<Account> {
    let mut eligible: Vec<&Account> = accounts.iter().filter(|a| a.is_eligible()).collect();
    if eligible.is_empty() {
        return None;
    }
    eligible.sort_by(|a, b| a.id.cmp(&b.id));

    let chosen = match strategy {
        BalanceStrategy::RoundRobin => select_round_robin(&eligible),
        BalanceStrategy::FillFirst => select_fill_first(&eligible),
        BalanceStrategy::Failover => select_failover(&eligible, failed_recently),
    };
    chosen.cloned()
}

/// Among eligible accounts sorted by id, pick the one whose `last_used` is
/// immediately after the account with the newest `last_used` (wrap-around).
/// Accounts never used (`last_used_ms = None`) sort as "oldest", so the very
/// first dispatch picks the smallest id.
fn select_round_robin<'a>(eligible: &[&'a Account]) -> Option<&'a Account> {
    if eligible.is_empty() {
        return None;
    }
    let newest = eligible
        .iter()
        .max_by_key(|a| (a.last_used_ms.unwrap_or(i64::MIN), a.id.clone()))
        .copied()?;
    let pos = eligible.iter().position(|a| a.id == newest.id).unwrap_or(0);
    Some(eligible[(pos + 1) % eligible.len()])
}

/// Smallest `today_used`, tie-break by smallest id (already sorted by id).
fn select_fill_first<'a>(eligible: &[&'a Account]) -> Option<&'a Account> {
    eligible.iter().min_by_key(|a| a.today_used).copied()
}

/// Stable order by creation time; advance past an account only if it is
/// ineligible (already filtered out above) or failed terminally in the last
/// 60s, per `failed_recently`.
fn select_failover<'a>(eligible: &[&'a Account], failed_recently: &dyn Fn(&str) -> bool) -> Option<&'a Account> {
    let mut by_creation: Vec<&&Account> = eligible.iter().collect();
    by_creation.sort_by_key(|a| (a.created_at_ms, a.id.clone()));
    by_creation
        .into_iter()
        .find(|a| !failed_recently(&a.id))
        .copied()
        .or_else(|| eligible.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::AccountStatus;

    fn account(id: &str, last_used_ms: Option<i64>, today_used: u64, created_at_ms: i64) -> Account {
        Account {
            id: id.to_string(),
            provider_id: "deepseek".to_string(),
            display_name: id.to_string(),
            credentials: Default::default(),
            status: AccountStatus::Active,
            last_used_ms,
            request_count: 0,
            daily_limit: None,
            today_used,
            delete_session_after_chat: false,
            created_at_ms,
        }
    }

    fn no_recent_failures(_id: &str) -> bool {
        false
    }

    #[test]
    fn round_robin_cycles_a_b_c_in_order() {
        let mut accounts = vec![account("A", None, 0, 1), account("B", None, 0, 2), account("C", None, 0, 3)];
        let mut order = Vec::new();
        for i in 0..6 {
            let chosen = select_account(&accounts, BalanceStrategy::RoundRobin, &no_recent_failures).unwrap();
            order.push(chosen.id.clone());
            for a in accounts.iter_mut() {
                if a.id == chosen.id {
                    a.last_used_ms = Some(1000 + i);
                }
            }
        }
        assert_eq!(order, vec!["A", "B", "C", "A", "B", "C"]);
    }

    #[test]
    fn fill_first_exhausts_one_account_before_touching_another() {
        let accounts = vec![account("A", None, 5, 1), account("B", None, 0, 2)];
        let chosen = select_account(&accounts, BalanceStrategy::FillFirst, &no_recent_failures).unwrap();
        assert_eq!(chosen.id, "B");
    }

    #[test]
    fn ineligible_accounts_are_never_selected() {
        let mut accounts = vec![account("A", None, 0, 1)];
        accounts[0].status = AccountStatus::Inactive;
        assert!(select_account(&accounts, BalanceStrategy::RoundRobin, &no_recent_failures).is_none());
    }

    #[test]
    fn daily_limit_exhaustion_makes_an_account_ineligible() {
        let mut a = account("A", None, 10, 1);
        a.daily_limit = Some(10);
        assert!(select_account(&[a], BalanceStrategy::FillFirst, &no_recent_failures).is_none());
    }

    #[test]
    fn failover_skips_an_account_that_failed_recently() {
        let accounts = vec![account("A", None, 0, 1), account("B", None, 0, 2)];
        let failed = |id: &str| id == "A";
        let chosen = select_account(&accounts, BalanceStrategy::Failover, &failed).unwrap();
        assert_eq!(chosen.id, "B");
    }
}
