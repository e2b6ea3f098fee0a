//! Background upkeep tasks that don't belong to any single request:
//! the daily `today_used` reset and log retention pruning against
//! `AppConfig::log_retention_days`.

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;

use gateway_store::Store;

/// Sleeps until the next local midnight, zeroes every account's
/// `today_used`, then repeats. Runs for the lifetime of the process.
pub fn spawn_daily_reset(store: Arc<Store>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(duration_until_next_local_midnight()).await;
            match store.reset_daily_usage().await {
                Ok(()) => tracing::info!("daily account usage counters reset at local midnight"),
                Err(e) => tracing::warn!("daily usage reset failed: {e}"),
            }
        }
    })
}

/// Once a day, deletes log rows older than `AppConfig::log_retention_days`.
pub fn spawn_log_retention(store: Arc<Store>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(86_400));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let retention_days = match store.get_config().await {
                Ok(c) => c.log_retention_days,
                Err(e) => {
                    tracing::warn!("log retention: failed to load config: {e}");
                    continue;
                }
            };
            let cutoff_ms = gateway_types::now_ms() - retention_days as i64 * 86_400_000;
            match store.prune_logs_older_than(cutoff_ms).await {
                Ok(n) if n > 0 => tracing::info!(pruned = n, retention_days, "pruned expired log entries"),
                Ok(_) => {}
                Err(e) => tracing::warn!("log retention prune failed: {e}"),
            }
        }
    })
}

fn duration_until_next_local_midnight() -> Duration {
    let now = Local::now();
    let next_midnight = (now + chrono::Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");
    let next_midnight_local = next_midnight
        .and_local_timezone(Local)
        .single()
        .unwrap_or_else(|| now + chrono::Duration::hours(24));
    let secs = (next_midnight_local - now).num_seconds().max(1);
    Duration::from_secs(secs as u64).min(Duration::from_secs(86_400))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midnight_duration_is_between_zero_and_24h() {
        let d = duration_until_next_local_midnight();
        assert!(d <= Duration::from_secs(86_400));
    }
}
