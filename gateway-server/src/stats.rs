//! In-memory request counters backing `GET /health` and `GET /stats`.
//! Reset on process restart; durable history lives in the store's `logs`
//! collection instead.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
pub struct Stats {
    started_at: OnceCell<Instant>,
    total_requests: AtomicU64,
    success_requests: AtomicU64,
    failed_requests: AtomicU64,
    active_connections: AtomicI64,
    per_model: DashMap<String, u64>,
    per_provider: DashMap<String, u64>,
    per_account: DashMap<String, u64>,
}

/// Owns an `Arc<Stats>` rather than borrowing, so it can be moved into a
/// `'static` SSE body stream and still record the terminal outcome when
/// that stream finishes or is dropped by a client disconnect.
pub struct RequestGuard {
    stats: Arc<Stats>,
    finished: bool,
}

impl RequestGuard {
    pub fn success(mut self) {
        self.stats.success_requests.fetch_add(1, Ordering::Relaxed);
        self.finished = true;
    }

    pub fn failure(mut self) {
        self.stats.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.finished = true;
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        if !self.finished {
            // Client disconnected mid-flight, or a panic unwound past us:
            // count it as failed rather than silently dropping the tally.
            self.stats.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        let stats = Self::default();
        stats.started_at.set(Instant::now()).ok();
        stats
    }

    /// Called at the start of every `/v1/chat/completions` dispatch. The
    /// returned guard decrements `active_connections` and records a
    /// terminal outcome however the request ends (success, failure, or a
    /// client disconnect that drops the guard without calling either).
    pub fn begin_request(self: &Arc<Self>, model: &str, provider_id: &str, account_id: &str) -> RequestGuard {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        *self.per_model.entry(model.to_string()).or_insert(0) += 1;
        *self.per_provider.entry(provider_id.to_string()).or_insert(0) += 1;
        *self.per_account.entry(account_id.to_string()).or_insert(0) += 1;
        RequestGuard {
            stats: self.clone(),
            finished: false,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.get_or_init(Instant::now).elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            success_requests: self.success_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed).max(0) as u64,
            per_model: self.per_model.iter().map(|e| (e.key().clone(), *e.value())).collect(),
            per_provider: self.per_provider.iter().map(|e| (e.key().clone(), *e.value())).collect(),
            per_account: self.per_account.iter().map(|e| (e.key().clone(), *e.value())).collect(),
        }
    }
}

pub struct StatsSnapshot {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub active_connections: u64,
    pub per_model: std::collections::HashMap<String, u64>,
    pub per_provider: std::collections::HashMap<String, u64>,
    pub per_account: std::collections::HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_failure_increment_distinct_counters() {
        let stats = Arc::new(Stats::default());
        stats.begin_request("m", "p", "a").success();
        stats.begin_request("m", "p", "a").failure();
        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.success_requests, 1);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.active_connections, 0);
    }

    #[test]
    fn dropped_guard_without_outcome_counts_as_failure() {
        let stats = Arc::new(Stats::default());
        {
            let _guard = stats.begin_request("m", "p", "a");
        }
        let snap = stats.snapshot();
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.active_connections, 0);
    }
}
