use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one run, shared by all crawl tasks
#[derive(Debug, Default)]
pub struct RunCounters {
    links_checked: AtomicU64,
    pages_fetched: AtomicU64,
    leads_found: AtomicU64,
    leads_accepted: AtomicU64,
    leads_rejected: AtomicU64,
    queries_issued: AtomicU64,
    blocked: AtomicU64,
    deferred: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`RunCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub links_checked: u64,
    pub pages_fetched: u64,
    pub leads_found: u64,
    pub leads_accepted: u64,
    pub leads_rejected: u64,
    pub queries_issued: u64,
    /// 403/429 responses and robots.txt disallows
    pub blocked: u64,
    /// Requests skipped because the host was penalized
    pub deferred: u64,
    pub timeouts: u64,
    pub errors: u64,
}

impl CounterSnapshot {
    /// Fraction of checked links that were blocked
    pub fn block_rate(&self) -> f64 {
        ratio(self.blocked, self.links_checked)
    }

    pub fn timeout_rate(&self) -> f64 {
        ratio(self.timeouts, self.links_checked)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_checked(&self) {
        self.links_checked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn page_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lead_found(&self) {
        self.leads_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lead_accepted(&self) {
        self.leads_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lead_rejected(&self) {
        self.leads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_issued(&self) {
        self.queries_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            links_checked: self.links_checked.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            leads_found: self.leads_found.load(Ordering::Relaxed),
            leads_accepted: self.leads_accepted.load(Ordering::Relaxed),
            leads_rejected: self.leads_rejected.load(Ordering::Relaxed),
            queries_issued: self.queries_issued.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
