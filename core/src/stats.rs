// Dispatcher statistics
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of dispatcher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub polls: u64,
    pub batches: u64,
    pub empty_batches: u64,
    pub events: u64,
    pub slices_published: u64,
    pub deliveries: u64,
    pub callback_panics: u64,
    pub sessions_created: u64,
    pub session_renewals: u64,
    pub superseded_responses: u64,
    pub keep_alive_prompts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub polls: AtomicU64,
    pub batches: AtomicU64,
    pub empty_batches: AtomicU64,
    pub events: AtomicU64,
    pub slices_published: AtomicU64,
    pub deliveries: AtomicU64,
    pub callback_panics: AtomicU64,
    pub sessions_created: AtomicU64,
    pub session_renewals: AtomicU64,
    pub superseded_responses: AtomicU64,
    pub keep_alive_prompts: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DispatchStats {
            polls: get(&self.polls),
            batches: get(&self.batches),
            empty_batches: get(&self.empty_batches),
            events: get(&self.events),
            slices_published: get(&self.slices_published),
            deliveries: get(&self.deliveries),
            callback_panics: get(&self.callback_panics),
            sessions_created: get(&self.sessions_created),
            session_renewals: get(&self.session_renewals),
            superseded_responses: get(&self.superseded_responses),
            keep_alive_prompts: get(&self.keep_alive_prompts),
        }
    }
}
