// Subscriber registry: ChannelKey -> subscribers multi-map
use crate::channel::ChannelKey;
use crate::event::UpdateEvent;
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type SubscriberId = u64;

/// Callback invoked with the slice published on a channel.
pub type Callback = Arc<dyn Fn(&[UpdateEvent]) + Send + Sync>;

/// Predicate deciding whether a slice is worth a callback invocation.
pub type Guard = Arc<dyn Fn(&[UpdateEvent]) -> bool + Send + Sync>;

/// Slice delivered to channel-based subscribers.
#[derive(Debug, Clone)]
pub struct ChannelBatch {
    pub key: ChannelKey,
    pub events: Arc<[UpdateEvent]>,
}

#[derive(Clone)]
enum Sink {
    Callback {
        guard: Option<Guard>,
        callback: Callback,
    },
    Channel(mpsc::UnboundedSender<ChannelBatch>),
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriberId,
    sink: Sink,
}

/// Outcome of one publish on one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: u64,
    pub skipped_by_guard: u64,
    pub panicked: u64,
    pub closed: u64,
}

#[derive(Default)]
struct Inner {
    subscribers: DashMap<ChannelKey, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, key: &ChannelKey, id: SubscriberId) -> bool {
        let mut removed = false;
        if let Some(mut subs) = self.subscribers.get_mut(key) {
            let before = subs.len();
            subs.retain(|s| s.id != id);
            removed = subs.len() != before;
        }
        self.subscribers.remove_if(key, |_, subs| subs.is_empty());
        removed
    }
}

/// Multi-map of subscribers keyed by channel.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Inner>,
}

/// Scoped registration. Dropping it removes the subscriber.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    key: ChannelKey,
    registry: Weak<Inner>,
    detached: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Keeps the subscriber registered for the lifetime of the registry.
    pub fn detach(mut self) -> SubscriberId {
        self.detached = true;
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(&self.key, self.id);
            debug!(target: "registry", id = self.id, key = %self.key, "Subscription dropped");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("detached", &self.detached)
            .finish()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, key: ChannelKey, sink: Sink) -> SubscriberId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .subscribers
            .entry(key.clone())
            .or_default()
            .push(Subscriber { id, sink });
        debug!(target: "registry", id, key = %key, "Subscriber added");
        id
    }

    fn scoped(&self, key: ChannelKey, id: SubscriberId) -> Subscription {
        Subscription {
            id,
            key,
            registry: Arc::downgrade(&self.inner),
            detached: false,
        }
    }

    /// Registers `callback` on `key` until the returned handle is dropped.
    pub fn subscribe<F>(&self, key: ChannelKey, callback: F) -> Subscription
    where
        F: Fn(&[UpdateEvent]) + Send + Sync + 'static,
    {
        let id = self.insert(
            key.clone(),
            Sink::Callback {
                guard: None,
                callback: Arc::new(callback),
            },
        );
        self.scoped(key, id)
    }

    /// Like [`subscribe`](Self::subscribe), but the callback only runs when
    /// `guard` accepts the slice.
    pub fn subscribe_guarded<G, F>(&self, key: ChannelKey, guard: G, callback: F) -> Subscription
    where
        G: Fn(&[UpdateEvent]) -> bool + Send + Sync + 'static,
        F: Fn(&[UpdateEvent]) + Send + Sync + 'static,
    {
        let id = self.insert(
            key.clone(),
            Sink::Callback {
                guard: Some(Arc::new(guard)),
                callback: Arc::new(callback),
            },
        );
        self.scoped(key, id)
    }

    /// Unscoped registration; only [`unsubscribe`](Self::unsubscribe) removes it.
    pub fn listen<F>(&self, key: ChannelKey, callback: F) -> SubscriberId
    where
        F: Fn(&[UpdateEvent]) + Send + Sync + 'static,
    {
        self.insert(
            key,
            Sink::Callback {
                guard: None,
                callback: Arc::new(callback),
            },
        )
    }

    /// Receives slices through an unbounded channel instead of a callback.
    pub fn subscribe_channel(
        &self,
        key: ChannelKey,
    ) -> (Subscription, mpsc::UnboundedReceiver<ChannelBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.insert(key.clone(), Sink::Channel(tx));
        (self.scoped(key, id), rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let key = self
            .inner
            .subscribers
            .iter()
            .find(|entry| entry.value().iter().any(|s| s.id == id))
            .map(|entry| entry.key().clone());
        match key {
            Some(key) => self.inner.remove(&key, id),
            None => false,
        }
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.inner
            .subscribers
            .get(key)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn has_subscribers(&self, key: &ChannelKey) -> bool {
        self.subscriber_count(key) > 0
    }

    pub fn total_subscribers(&self) -> usize {
        self.inner.subscribers.iter().map(|e| e.value().len()).sum()
    }

    pub fn clear(&self) {
        self.inner.subscribers.clear();
    }

    /// Delivers `events` to every subscriber of exactly `key`.
    ///
    /// The map lock is released before any callback runs, so callbacks may
    /// (un)subscribe. A panicking callback is contained and counted.
    pub fn publish(&self, key: &ChannelKey, events: &Arc<[UpdateEvent]>) -> PublishReport {
        let mut report = PublishReport::default();

        let snapshot: Vec<Subscriber> = match self.inner.subscribers.get(key) {
            Some(subs) => subs.value().clone(),
            None => return report,
        };

        for sub in snapshot {
            match &sub.sink {
                Sink::Callback { guard, callback } => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        if guard.as_ref().is_some_and(|g| !g(events)) {
                            return false;
                        }
                        callback(events);
                        true
                    }));
                    match outcome {
                        Ok(true) => report.delivered += 1,
                        Ok(false) => report.skipped_by_guard += 1,
                        Err(_) => {
                            report.panicked += 1;
                            warn!(target: "registry", id = sub.id, key = %key, "Subscriber panicked while handling updates");
                        }
                    }
                }
                Sink::Channel(tx) => {
                    let batch = ChannelBatch {
                        key: key.clone(),
                        events: Arc::clone(events),
                    };
                    if tx.send(batch).is_ok() {
                        report.delivered += 1;
                    } else {
                        report.closed += 1;
                        self.inner.remove(key, sub.id);
                        debug!(target: "registry", id = sub.id, key = %key, "Pruned closed channel subscriber");
                    }
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("channels", &self.inner.subscribers.len())
            .field("subscribers", &self.total_subscribers())
            .finish()
    }
}
