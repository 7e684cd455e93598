//! Queries kept fresh by the update stream.
//!
//! A [`LiveQuery`] fetches a value once, then fetches it again every time a
//! slice is published on its channel. Updates that arrive while a fetch is
//! running are coalesced into a single follow-up fetch.

use crate::channel::ChannelKey;
use crate::event::UpdateEvent;
use crate::notify::Notifier;
use crate::registry::{Guard, SubscriberRegistry, Subscription};
use crate::stream::NOTIFY_SOURCE;
use crate::{Result, StreamError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct LiveQuery<T> {
    value: watch::Receiver<Option<T>>,
    task: JoinHandle<()>,
    _subscription: Subscription,
}

impl<T> LiveQuery<T>
where
    T: Send + Sync + 'static,
{
    /// Starts a query refreshed on every slice published on `key`.
    pub fn spawn<F, Fut>(
        registry: &SubscriberRegistry,
        key: ChannelKey,
        notifier: Arc<dyn Notifier>,
        fetch: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::start(registry, key, None, notifier, fetch)
    }

    /// Like [`spawn`](Self::spawn), but only refreshes when `guard` accepts
    /// the published slice.
    pub fn spawn_guarded<G, F, Fut>(
        registry: &SubscriberRegistry,
        key: ChannelKey,
        guard: G,
        notifier: Arc<dyn Notifier>,
        fetch: F,
    ) -> Self
    where
        G: Fn(&[UpdateEvent]) -> bool + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::start(registry, key, Some(Arc::new(guard)), notifier, fetch)
    }

    fn start<F, Fut>(
        registry: &SubscriberRegistry,
        key: ChannelKey,
        guard: Option<Guard>,
        notifier: Arc<dyn Notifier>,
        fetch: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (subscription, mut updates) = registry.subscribe_channel(key.clone());
        let (tx, value) = watch::channel(None);

        let task = tokio::spawn(async move {
            refresh(&fetch, &tx, notifier.as_ref()).await;

            while let Some(batch) = updates.recv().await {
                if let Some(guard) = &guard {
                    if !guard(&batch.events) {
                        continue;
                    }
                }
                let mut coalesced = 0usize;
                while updates.try_recv().is_ok() {
                    coalesced += 1;
                }
                debug!(target: "live_query", key = %key, coalesced, "Refreshing live query");
                refresh(&fetch, &tx, notifier.as_ref()).await;
            }
        });

        Self {
            value,
            task,
            _subscription: subscription,
        }
    }

    /// Watch handle on the latest successfully fetched value.
    pub fn watch(&self) -> watch::Receiver<Option<T>> {
        self.value.clone()
    }

    /// Waits until a new value has been fetched.
    pub async fn changed(&mut self) -> Result<()> {
        self.value.changed().await.map_err(|_| StreamError::Closed)
    }

    pub fn stop(self) {}
}

impl<T> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn latest(&self) -> Option<T> {
        self.value.borrow().clone()
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Failed fetches keep the previous value.
async fn refresh<T, F, Fut>(fetch: &F, tx: &watch::Sender<Option<T>>, notifier: &dyn Notifier)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match fetch().await {
        Ok(value) => {
            tx.send_replace(Some(value));
        }
        Err(e) => notifier.report(NOTIFY_SOURCE, &e.message(), e.status()),
    }
}
