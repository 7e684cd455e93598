mod common;

use common::{event, wait_until, RecordingNotifier};
use hive_stream::{ChannelKey, LiveQuery, StreamError, SubscriberRegistry};
use hive_stream::dispatch::dispatch;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counting_fetch(
    counter: &Arc<AtomicUsize>,
) -> impl Fn() -> std::future::Ready<hive_stream::Result<usize>> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || std::future::ready(Ok(counter.fetch_add(1, Ordering::SeqCst) + 1))
}

#[tokio::test]
async fn refetches_when_its_channel_publishes() {
    let registry = SubscriberRegistry::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let fetches = Arc::new(AtomicUsize::new(0));

    let mut query = LiveQuery::spawn(
        &registry,
        ChannelKey::for_object_type("case_task"),
        notifier,
        counting_fetch(&fetches),
    );
    query.changed().await.unwrap();
    assert_eq!(query.latest(), Some(1));

    dispatch(&registry, &[event("e1", "c1", "case")]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    dispatch(&registry, &[event("e2", "c1", "case_task")]);
    query.changed().await.unwrap();
    assert_eq!(query.latest(), Some(2));
}

#[tokio::test]
async fn guard_filters_refreshes() {
    let registry = SubscriberRegistry::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let fetches = Arc::new(AtomicUsize::new(0));

    let query = LiveQuery::spawn_guarded(
        &registry,
        ChannelKey::for_root("c1"),
        |events| events.iter().any(|e| e.object_type() == "case_task"),
        notifier,
        counting_fetch(&fetches),
    );
    wait_until("initial fetch", || query.latest().is_some()).await;

    dispatch(&registry, &[event("e1", "c1", "case")]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(query.latest(), Some(1));

    dispatch(&registry, &[event("e2", "c1", "case_task")]);
    wait_until("guarded refresh", || query.latest() == Some(2)).await;
}

#[tokio::test]
async fn failed_fetch_keeps_previous_value_and_reports() {
    let registry = SubscriberRegistry::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let query = LiveQuery::spawn(&registry, ChannelKey::all(), notifier.clone(), move || {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Ok("first".to_string())
            } else {
                Err(StreamError::Status {
                    status: 500,
                    body: "search failed".into(),
                })
            }
        }
    });
    wait_until("initial fetch", || query.latest().is_some()).await;

    dispatch(&registry, &[event("e1", "c1", "case")]);
    wait_until("failure report", || !notifier.reports.lock().unwrap().is_empty()).await;

    assert_eq!(query.latest().as_deref(), Some("first"));
    assert_eq!(notifier.statuses(), vec![Some(500)]);
    assert_eq!(notifier.reports.lock().unwrap()[0].1, "search failed");
}

#[tokio::test]
async fn dropping_the_query_unsubscribes() {
    let registry = SubscriberRegistry::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let fetches = Arc::new(AtomicUsize::new(0));
    let key = ChannelKey::for_object_type("alert");

    let query = LiveQuery::spawn(&registry, key.clone(), notifier, counting_fetch(&fetches));
    assert_eq!(registry.subscriber_count(&key), 1);
    query.stop();
    assert_eq!(registry.subscriber_count(&key), 0);
}
