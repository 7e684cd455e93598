//! Batch partitioning and channel fan-out.
//!
//! A batch is regrouped along four derived channel kinds, each group
//! published once and in batch order:
//!
//! 1. `(root, any)` for every root id seen
//! 2. `(any, type)` for every primary object type seen
//! 3. `(any, type)` for every secondary object type named by a summary
//! 4. `(root, type)` for every root/type pair seen
//!
//! followed by the untouched batch on `(any, any)`.

use crate::channel::ChannelKey;
use crate::event::UpdateEvent;
use crate::registry::SubscriberRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Events of one batch routed to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSlice {
    pub key: ChannelKey,
    pub events: Vec<UpdateEvent>,
}

/// Totals for one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub events: u64,
    pub slices: u64,
    pub published: u64,
    pub deliveries: u64,
    pub panics: u64,
}

/// Groups keyed by channel, remembering first-seen order.
#[derive(Default)]
struct Groups {
    order: Vec<ChannelKey>,
    members: HashMap<ChannelKey, Vec<usize>>,
}

impl Groups {
    fn push(&mut self, key: ChannelKey, index: usize) {
        match self.members.get_mut(&key) {
            Some(indices) => indices.push(index),
            None => {
                self.order.push(key.clone());
                self.members.insert(key, vec![index]);
            }
        }
    }

    fn drain_into(mut self, out: &mut Vec<(ChannelKey, Vec<usize>)>) {
        for key in self.order {
            if let Some(indices) = self.members.remove(&key) {
                out.push((key, indices));
            }
        }
    }
}

/// Channel groups as batch indices, in publication order.
fn plan(batch: &[UpdateEvent]) -> Vec<(ChannelKey, Vec<usize>)> {
    let mut out = Vec::new();
    if batch.is_empty() {
        return out;
    }

    let mut by_root = Groups::default();
    let mut by_type = Groups::default();
    let mut by_secondary = Groups::default();
    let mut by_root_and_type = Groups::default();

    for (i, event) in batch.iter().enumerate() {
        by_root.push(ChannelKey::for_root(event.root_id()), i);
        by_type.push(ChannelKey::for_object_type(event.object_type()), i);
        for secondary in event.secondary_object_types() {
            by_secondary.push(ChannelKey::for_object_type(secondary), i);
        }
        by_root_and_type.push(ChannelKey::exact(event.root_id(), event.object_type()), i);
    }

    by_root.drain_into(&mut out);
    by_type.drain_into(&mut out);
    by_secondary.drain_into(&mut out);
    by_root_and_type.drain_into(&mut out);
    out.push((ChannelKey::all(), (0..batch.len()).collect()));
    out
}

/// Splits `batch` into the ordered list of channel slices it publishes.
pub fn partition(batch: &[UpdateEvent]) -> Vec<ChannelSlice> {
    plan(batch)
        .into_iter()
        .map(|(key, indices)| ChannelSlice {
            key,
            events: indices.iter().map(|&i| batch[i].clone()).collect(),
        })
        .collect()
}

/// Publishes every slice of `batch` through `registry`.
///
/// Slices whose channel has no subscriber are not materialised.
pub fn dispatch(registry: &SubscriberRegistry, batch: &[UpdateEvent]) -> DispatchReport {
    let mut report = DispatchReport {
        events: batch.len() as u64,
        ..Default::default()
    };
    if batch.is_empty() {
        return report;
    }

    for (key, indices) in plan(batch) {
        report.slices += 1;
        if !registry.has_subscribers(&key) {
            continue;
        }
        let events: Arc<[UpdateEvent]> = if indices.len() == batch.len() && key == ChannelKey::all() {
            batch.into()
        } else {
            indices.iter().map(|&i| batch[i].clone()).collect()
        };
        let published = registry.publish(&key, &events);
        report.published += 1;
        report.deliveries += published.delivered;
        report.panics += published.panicked;
    }

    debug!(
        target: "dispatch",
        events = report.events,
        slices = report.slices,
        published = report.published,
        deliveries = report.deliveries,
        "Batch dispatched"
    );
    report
}
