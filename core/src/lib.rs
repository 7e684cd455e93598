// Hive Stream Library
// Long-poll live update client for the case management stream API

pub mod backend;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod event;
pub mod keepalive;
pub mod live_query;
pub mod notify;
pub mod registry;
pub mod stats;
pub mod stream;

// Export core types
pub use backend::{HttpBackend, PollResponse, StreamBackend};
pub use channel::{ChannelKey, Scope};
pub use config::StreamConfig;
pub use dispatch::{partition, ChannelSlice, DispatchReport};
pub use event::{EventBase, Operation, UpdateEvent};
pub use keepalive::{AlwaysKeepAlive, KeepAlive, NeverKeepAlive};
pub use live_query::LiveQuery;
pub use notify::{Notifier, TracingNotifier};
pub use registry::{ChannelBatch, PublishReport, SubscriberId, SubscriberRegistry, Subscription};
pub use stats::DispatchStats;
pub use stream::{PollOutcome, SkipReason, StreamDispatcher};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Channel closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StreamError {
    /// HTTP status carried by the failure, if the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Status { status, .. } => Some(*status),
            StreamError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Short message suitable for the notification sink.
    pub fn message(&self) -> String {
        match self {
            StreamError::Status { body, .. } if !body.is_empty() => body.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
