// Notification sink for errors surfaced to the user
use tracing::{error, warn};

/// Receives transient error notifications.
pub trait Notifier: Send + Sync {
    fn report(&self, source: &str, message: &str, status: Option<u16>);
}

/// Notifier writing to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn report(&self, source: &str, message: &str, status: Option<u16>) {
        match status {
            Some(code) if (400..500).contains(&code) => {
                warn!(target: "notify", source, status = code, "{}", message)
            }
            Some(code) => error!(target: "notify", source, status = code, "{}", message),
            None => error!(target: "notify", source, "{}", message),
        }
    }
}
