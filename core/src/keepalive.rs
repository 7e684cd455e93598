use async_trait::async_trait;

/// Asks the user whether an expiring session should be kept alive.
#[async_trait]
pub trait KeepAlive: Send + Sync {
    /// Resolves to `true` when the session should be refreshed.
    async fn prompt(&self) -> bool;
}

/// Always keeps the session alive. Suits unattended clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysKeepAlive;

#[async_trait]
impl KeepAlive for AlwaysKeepAlive {
    async fn prompt(&self) -> bool {
        true
    }
}

/// Lets sessions expire.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverKeepAlive;

#[async_trait]
impl KeepAlive for NeverKeepAlive {
    async fn prompt(&self) -> bool {
        false
    }
}
