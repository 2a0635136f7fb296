use async_trait::async_trait;

use crate::error::ProxyError;

/// The contract every proxy kind implements. `init` binds the listener,
/// `listen` runs until `die` is observed and must not return before all
/// in-flight work has drained, and `die` blocks until `listen` has
/// returned.
#[async_trait]
pub trait Proxy: Send + Sync {
    async fn init(&self) -> Result<(), ProxyError>;

    async fn listen(&self);

    async fn die(&self);

    fn local_addr(&self) -> &str;

    fn remote_addr(&self) -> &str;
}
