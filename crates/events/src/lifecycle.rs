use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// A long-running component started after connect and stopped on shutdown.
#[async_trait]
pub trait Lifecycle: Debug + Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Starts the component.
    async fn start(&self) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Stops the component, finishing in-flight work first.
    async fn shutdown(&self) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Waits until the component has stopped.
    async fn wait(&self);
}
