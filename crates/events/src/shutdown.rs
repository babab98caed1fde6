use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::{self, Connection};
use crate::lifecycle::Lifecycle;
use crate::transport::Transport;

/// Drains every registered component and then closes the connection.
///
/// On shutdown the connection first stops accepting publishes, then every
/// component is given the drain timeout to finish in-flight work, and only
/// then is the broker session closed.
#[derive(Debug)]
pub struct ShutdownCoordinator<T>
where
    T: Transport,
{
    components: Vec<Arc<dyn Lifecycle>>,
    connection: Connection<T>,
    drain_timeout: Duration,
}

impl<T> ShutdownCoordinator<T>
where
    T: Transport,
{
    /// Creates a coordinator for `connection`.
    #[must_use]
    pub const fn new(connection: Connection<T>, drain_timeout: Duration) -> Self {
        Self {
            components: Vec::new(),
            connection,
            drain_timeout,
        }
    }

    /// Registers a component to stop before the connection closes.
    pub fn register(&mut self, component: impl Lifecycle) -> &mut Self {
        self.components.push(Arc::new(component));
        self
    }

    /// Starts every registered component in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first start failure; components started before it keep
    /// running until `shutdown`.
    pub async fn start_all(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for component in &self.components {
            component.start().await?;
            info!(component = %component.name(), "Started");
        }

        Ok(())
    }

    /// Drains all components and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns `connection::Error::Close` if the transport failed to close.
    /// Components that fail or exceed the drain timeout are logged and do not
    /// prevent the connection from closing.
    pub async fn shutdown(&self) -> Result<(), connection::Error> {
        info!(components = self.components.len(), "Shutting down");

        self.connection.begin_closing();

        let drains = self.components.iter().map(|component| async move {
            let name = component.name();
            match tokio::time::timeout(self.drain_timeout, component.shutdown()).await {
                Ok(Ok(())) => info!(component = %name, "Stopped"),
                Ok(Err(e)) => error!(component = %name, error = %e, "Failed to stop"),
                Err(_) => warn!(
                    component = %name,
                    timeout = ?self.drain_timeout,
                    "Did not stop within drain timeout"
                ),
            }
        });
        join_all(drains).await;

        self.connection.close().await
    }

    /// Waits for `token` to be cancelled, then shuts down.
    ///
    /// # Errors
    ///
    /// See [`ShutdownCoordinator::shutdown`].
    pub async fn run_until(&self, token: CancellationToken) -> Result<(), connection::Error> {
        token.cancelled().await;
        self.shutdown().await
    }
}

/// Waits for SIGTERM or SIGINT, or Ctrl-C where signals are not available.
///
/// # Errors
///
/// Returns an error if the signal handlers could not be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received interrupt signal");
    }

    Ok(())
}
