mod error;

pub use error::Error;

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::backoff::{self, BackoffOptions};
use crate::contract::EventContract;
use crate::message::AckToken;
use crate::publisher::{self, Publisher, PublisherOptions};
use crate::registry::ContractRegistry;
use crate::transport::{Connector, Liveness, Transport};

/// Where the single broker session of a process stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The first session is being established.
    Connecting,

    /// The session is up.
    Connected,

    /// The session dropped and is being re-established.
    Reconnecting,

    /// No new publishes are accepted; in-flight work may still acknowledge.
    Closing,

    /// Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// Configuration for the broker connection.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Identifier of this process; must be unique per live connection.
    pub client_id: String,

    /// Identifier of the broker cluster.
    pub cluster_id: String,

    /// Retry policy for the initial connect.
    pub connect_backoff: BackoffOptions,

    /// The broker endpoint.
    pub endpoint: Url,

    /// Retry policy after an unexpected disconnect.
    pub reconnect_backoff: BackoffOptions,
}

impl ConnectionOptions {
    /// Creates options with the default retry policies.
    #[must_use]
    pub fn new(endpoint: Url, cluster_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            cluster_id: cluster_id.into(),
            connect_backoff: BackoffOptions::default(),
            endpoint,
            reconnect_backoff: BackoffOptions {
                max_attempts: 60,
                ..BackoffOptions::default()
            },
        }
    }
}

struct ConnectionInner<T>
where
    T: Transport,
{
    options: ConnectionOptions,
    registry: Arc<ContractRegistry>,
    shutdown: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    transport: T,
}

/// The one broker connection of a process.
///
/// Cheap to clone; every publisher and listener of the process shares the
/// same underlying transport through it.
pub struct Connection<T>
where
    T: Transport,
{
    inner: Arc<ConnectionInner<T>>,
}

impl<T> Clone for Connection<T>
where
    T: Transport,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Debug for Connection<T>
where
    T: Transport,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.inner.options.client_id)
            .field("cluster_id", &self.inner.options.cluster_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T> Connection<T>
where
    T: Transport,
{
    /// Connects to the broker, retrying with capped exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` once the retry budget is exhausted.
    #[instrument(skip_all, fields(endpoint = %options.endpoint, cluster_id = %options.cluster_id, client_id = %options.client_id))]
    pub async fn connect<C>(
        connector: &C,
        options: ConnectionOptions,
        registry: Arc<ContractRegistry>,
    ) -> Result<Self, Error>
    where
        C: Connector<Transport = T>,
    {
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let options_ref = &options;
        let transport = backoff::retry(&options.connect_backoff, "connect", move || {
            connector.connect(options_ref)
        })
        .await
        .map_err(|exhausted| Error::Connect {
            attempts: exhausted.attempts,
            last_error: exhausted.last_error,
        })?;

        state.send_replace(ConnectionState::Connected);
        info!(subjects = registry.len(), "Connected to broker");

        let state = Arc::new(state);
        let shutdown = CancellationToken::new();

        let supervisor = tokio::spawn(supervise(
            transport.clone(),
            state.clone(),
            options.reconnect_backoff,
            shutdown.clone(),
        ));

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                options,
                registry,
                shutdown,
                state,
                supervisor: Mutex::new(Some(supervisor)),
                transport,
            }),
        })
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watches state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether the connection is currently usable for publishing.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Fails fast unless the connection is usable for publishing.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` carrying the current state.
    pub fn ensure_connected(&self) -> Result<(), Error> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(Error::NotConnected(state)),
        }
    }

    /// The options the connection was created with.
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// The contracts this process may publish or listen to.
    #[must_use]
    pub fn registry(&self) -> &ContractRegistry {
        &self.inner.registry
    }

    pub(crate) fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Creates a publisher for contract `C` with default options.
    ///
    /// # Errors
    ///
    /// Returns `publisher::Error::Registry` if `C` is not registered.
    pub fn publisher<C>(&self) -> Result<Publisher<T, C>, publisher::Error>
    where
        C: EventContract,
    {
        Publisher::new(self.clone(), PublisherOptions::default())
    }

    /// Creates a publisher for contract `C`.
    ///
    /// # Errors
    ///
    /// Returns `publisher::Error::Registry` if `C` is not registered.
    pub fn publisher_with_options<C>(
        &self,
        options: PublisherOptions,
    ) -> Result<Publisher<T, C>, publisher::Error>
    where
        C: EventContract,
    {
        Publisher::new(self.clone(), options)
    }

    /// Retires a delivered message.
    ///
    /// Allowed while closing so draining listeners keep their ack decisions.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the session is down (the message will
    /// be redelivered), or `Error::Ack` if the broker rejected the ack.
    pub async fn acknowledge(&self, token: AckToken) -> Result<(), Error> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Closing => {}
            state => return Err(Error::NotConnected(state)),
        }

        let sequence = token.sequence();
        token
            .consume()
            .await
            .map_err(|source| Error::Ack { sequence, source })
    }

    /// Stops accepting new publishes without tearing down the session.
    pub fn begin_closing(&self) {
        self.inner.state.send_if_modified(|state| match state {
            ConnectionState::Closing | ConnectionState::Closed => false,
            _ => {
                *state = ConnectionState::Closing;
                true
            }
        });
    }

    /// Closes the connection. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Close` if the transport failed to close cleanly; the
    /// connection is closed regardless.
    pub async fn close(&self) -> Result<(), Error> {
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }

        self.begin_closing();
        self.inner.shutdown.cancel();

        let supervisor = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Only the first caller owns the teardown; the rest wait for it.
        let Some(supervisor) = supervisor else {
            self.closed().await;
            return Ok(());
        };
        let _ = supervisor.await;

        // The supervisor may have given up and closed the transport itself.
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }

        let result = self
            .inner
            .transport
            .close()
            .await
            .map_err(|e| Error::Close(Box::new(e)));

        self.inner.state.send_replace(ConnectionState::Closed);
        info!("Connection closed");

        result
    }

    /// Waits until the connection reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.watch_state();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

// Follows transport liveness and reconnects after unexpected drops.
async fn supervise<T>(
    transport: T,
    state: Arc<watch::Sender<ConnectionState>>,
    reconnect_backoff: BackoffOptions,
    shutdown: CancellationToken,
) where
    T: Transport,
{
    let mut liveness = transport.liveness();

    loop {
        let current = *liveness.borrow_and_update();

        match current {
            Liveness::Connected => {
                state.send_if_modified(|state| {
                    if *state == ConnectionState::Reconnecting {
                        *state = ConnectionState::Connected;
                        true
                    } else {
                        false
                    }
                });
            }
            Liveness::Closed => {
                if !shutdown.is_cancelled() {
                    error!("Broker session closed unexpectedly");
                    state.send_replace(ConnectionState::Closed);
                }
                return;
            }
            Liveness::Disconnected => {
                let lost = state.send_if_modified(|state| {
                    if *state == ConnectionState::Connected {
                        *state = ConnectionState::Reconnecting;
                        true
                    } else {
                        false
                    }
                });

                if lost {
                    warn!("Connection lost, reconnecting");

                    let result = tokio::select! {
                        () = shutdown.cancelled() => return,
                        result = backoff::retry(&reconnect_backoff, "reconnect", || transport.reconnect()) => result,
                    };

                    match result {
                        Ok(()) => {
                            state.send_if_modified(|state| {
                                if *state == ConnectionState::Reconnecting {
                                    *state = ConnectionState::Connected;
                                    true
                                } else {
                                    false
                                }
                            });
                            info!("Reconnected to broker");
                        }
                        Err(exhausted) => {
                            error!(
                                attempts = exhausted.attempts,
                                error = %exhausted.last_error,
                                "Giving up on reconnecting"
                            );
                            if let Err(e) = transport.close().await {
                                debug!(error = %e, "Failed to close abandoned transport");
                            }
                            state.send_replace(ConnectionState::Closed);
                            return;
                        }
                    }

                    // Liveness may have flipped again while reconnecting.
                    continue;
                }
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => return,
            changed = liveness.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bytes::Bytes;
    use thiserror::Error;
    use tokio::time::timeout;

    use crate::message::Delivery;
    use crate::subject::Subject;
    use crate::transport::{PublishAck, SubscriptionSpec, TransportError, TransportSubscription};

    #[derive(Debug, Error)]
    #[error("broker down")]
    struct Down;

    impl TransportError for Down {
        fn is_disconnect(&self) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct NoSubscription;

    #[async_trait]
    impl TransportSubscription for NoSubscription {
        type Error = Down;

        async fn next(&mut self) -> Option<Result<Delivery, Down>> {
            None
        }

        async fn unsubscribe(&mut self) -> Result<(), Down> {
            Ok(())
        }
    }

    #[derive(Clone, Debug)]
    struct ScriptedTransport {
        closes: Arc<AtomicUsize>,
        liveness: Arc<watch::Sender<Liveness>>,
        reachable: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                closes: Arc::new(AtomicUsize::new(0)),
                liveness: Arc::new(watch::channel(Liveness::Connected).0),
                reachable: Arc::new(AtomicBool::new(true)),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        type Error = Down;
        type Subscription = NoSubscription;

        fn liveness(&self) -> watch::Receiver<Liveness> {
            self.liveness.subscribe()
        }

        async fn reconnect(&self) -> Result<(), Down> {
            if self.reachable.load(Ordering::SeqCst) {
                self.liveness.send_replace(Liveness::Connected);
                Ok(())
            } else {
                Err(Down)
            }
        }

        async fn publish(&self, _subject: &Subject, _payload: Bytes) -> Result<PublishAck, Down> {
            Ok(PublishAck { sequence: 1 })
        }

        async fn subscribe(&self, _spec: &SubscriptionSpec) -> Result<NoSubscription, Down> {
            Ok(NoSubscription)
        }

        async fn close(&self) -> Result<(), Down> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct ScriptedConnector {
        attempts: AtomicUsize,
        failures: usize,
        transport: ScriptedTransport,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Transport = ScriptedTransport;

        async fn connect(&self, _options: &ConnectionOptions) -> Result<ScriptedTransport, Down> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(Down)
            } else {
                Ok(self.transport.clone())
            }
        }
    }

    fn fast() -> BackoffOptions {
        BackoffOptions {
            attempt_timeout: Duration::from_millis(100),
            base_delay: Duration::from_millis(1),
            max_attempts: 3,
            max_delay: Duration::from_millis(5),
        }
    }

    fn options() -> ConnectionOptions {
        let mut options = ConnectionOptions::new(
            Url::parse("nats://localhost:4222").unwrap(),
            "ticketing",
            "test-client",
        );
        options.connect_backoff = fast();
        options.reconnect_backoff = fast();
        options
    }

    fn connector(failures: usize) -> ScriptedConnector {
        ScriptedConnector {
            attempts: AtomicUsize::new(0),
            failures,
            transport: ScriptedTransport::new(),
        }
    }

    #[tokio::test]
    async fn test_connect_retries_until_success() {
        let connector = connector(2);

        let connection = Connection::connect(&connector, options(), Arc::default())
            .await
            .unwrap();

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert!(connection.ensure_connected().is_ok());
    }

    #[tokio::test]
    async fn test_connect_fails_after_budget() {
        let connector = connector(usize::MAX);

        let result = Connection::connect(&connector, options(), Arc::default()).await;

        assert_matches!(
            result,
            Err(Error::Connect { attempts: 3, last_error }) if last_error == "broker down"
        );
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_supervisor_reconnects_after_drop() {
        let connector = connector(0);
        let mut options = options();
        options.reconnect_backoff.max_attempts = 1_000;
        let connection = Connection::connect(&connector, options, Arc::default())
            .await
            .unwrap();
        let mut state = connection.watch_state();

        connector.transport.reachable.store(false, Ordering::SeqCst);
        connector
            .transport
            .liveness
            .send_replace(Liveness::Disconnected);

        timeout(
            Duration::from_secs(1),
            state.wait_for(|state| *state == ConnectionState::Reconnecting),
        )
        .await
        .unwrap()
        .unwrap();
        assert_matches!(
            connection.ensure_connected(),
            Err(Error::NotConnected(ConnectionState::Reconnecting))
        );

        connector.transport.reachable.store(true, Ordering::SeqCst);

        timeout(
            Duration::from_secs(1),
            state.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(logs_contain("Reconnected to broker"));
    }

    #[tokio::test]
    async fn test_supervisor_closes_after_reconnect_budget() {
        let connector = connector(0);
        let connection = Connection::connect(&connector, options(), Arc::default())
            .await
            .unwrap();

        connector.transport.reachable.store(false, Ordering::SeqCst);
        connector
            .transport
            .liveness
            .send_replace(Liveness::Disconnected);

        timeout(Duration::from_secs(1), connection.closed())
            .await
            .unwrap();
        assert_eq!(connector.transport.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_closing_blocks_publishes() {
        let connector = connector(0);
        let connection = Connection::connect(&connector, options(), Arc::default())
            .await
            .unwrap();

        connection.begin_closing();
        assert_matches!(
            connection.ensure_connected(),
            Err(Error::NotConnected(ConnectionState::Closing))
        );

        connection.close().await.unwrap();
        connection.close().await.unwrap();

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connector.transport.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_close_tears_down_transport_once() {
        let connector = connector(0);
        let connection = Connection::connect(&connector, options(), Arc::default())
            .await
            .unwrap();
        let other = connection.clone();

        let (first, second) = timeout(Duration::from_secs(1), async {
            tokio::join!(connection.close(), other.close())
        })
        .await
        .unwrap();

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connector.transport.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_not_connected_is_retriable_only_while_recovering() {
        assert!(Error::NotConnected(ConnectionState::Reconnecting).is_retriable());
        assert!(!Error::NotConnected(ConnectionState::Closed).is_retriable());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
