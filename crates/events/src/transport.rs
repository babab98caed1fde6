use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::connection::ConnectionOptions;
use crate::message::Delivery;
use crate::subject::Subject;

/// Marker trait for transport errors.
pub trait TransportError: Error + Send + Sync + 'static {
    /// Whether the error means the broker session is gone.
    fn is_disconnect(&self) -> bool;
}

/// Reachability of the broker as seen by a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    /// The session is up.
    Connected,

    /// The session dropped and may come back.
    Disconnected,

    /// The session was closed and will not come back.
    Closed,
}

/// The durable identity of a queue-group subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// How long the broker waits for an ack before redelivering.
    pub ack_wait: Duration,

    /// Deliveries the member may hold unacknowledged at once. Backends
    /// should not pull more than this ahead of the handler.
    pub max_in_flight: usize,

    /// The queue group, which doubles as the durable consumer name.
    pub queue_group: String,

    /// The subject to consume.
    pub subject: Subject,
}

/// Broker confirmation that a message was stored durably.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishAck {
    /// The sequence number assigned to the message.
    pub sequence: u64,
}

/// Establishes broker sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The session type produced by this connector.
    type Transport: Transport;

    /// Opens a session. Called repeatedly by the connection manager until it
    /// succeeds or the retry budget is exhausted.
    async fn connect(
        &self,
        options: &ConnectionOptions,
    ) -> Result<Self::Transport, <Self::Transport as Transport>::Error>;
}

/// A live broker session shared by every publisher and listener of a process.
#[async_trait]
pub trait Transport: Clone + Debug + Send + Sync + 'static {
    /// The error type for the transport.
    type Error: TransportError;

    /// The subscription type produced by `subscribe`.
    type Subscription: TransportSubscription<Error = Self::Error>;

    /// Watches the reachability of the broker.
    fn liveness(&self) -> watch::Receiver<Liveness>;

    /// Attempts to re-establish a dropped session.
    async fn reconnect(&self) -> Result<(), Self::Error>;

    /// Publishes a payload, resolving once the broker stored it durably.
    async fn publish(&self, subject: &Subject, payload: Bytes) -> Result<PublishAck, Self::Error>;

    /// Joins the durable queue group described by `spec`.
    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<Self::Subscription, Self::Error>;

    /// Closes the session.
    async fn close(&self) -> Result<(), Self::Error>;
}

/// A stream of deliveries for one queue-group member.
#[async_trait]
pub trait TransportSubscription: Send + 'static {
    /// The error type for the subscription.
    type Error: TransportError;

    /// Waits for the next delivery.
    ///
    /// Returns `None` once the subscription has ended, for example because the
    /// session dropped. Must be cancel-safe: a delivery is never lost by
    /// dropping the returned future.
    async fn next(&mut self) -> Option<Result<Delivery, Self::Error>>;

    /// Leaves the queue group. The durable position is kept by the broker.
    async fn unsubscribe(&mut self) -> Result<(), Self::Error>;
}
