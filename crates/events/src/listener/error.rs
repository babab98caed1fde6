use thiserror::Error;

use crate::BoxError;
use crate::codec;
use crate::registry;
use crate::subject::Subject;

use super::ListenerState;

/// Errors that can occur while running a listener.
#[derive(Debug, Error)]
pub enum Error {
    /// `start` was called on a listener that already left `Unsubscribed`.
    #[error("listener already started (listener is {0})")]
    AlreadyStarted(ListenerState),

    /// The handler returned an error; the message was left unacknowledged.
    #[error("handler failed for {subject} message {sequence} (redelivery {redelivery_count}): {source}")]
    HandlerFailed {
        /// The subject of the message.
        subject: Subject,

        /// Broker-assigned sequence number.
        sequence: u64,

        /// Redeliveries before this one.
        redelivery_count: u32,

        /// The handler error.
        source: BoxError,
    },

    /// A delivered payload could not be decoded.
    #[error("malformed {subject} message {sequence} (redelivery {redelivery_count}): {source}")]
    MalformedMessage {
        /// The subject of the message.
        subject: Subject,

        /// Broker-assigned sequence number.
        sequence: u64,

        /// Redeliveries before this one.
        redelivery_count: u32,

        /// The decoding error.
        source: codec::Error,
    },

    /// The contract is not usable with this connection's registry.
    #[error(transparent)]
    Registry(#[from] registry::Error),

    /// The broker did not confirm the subscription in time.
    #[error("timed out subscribing to {subject} for {queue_group}")]
    SubscribeTimeout {
        /// The subject.
        subject: Subject,

        /// The queue group.
        queue_group: String,
    },

    /// The broker rejected the subscription.
    #[error("failed to subscribe to {subject} for {queue_group}: {source}")]
    Subscription {
        /// The subject.
        subject: Subject,

        /// The queue group.
        queue_group: String,

        /// The underlying transport error.
        source: BoxError,
    },

    /// The processing task ended abnormally.
    #[error("listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
