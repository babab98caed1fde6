use thiserror::Error;

use super::ConnectionState;
use crate::BoxError;

/// Errors that can occur managing the broker connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Acknowledging a message failed.
    #[error("failed to acknowledge message {sequence}: {source}")]
    Ack {
        /// Sequence number of the message.
        sequence: u64,

        /// The underlying transport error.
        source: BoxError,
    },

    /// Closing the transport failed.
    #[error("failed to close transport: {0}")]
    Close(#[source] BoxError),

    /// The broker could not be reached within the retry budget.
    #[error("failed to connect after {attempts} attempts: {last_error}")]
    Connect {
        /// Number of attempts made.
        attempts: usize,

        /// The last error message received.
        last_error: String,
    },

    /// The connection is not usable right now.
    #[error("not connected (connection is {0})")]
    NotConnected(ConnectionState),
}

impl Error {
    /// Whether the caller may retry the operation later.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected(
                ConnectionState::Connecting | ConnectionState::Reconnecting
            ) | Self::Ack { .. }
        )
    }
}
