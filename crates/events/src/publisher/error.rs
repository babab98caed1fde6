use std::time::Duration;

use thiserror::Error;

use crate::BoxError;
use crate::codec::{self, SchemaViolation};
use crate::connection::ConnectionState;
use crate::registry;

/// Errors that can occur while publishing.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload could not be serialized.
    #[error(transparent)]
    Encoding(codec::Error),

    /// The connection cannot publish right now.
    #[error("not connected (connection is {0})")]
    NotConnected(ConnectionState),

    /// The broker did not confirm the publish in time.
    ///
    /// The event may or may not have been stored.
    #[error("publish was not acknowledged within {0:?}")]
    PublishTimeout(Duration),

    /// The contract is not usable with this connection's registry.
    #[error(transparent)]
    Registry(#[from] registry::Error),

    /// The payload does not conform to the contract's schema.
    #[error("payload rejected: {0}")]
    SchemaViolation(#[source] SchemaViolation),

    /// The broker rejected the publish.
    #[error("broker rejected publish: {0}")]
    Transport(#[source] BoxError),
}

impl Error {
    /// Whether publishing the same payload again later may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected(ConnectionState::Connecting | ConnectionState::Reconnecting)
                | Self::PublishTimeout(_)
                | Self::Transport(_)
        )
    }
}
