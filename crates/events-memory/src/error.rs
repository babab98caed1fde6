use thiserror::Error;
use ticketing_events::TransportError;

/// Error type for in-memory broker operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport was closed.
    #[error("transport closed")]
    Closed,

    /// Another live connection already uses this client id.
    #[error("client id `{0}` is already connected")]
    DuplicateClientId(String),

    /// The session is currently down.
    #[error("not connected to broker")]
    NotConnected,

    /// The broker refuses connections.
    #[error("broker unreachable")]
    Unreachable,
}

impl TransportError for Error {
    fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::NotConnected | Self::Unreachable)
    }
}
