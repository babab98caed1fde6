use async_nats::jetstream::consumer::StreamErrorKind;
use async_nats::jetstream::consumer::pull::MessagesErrorKind;
use async_nats::jetstream::context::{CreateStreamErrorKind, PublishErrorKind};
use async_nats::jetstream::stream::ConsumerErrorKind;
use thiserror::Error;
use ticketing_events::TransportError;

/// Errors that can occur talking to NATS.
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting failed.
    #[error("failed to connect to NATS: {0}")]
    Connect(async_nats::ConnectErrorKind),

    /// Creating the durable consumer failed.
    #[error("failed to create consumer: {0}")]
    Consumer(ConsumerErrorKind),

    /// Flushing on close failed.
    #[error("failed to flush: {0}")]
    Flush(async_nats::client::FlushErrorKind),

    /// The delivered message carried no JetStream metadata.
    #[error("invalid message metadata: {0}")]
    Info(String),

    /// Pulling messages failed.
    #[error("failed to pull messages: {0}")]
    Messages(MessagesErrorKind),

    /// The session is currently down.
    #[error("not connected to NATS")]
    NotConnected,

    /// Publishing failed.
    #[error("failed to publish: {0}")]
    Publish(PublishErrorKind),

    /// Creating the backing stream failed.
    #[error("failed to create stream: {0}")]
    Stream(CreateStreamErrorKind),

    /// Opening the message stream of a consumer failed.
    #[error("failed to open consumer stream: {0}")]
    Subscribe(StreamErrorKind),
}

impl TransportError for Error {
    fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::NotConnected | Self::Publish(PublishErrorKind::BrokenPipe)
        )
    }
}
