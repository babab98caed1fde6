use std::fmt::{self, Debug};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::BoxError;
use crate::listener;
use crate::subject::Subject;

/// Why a message was dead-lettered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The payload could never be decoded.
    Malformed(String),

    /// The handler kept failing.
    HandlerFailed(String),
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed: {reason}"),
            Self::HandlerFailed(reason) => write!(f, "handler failed: {reason}"),
        }
    }
}

/// A message removed from circulation after exhausting its redeliveries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// The subject the message was published on.
    pub subject: Subject,

    /// Broker-assigned sequence number.
    pub sequence: u64,

    /// The raw payload, as received.
    pub payload: Bytes,

    /// Redeliveries before the message was dead-lettered.
    pub redelivery_count: u32,

    /// Why the message was dead-lettered.
    pub reason: DeadLetterReason,
}

/// Receives messages that will not be retried any more.
///
/// The message is only acknowledged after the sink accepted it; a failing
/// sink leaves the message pending.
#[async_trait]
pub trait DeadLetterSink: Debug + Send + Sync + 'static {
    /// Accepts one dead letter.
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), BoxError>;
}

/// Logs dead letters and drops them.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), BoxError> {
        error!(
            subject = %letter.subject,
            sequence = letter.sequence,
            redelivery_count = letter.redelivery_count,
            payload_len = letter.payload.len(),
            reason = %letter.reason,
            "Message dead-lettered"
        );

        Ok(())
    }
}

/// Forwards dead letters over a channel.
#[derive(Clone, Debug)]
pub struct DeadLetterChannel {
    sender: mpsc::Sender<DeadLetter>,
}

impl DeadLetterChannel {
    /// Creates a channel sink and the receiving end for it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeadLetter>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterChannel {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), BoxError> {
        self.sender
            .send(letter)
            .await
            .map_err(|_| "dead-letter receiver dropped".into())
    }
}

/// Observes per-message failures of a listener.
///
/// Failures never stop a listener; this is where they surface.
pub trait FailureObserver: Debug + Send + Sync + 'static {
    /// Called for every delivery that was not processed successfully.
    fn observe(&self, failure: &listener::Error);
}

/// Logs failures at warn level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl FailureObserver for TracingObserver {
    fn observe(&self, failure: &listener::Error) {
        warn!(error = %failure, "Failed to process message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter() -> DeadLetter {
        DeadLetter {
            subject: Subject::new("product:created").unwrap(),
            sequence: 3,
            payload: Bytes::from_static(b"not json"),
            redelivery_count: 5,
            reason: DeadLetterReason::Malformed("expected value".to_string()),
        }
    }

    #[tokio::test]
    async fn test_channel_forwards_letters() {
        let (sink, mut receiver) = DeadLetterChannel::new(1);

        sink.dead_letter(letter()).await.unwrap();

        assert_eq!(receiver.recv().await.unwrap(), letter());
    }

    #[tokio::test]
    async fn test_channel_fails_once_receiver_is_gone() {
        let (sink, receiver) = DeadLetterChannel::new(1);
        drop(receiver);

        assert!(sink.dead_letter(letter()).await.is_err());
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_tracing_sink_logs_letter() {
        TracingDeadLetterSink.dead_letter(letter()).await.unwrap();

        assert!(logs_contain("Message dead-lettered"));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            DeadLetterReason::HandlerFailed("boom".to_string()).to_string(),
            "handler failed: boom"
        );
    }
}
