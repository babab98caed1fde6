use std::fmt::{self, Debug};

use async_trait::async_trait;
use bytes::Bytes;

use crate::BoxError;
use crate::subject::Subject;

/// A message as delivered by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// The subject the message was published on.
    pub subject: Subject,

    /// Broker-assigned sequence number, monotonic per subject.
    pub sequence: u64,

    /// The encoded payload.
    pub payload: Bytes,

    /// How many times the message was delivered before this delivery.
    pub redelivery_count: u32,
}

impl Message {
    /// Metadata for handlers, without the payload.
    #[must_use]
    pub fn info(&self) -> MessageInfo {
        MessageInfo {
            subject: self.subject.clone(),
            sequence: self.sequence,
            redelivery_count: self.redelivery_count,
        }
    }
}

/// Read-only metadata about a delivered message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageInfo {
    /// The subject the message was published on.
    pub subject: Subject,

    /// Broker-assigned sequence number.
    pub sequence: u64,

    /// How many times the message was delivered before this delivery.
    pub redelivery_count: u32,
}

impl MessageInfo {
    /// Whether this delivery is a redelivery.
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.redelivery_count > 0
    }
}

/// Backend-specific acknowledgment of one delivered message.
#[async_trait]
pub trait AckHandle: Send + Sync + 'static {
    /// Tells the broker the message was processed.
    async fn ack(&self) -> Result<(), BoxError>;
}

/// Opaque handle retiring one delivered message.
///
/// The token is consumed by value when acknowledged, so a message can only be
/// acknowledged once through it. Dropping it without acknowledging leaves the
/// message pending and the broker redelivers it after its ack-wait.
#[must_use = "dropping an ack token leaves the message to be redelivered"]
pub struct AckToken {
    handle: Box<dyn AckHandle>,
    sequence: u64,
    subject: Subject,
}

impl AckToken {
    /// Wraps a backend acknowledgment handle.
    pub fn new(subject: Subject, sequence: u64, handle: impl AckHandle) -> Self {
        Self {
            handle: Box::new(handle),
            sequence,
            subject,
        }
    }

    /// The sequence number of the message this token retires.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The subject of the message this token retires.
    #[must_use]
    pub const fn subject(&self) -> &Subject {
        &self.subject
    }

    pub(crate) async fn consume(self) -> Result<(), BoxError> {
        self.handle.ack().await
    }
}

impl Debug for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckToken")
            .field("subject", &self.subject)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// A message paired with the token that retires it.
#[derive(Debug)]
pub struct Delivery {
    /// The delivered message.
    pub message: Message,

    /// The token to acknowledge the message with.
    pub token: AckToken,
}
