use std::fmt::{self, Debug};

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use async_trait::async_trait;
use futures::StreamExt;
use ticketing_events::{
    AckHandle, AckToken, BoxError, Delivery, Liveness, Message, Subject, TransportSubscription,
};
use tokio::sync::watch;

use crate::error::Error;

/// One queue-group member pulling from a durable consumer.
pub struct NatsSubscription {
    liveness: watch::Receiver<Liveness>,
    messages: Option<pull::Stream>,
    subject: Subject,
}

impl Debug for NatsSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsSubscription")
            .field("subject", &self.subject)
            .field("active", &self.messages.is_some())
            .finish_non_exhaustive()
    }
}

impl NatsSubscription {
    pub(crate) const fn new(
        subject: Subject,
        messages: pull::Stream,
        liveness: watch::Receiver<Liveness>,
    ) -> Self {
        Self {
            liveness,
            messages: Some(messages),
            subject,
        }
    }

    fn delivery(&self, message: jetstream::Message) -> Result<Delivery, Error> {
        let (sequence, delivered) = {
            let info = message.info().map_err(|e| Error::Info(e.to_string()))?;
            (info.stream_sequence, info.delivered)
        };
        let redelivery_count = u32::try_from(delivered.saturating_sub(1)).unwrap_or(u32::MAX);
        let payload = message.payload.clone();

        Ok(Delivery {
            message: Message {
                subject: self.subject.clone(),
                sequence,
                payload,
                redelivery_count,
            },
            token: AckToken::new(self.subject.clone(), sequence, NatsAck { message }),
        })
    }
}

#[async_trait]
impl TransportSubscription for NatsSubscription {
    type Error = Error;

    async fn next(&mut self) -> Option<Result<Delivery, Error>> {
        loop {
            if *self.liveness.borrow_and_update() != Liveness::Connected {
                return None;
            }

            let messages = self.messages.as_mut()?;

            tokio::select! {
                changed = self.liveness.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                message = messages.next() => {
                    return match message {
                        None => None,
                        Some(Err(e)) => Some(Err(Error::Messages(e.kind()))),
                        Some(Ok(message)) => Some(self.delivery(message)),
                    };
                }
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), Error> {
        // Dropping the pull stream stops fetching; the durable keeps its position.
        self.messages = None;
        Ok(())
    }
}

/// Acknowledges one JetStream message.
pub struct NatsAck {
    message: jetstream::Message,
}

impl Debug for NatsAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsAck")
            .field("subject", &self.message.subject)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AckHandle for NatsAck {
    async fn ack(&self) -> Result<(), BoxError> {
        self.message.ack().await
    }
}
