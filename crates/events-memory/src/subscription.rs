use std::fmt::{self, Debug};

use async_trait::async_trait;
use ticketing_events::{
    AckHandle, AckToken, BoxError, Delivery, Liveness, Message, Subject, TransportSubscription,
};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::broker::MemoryBroker;
use crate::error::Error;

/// One queue-group member on a [`MemoryBroker`].
pub struct MemorySubscription {
    active: bool,
    appended: watch::Receiver<u64>,
    broker: MemoryBroker,
    liveness: watch::Receiver<Liveness>,
    queue_group: String,
    subject: Subject,
}

impl Debug for MemorySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySubscription")
            .field("subject", &self.subject)
            .field("queue_group", &self.queue_group)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl MemorySubscription {
    pub(crate) const fn new(
        broker: MemoryBroker,
        subject: Subject,
        queue_group: String,
        liveness: watch::Receiver<Liveness>,
        appended: watch::Receiver<u64>,
    ) -> Self {
        Self {
            active: true,
            appended,
            broker,
            liveness,
            queue_group,
            subject,
        }
    }

    // Claims the next delivery for this group, or returns when to look again.
    fn poll_delivery(&self) -> Result<Delivery, Option<Instant>> {
        let mut state = self.broker.state.lock();
        let now = Instant::now();

        let Some(log) = state.subjects.get_mut(&self.subject) else {
            return Err(None);
        };
        let published = log.published();
        let Some(group) = log.groups.get_mut(&self.queue_group) else {
            return Err(None);
        };

        let Some((sequence, redelivery_count)) = group.take_next(published, now) else {
            return Err(group.next_deadline());
        };

        let payload = log.payload(sequence).unwrap_or_default();

        Ok(Delivery {
            message: Message {
                subject: self.subject.clone(),
                sequence,
                payload,
                redelivery_count,
            },
            token: AckToken::new(
                self.subject.clone(),
                sequence,
                MemoryAck {
                    broker: self.broker.clone(),
                    liveness: self.liveness.clone(),
                    queue_group: self.queue_group.clone(),
                    sequence,
                    subject: self.subject.clone(),
                },
            ),
        })
    }
}

#[async_trait]
impl TransportSubscription for MemorySubscription {
    type Error = Error;

    async fn next(&mut self) -> Option<Result<Delivery, Error>> {
        loop {
            // Mark both watches seen before looking, so no wakeup is missed.
            self.appended.borrow_and_update();
            if !self.active || *self.liveness.borrow_and_update() != Liveness::Connected {
                return None;
            }

            let wake_at = match self.poll_delivery() {
                Ok(delivery) => return Some(Ok(delivery)),
                Err(wake_at) => wake_at,
            };

            let redelivery_due = async {
                match wake_at {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                changed = self.liveness.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                changed = self.appended.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                () = redelivery_due => {}
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), Error> {
        self.active = false;
        Ok(())
    }
}

/// Acknowledges one message delivered by a [`MemoryBroker`].
pub struct MemoryAck {
    broker: MemoryBroker,
    liveness: watch::Receiver<Liveness>,
    queue_group: String,
    sequence: u64,
    subject: Subject,
}

impl Debug for MemoryAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAck")
            .field("subject", &self.subject)
            .field("queue_group", &self.queue_group)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AckHandle for MemoryAck {
    async fn ack(&self) -> Result<(), BoxError> {
        if *self.liveness.borrow() != Liveness::Connected {
            return Err(Box::new(Error::NotConnected));
        }

        let mut state = self.broker.state.lock();
        if let Some(group) = state
            .subjects
            .get_mut(&self.subject)
            .and_then(|log| log.groups.get_mut(&self.queue_group))
        {
            // Acking a message that was already retired is a no-op.
            group.pending.remove(&self.sequence);
        }

        Ok(())
    }
}
