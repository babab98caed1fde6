use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ticketing_events::{Liveness, PublishAck, Subject, SubscriptionSpec, Transport};
use tokio::sync::watch;
use tracing::debug;

use crate::broker::MemoryBroker;
use crate::error::Error;
use crate::subscription::MemorySubscription;

/// One client session on a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
    client_id: String,
    liveness: Arc<watch::Sender<Liveness>>,
}

impl Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("client_id", &self.client_id)
            .field("liveness", &*self.liveness.borrow())
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    pub(crate) const fn new(
        broker: MemoryBroker,
        client_id: String,
        liveness: Arc<watch::Sender<Liveness>>,
    ) -> Self {
        Self {
            broker,
            client_id,
            liveness,
        }
    }

    /// The client id this session was opened with.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        match *self.liveness.borrow() {
            Liveness::Connected => Ok(()),
            Liveness::Disconnected => Err(Error::NotConnected),
            Liveness::Closed => Err(Error::Closed),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;
    type Subscription = MemorySubscription;

    fn liveness(&self) -> watch::Receiver<Liveness> {
        self.liveness.subscribe()
    }

    async fn reconnect(&self) -> Result<(), Error> {
        if !self.broker.state.lock().reachable {
            return Err(Error::Unreachable);
        }

        let reconnected = self.liveness.send_if_modified(|liveness| {
            if *liveness == Liveness::Disconnected {
                *liveness = Liveness::Connected;
                true
            } else {
                false
            }
        });

        if reconnected {
            debug!(client_id = %self.client_id, "Client reconnected");
        }

        self.ensure_connected()
    }

    async fn publish(&self, subject: &Subject, payload: Bytes) -> Result<PublishAck, Error> {
        self.ensure_connected()?;

        let latency = self.broker.state.lock().publish_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
            self.ensure_connected()?;
        }

        let mut state = self.broker.state.lock();
        let log = state.subject_log(subject);
        log.messages.push(payload);
        let sequence = log.published();
        log.appended.send_replace(sequence);

        Ok(PublishAck { sequence })
    }

    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<MemorySubscription, Error> {
        self.ensure_connected()?;

        let appended = {
            let mut state = self.broker.state.lock();
            state.group(&spec.subject, &spec.queue_group, spec.ack_wait);
            state.subject_log(&spec.subject).appended.subscribe()
        };

        debug!(
            client_id = %self.client_id,
            subject = %spec.subject,
            queue_group = %spec.queue_group,
            "Joined queue group"
        );

        Ok(MemorySubscription::new(
            self.broker.clone(),
            spec.subject.clone(),
            spec.queue_group.clone(),
            self.liveness.subscribe(),
            appended,
        ))
    }

    async fn close(&self) -> Result<(), Error> {
        self.liveness.send_replace(Liveness::Closed);

        let mut state = self.broker.state.lock();
        if state
            .clients
            .get(&self.client_id)
            .is_some_and(|liveness| Arc::ptr_eq(liveness, &self.liveness))
        {
            state.clients.remove(&self.client_id);
        }

        debug!(client_id = %self.client_id, "Client closed");

        Ok(())
    }
}
