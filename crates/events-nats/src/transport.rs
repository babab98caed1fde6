use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::sync::Arc;

use async_nats::Client;
use async_nats::connection::State;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, pull};
use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use bytes::Bytes;
use ticketing_events::{Liveness, PublishAck, Subject, SubscriptionSpec, Transport};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::error::Error;
use crate::sanitize_name;
use crate::subscription::NatsSubscription;

/// A NATS session with JetStream enabled.
#[derive(Clone)]
pub struct NatsTransport {
    client: Client,
    jetstream: jetstream::Context,
    liveness: Arc<watch::Sender<Liveness>>,
    streams: Arc<Mutex<HashSet<Subject>>>,
}

impl Debug for NatsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsTransport")
            .field("liveness", &*self.liveness.borrow())
            .finish_non_exhaustive()
    }
}

impl NatsTransport {
    pub(crate) fn new(client: Client, liveness: Arc<watch::Sender<Liveness>>) -> Self {
        let jetstream = jetstream::new(client.clone());

        Self {
            client,
            jetstream,
            liveness,
            streams: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    async fn stream(&self, subject: &Subject) -> Result<stream::Stream, Error> {
        self.jetstream
            .get_or_create_stream(stream::Config {
                name: sanitize_name(subject.as_str()),
                subjects: vec![subject.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Stream(e.kind()))
    }
}

// Pulled messages start their ack-wait on arrival, so never fetch more than
// the listener can process before it expires.
fn batch_size(spec: &SubscriptionSpec) -> usize {
    spec.max_in_flight.max(1)
}

#[async_trait]
impl Transport for NatsTransport {
    type Error = Error;
    type Subscription = NatsSubscription;

    fn liveness(&self) -> watch::Receiver<Liveness> {
        self.liveness.subscribe()
    }

    // The client reconnects on its own; this only reports whether it has.
    async fn reconnect(&self) -> Result<(), Error> {
        if self.client.connection_state() == State::Connected {
            self.liveness.send_replace(Liveness::Connected);
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn publish(&self, subject: &Subject, payload: Bytes) -> Result<PublishAck, Error> {
        let mut streams = self.streams.lock().await;
        if !streams.contains(subject) {
            self.stream(subject).await?;
            streams.insert(subject.clone());
        }
        drop(streams);

        let ack = self
            .jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| Error::Publish(e.kind()))?
            .await
            .map_err(|e| Error::Publish(e.kind()))?;

        Ok(PublishAck {
            sequence: ack.sequence,
        })
    }

    async fn subscribe(&self, spec: &SubscriptionSpec) -> Result<NatsSubscription, Error> {
        let durable_name = sanitize_name(&spec.queue_group);

        let consumer = self
            .stream(&spec.subject)
            .await?
            .get_or_create_consumer(
                &durable_name,
                pull::Config {
                    durable_name: Some(durable_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: spec.ack_wait,
                    deliver_policy: DeliverPolicy::All,
                    filter_subject: spec.subject.to_string(),
                    max_deliver: -1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Consumer(e.kind()))?;

        let messages = consumer
            .stream()
            .max_messages_per_batch(batch_size(spec))
            .messages()
            .await
            .map_err(|e| Error::Subscribe(e.kind()))?;

        debug!(
            subject = %spec.subject,
            consumer = %durable_name,
            batch = batch_size(spec),
            "Pull consumer ready"
        );

        Ok(NatsSubscription::new(
            spec.subject.clone(),
            messages,
            self.liveness.subscribe(),
        ))
    }

    async fn close(&self) -> Result<(), Error> {
        let result = self
            .client
            .flush()
            .await
            .map_err(|e| Error::Flush(e.kind()));

        self.liveness.send_replace(Liveness::Closed);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    fn spec(max_in_flight: usize) -> SubscriptionSpec {
        SubscriptionSpec {
            ack_wait: Duration::from_secs(30),
            max_in_flight,
            queue_group: "payments-service".to_string(),
            subject: Subject::new("product:created").unwrap(),
        }
    }

    #[test]
    fn test_batch_follows_max_in_flight() {
        assert_eq!(batch_size(&spec(1)), 1);
        assert_eq!(batch_size(&spec(8)), 8);
    }

    #[test]
    fn test_batch_is_never_empty() {
        assert_eq!(batch_size(&spec(0)), 1);
    }
}
