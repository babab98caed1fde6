use std::sync::Arc;

use async_nats::{ConnectOptions, Event};
use async_trait::async_trait;
use ticketing_events::{ConnectionOptions, Connector, Liveness};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::transport::NatsTransport;

/// Opens NATS sessions.
#[derive(Clone, Copy, Debug, Default)]
pub struct NatsConnector;

#[async_trait]
impl Connector for NatsConnector {
    type Transport = NatsTransport;

    async fn connect(&self, options: &ConnectionOptions) -> Result<NatsTransport, Error> {
        let (liveness, _) = watch::channel(Liveness::Connected);
        let liveness = Arc::new(liveness);

        let name = format!("{}/{}", options.cluster_id, options.client_id);

        let events = liveness.clone();
        let client = ConnectOptions::new()
            .name(&name)
            .connection_timeout(options.connect_backoff.attempt_timeout)
            .event_callback(move |event| {
                let events = events.clone();
                async move {
                    match event {
                        Event::Connected => {
                            info!("NATS connected");
                            events.send_replace(Liveness::Connected);
                        }
                        Event::Disconnected => {
                            warn!("NATS disconnected");
                            events.send_replace(Liveness::Disconnected);
                        }
                        Event::Closed => {
                            events.send_replace(Liveness::Closed);
                        }
                        event => debug!(%event, "NATS event"),
                    }
                }
            })
            .connect(options.endpoint.as_str())
            .await
            .map_err(|e| Error::Connect(e.kind()))?;

        Ok(NatsTransport::new(client, liveness))
    }
}
