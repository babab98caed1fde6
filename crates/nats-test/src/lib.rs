//! Playground binaries exercising the event bus against a local NATS server.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Args;
use ticketing_contracts::{ProductCreated, ProductCreatedData};
use ticketing_events::{
    Connection, ConnectionOptions, EventHandler, ListenerOptions, MessageInfo,
    PublisherOptions, connection, listener, publisher, registry,
};
use ticketing_events_nats::{NatsConnector, NatsTransport};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Playground error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] connection::Error),

    /// Listener error
    #[error(transparent)]
    Listener(#[from] listener::Error),

    /// Publisher error
    #[error(transparent)]
    Publisher(#[from] publisher::Error),

    /// Contract registry error
    #[error(transparent)]
    Registry(#[from] registry::Error),
}

/// Broker connection settings shared by both binaries.
#[derive(Args, Clone, Debug)]
pub struct ConnectArgs {
    /// NATS server URL
    #[arg(long, default_value = "nats://localhost:4222", env = "NATS_URL")]
    pub nats_url: Url,

    /// Cluster identifier
    #[arg(long, default_value = "ticketing", env = "NATS_CLUSTER_ID")]
    pub cluster_id: String,

    /// Client identifier, random when omitted
    #[arg(long, env = "NATS_CLIENT_ID")]
    pub client_id: Option<String>,
}

impl ConnectArgs {
    /// Connects to NATS with every known contract registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is inconsistent or NATS is unreachable.
    pub async fn connect(&self) -> Result<Connection<NatsTransport>, Error> {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let options = ConnectionOptions::new(self.nats_url.clone(), &self.cluster_id, client_id);
        let registry = Arc::new(ticketing_contracts::registry()?);

        let connection = Connection::connect(&NatsConnector, options, registry).await?;
        info!("Connected to NATS");

        Ok(connection)
    }
}

/// Settings for the publisher binary.
#[derive(Args, Clone, Debug)]
pub struct PublishArgs {
    /// How long to wait for the broker to store the event, in milliseconds
    #[arg(long, default_value_t = 5000, env = "PUBLISH_TIMEOUT_MS")]
    pub publish_timeout_ms: u64,
}

impl PublishArgs {
    /// Publisher options from the command line.
    #[must_use]
    pub const fn options(&self) -> PublisherOptions {
        PublisherOptions {
            ack_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }
}

/// Settings for the listener binary.
#[derive(Args, Clone, Debug)]
pub struct ListenArgs {
    /// Queue group to join
    #[arg(long, default_value = "payments-service", env = "QUEUE_GROUP")]
    pub queue_group: String,

    /// Ack-wait before the broker redelivers, in milliseconds
    #[arg(long, default_value_t = 30_000, env = "ACK_WAIT_MS")]
    pub ack_wait_ms: u64,

    /// Redeliveries before an undecodable message is dead-lettered
    #[arg(long, default_value_t = 5, env = "MAX_REDELIVERIES")]
    pub max_redeliveries: u32,

    /// Time allowed for in-flight messages on shutdown, in milliseconds
    #[arg(long, default_value_t = 10_000, env = "DRAIN_TIMEOUT_MS")]
    pub drain_timeout_ms: u64,
}

impl ListenArgs {
    /// Listener options from the command line.
    #[must_use]
    pub fn options(&self) -> ListenerOptions {
        ListenerOptions {
            ack_wait: Duration::from_millis(self.ack_wait_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            max_redeliveries: self.max_redeliveries,
            ..ListenerOptions::default()
        }
    }

    /// The drain timeout as a duration.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Installs the `fmt` subscriber, filtered by `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// The payload the publisher sends.
#[must_use]
pub fn sample_product() -> ProductCreatedData {
    ProductCreatedData {
        id: "123".to_string(),
        title: "concert".to_string(),
        price: 20.0,
    }
}

/// Logs every product creation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProductCreatedLogger;

#[async_trait]
impl EventHandler<ProductCreated> for ProductCreatedLogger {
    type Error = Infallible;

    async fn handle(&self, data: ProductCreatedData, info: &MessageInfo) -> Result<(), Infallible> {
        info!(
            sequence = info.sequence,
            redelivery_count = info.redelivery_count,
            id = %data.id,
            title = %data.title,
            price = data.price,
            "Event data"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        connect: ConnectArgs,

        #[command(flatten)]
        listen: ListenArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["listener"]).unwrap();

        assert_eq!(cli.listen.queue_group, "payments-service");
        assert_eq!(cli.listen.options().max_redeliveries, 5);
        assert_eq!(cli.listen.options().ack_wait, Duration::from_secs(30));
        assert_eq!(cli.connect.cluster_id, "ticketing");
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "listener",
            "--nats-url",
            "nats://broker:4222",
            "--queue-group",
            "orders-service",
            "--drain-timeout-ms",
            "250",
        ])
        .unwrap();

        assert_eq!(cli.connect.nats_url.as_str(), "nats://broker:4222");
        assert_eq!(cli.listen.queue_group, "orders-service");
        assert_eq!(cli.listen.drain_timeout(), Duration::from_millis(250));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_logger_acknowledges_every_event() {
        let info = MessageInfo {
            subject: ticketing_events::Subject::new("product:created").unwrap(),
            sequence: 1,
            redelivery_count: 0,
        };

        assert_matches::assert_matches!(
            ProductCreatedLogger.handle(sample_product(), &info).await,
            Ok(())
        );
        assert!(logs_contain("Event data"));
    }
}
