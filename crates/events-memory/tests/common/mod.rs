#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use ticketing_contracts::{ProductCreated, ProductCreatedData};
use ticketing_events::listener;
use ticketing_events::{
    BackoffOptions, Connection, ConnectionOptions, EventHandler, FailureObserver, HandlerError,
    MessageInfo,
};
use ticketing_events_memory::{MemoryBroker, MemoryTransport};
use tokio::sync::mpsc;
use url::Url;

pub const QUEUE_GROUP: &str = "payments-service";

pub fn fast_backoff() -> BackoffOptions {
    BackoffOptions {
        attempt_timeout: Duration::from_millis(500),
        base_delay: Duration::from_millis(5),
        max_attempts: 3,
        max_delay: Duration::from_millis(20),
    }
}

pub fn options(client_id: &str) -> ConnectionOptions {
    let mut options = ConnectionOptions::new(
        Url::parse("memory://localhost").unwrap(),
        "ticketing",
        client_id,
    );
    options.connect_backoff = fast_backoff();
    options.reconnect_backoff = BackoffOptions {
        max_attempts: 100,
        ..fast_backoff()
    };
    options
}

pub async fn connect(broker: &MemoryBroker, client_id: &str) -> Connection<MemoryTransport> {
    Connection::connect(
        broker,
        options(client_id),
        Arc::new(ticketing_contracts::registry().unwrap()),
    )
    .await
    .unwrap()
}

pub fn product(id: &str) -> ProductCreatedData {
    ProductCreatedData {
        id: id.to_string(),
        title: "concert".to_string(),
        price: 20.0,
    }
}

#[derive(Debug, Error)]
#[error("handler failed on purpose")]
pub struct TestHandlerError;

impl HandlerError for TestHandlerError {}

/// Records every event and fails the first `failures` invocations.
#[derive(Debug)]
pub struct RecordingHandler {
    delay: Duration,
    failures: AtomicU32,
    sender: mpsc::UnboundedSender<(ProductCreatedData, MessageInfo)>,
    started: Option<mpsc::UnboundedSender<u64>>,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(ProductCreatedData, MessageInfo)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                delay: Duration::ZERO,
                failures: AtomicU32::new(0),
                sender,
                started: None,
            },
            receiver,
        )
    }

    pub fn failing(self, failures: u32) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (started, receiver) = mpsc::unbounded_channel();
        self.delay = delay;
        self.started = Some(started);
        (self, receiver)
    }
}

#[async_trait]
impl EventHandler<ProductCreated> for RecordingHandler {
    type Error = TestHandlerError;

    async fn handle(&self, data: ProductCreatedData, info: &MessageInfo) -> Result<(), Self::Error> {
        if let Some(started) = &self.started {
            let _ = started.send(info.sequence);
        }

        tokio::time::sleep(self.delay).await;

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        let _ = self.sender.send((data, info.clone()));

        if failed {
            Err(TestHandlerError)
        } else {
            Ok(())
        }
    }
}

/// Forwards failure descriptions to a channel.
#[derive(Debug)]
pub struct ChannelObserver(pub mpsc::UnboundedSender<String>);

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self(sender), receiver)
    }
}

impl FailureObserver for ChannelObserver {
    fn observe(&self, failure: &listener::Error) {
        let kind = match failure {
            listener::Error::MalformedMessage { .. } => "malformed",
            listener::Error::HandlerFailed { .. } => "handler",
            _ => "other",
        };
        let _ = self.0.send(kind.to_string());
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
