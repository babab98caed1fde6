//! In-memory broker for tests and local development.
//!
//! Mirrors the delivery semantics of a durable queue-group broker: per-subject
//! sequence numbers, one delivery per group, explicit acks and redelivery after
//! the ack-wait. Connectivity can be toggled to exercise reconnect paths.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod broker;
mod error;
mod subscription;
mod transport;

pub use broker::MemoryBroker;
pub use error::Error;
pub use subscription::{MemoryAck, MemorySubscription};
pub use transport::MemoryTransport;
