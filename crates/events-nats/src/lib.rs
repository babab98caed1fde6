//! NATS JetStream backend for the ticketing event bus.
//!
//! Every subject is backed by its own stream and every queue group by a
//! durable pull consumer with explicit acks, so delivery positions survive
//! restarts and reconnects.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connector;
mod error;
mod subscription;
mod transport;

pub use connector::NatsConnector;
pub use error::Error;
pub use subscription::{NatsAck, NatsSubscription};
pub use transport::NatsTransport;

// Stream and consumer names may not contain ':'. Subjects never contain '_',
// so distinct subjects keep distinct stream names.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
