//! Typed publish/subscribe layer for exchanging domain events between services.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod backoff;

/// Encoding and decoding of event payloads.
pub mod codec;

/// The single broker connection owned by a process.
pub mod connection;

/// Event contracts pair a subject with a payload schema.
pub mod contract;

/// Dead-letter and failure reporting collaborators.
pub mod dead_letter;

/// Handlers process decoded events for listeners.
pub mod handler;

/// Lifecycle of long-running components.
pub mod lifecycle;

/// Listeners consume events for a queue group.
pub mod listener;

/// Messages, ack tokens and deliveries.
pub mod message;

/// Publishers emit events of one contract.
pub mod publisher;

/// Load-time registry of every subject and its schema.
pub mod registry;

/// Drains listeners and closes the connection on termination.
pub mod shutdown;

/// Subjects are named channels for one event contract.
pub mod subject;

/// The broker seam implemented by concrete backends.
pub mod transport;

pub use backoff::BackoffOptions;
pub use codec::SchemaViolation;
pub use connection::{Connection, ConnectionOptions, ConnectionState};
pub use contract::{EventContract, Field, FieldKind, Schema};
pub use dead_letter::{
    DeadLetter, DeadLetterChannel, DeadLetterReason, DeadLetterSink, FailureObserver,
    TracingDeadLetterSink, TracingObserver,
};
pub use handler::{EventHandler, HandlerError};
pub use lifecycle::Lifecycle;
pub use listener::{Listener, ListenerBuilder, ListenerOptions, ListenerState};
pub use message::{AckHandle, AckToken, Delivery, Message, MessageInfo};
pub use publisher::{Publisher, PublisherOptions};
pub use registry::{ContractRegistry, RegistryBuilder};
pub use shutdown::{ShutdownCoordinator, wait_for_signal};
pub use subject::Subject;
pub use transport::{
    Connector, Liveness, PublishAck, SubscriptionSpec, Transport, TransportError,
    TransportSubscription,
};

/// Boxed error crossing component boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
