mod error;

pub use error::Error;

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::codec;
use crate::connection::{self, Connection, ConnectionState};
use crate::contract::{EventContract, Schema};
use crate::subject::Subject;
use crate::transport::{PublishAck, Transport, TransportError};

/// Options for a publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublisherOptions {
    /// How long to wait for the broker to confirm a publish.
    pub ack_timeout: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// Emits events of contract `C` on its subject.
///
/// Publishing resolves only after the broker has durably stored the event.
pub struct Publisher<T, C>
where
    T: Transport,
    C: EventContract,
{
    connection: Connection<T>,
    options: PublisherOptions,
    schema: Schema,
    subject: Subject,
    _marker: PhantomData<fn() -> C>,
}

impl<T, C> Clone for Publisher<T, C>
where
    T: Transport,
    C: EventContract,
{
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            options: self.options,
            schema: self.schema.clone(),
            subject: self.subject.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, C> Debug for Publisher<T, C>
where
    T: Transport,
    C: EventContract,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("subject", &self.subject)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T, C> Publisher<T, C>
where
    T: Transport,
    C: EventContract,
{
    /// Creates a publisher bound to a connection.
    ///
    /// # Errors
    ///
    /// Returns `Error::Registry` if `C` is not registered on the connection.
    pub fn new(connection: Connection<T>, options: PublisherOptions) -> Result<Self, Error> {
        let (subject, schema) = connection.registry().resolve::<C>()?;

        Ok(Self {
            connection,
            options,
            schema,
            subject,
            _marker: PhantomData,
        })
    }

    /// The subject this publisher emits on.
    #[must_use]
    pub const fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Publishes an event and waits for the broker to store it.
    ///
    /// Nothing is sent when the payload fails validation.
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` if the connection is not currently up.
    /// - `Error::SchemaViolation` if the payload does not match the contract.
    /// - `Error::PublishTimeout` if the broker did not confirm in time.
    /// - `Error::Transport` if the broker rejected the publish.
    #[instrument(skip_all, fields(subject = %self.subject))]
    pub async fn publish(&self, data: &C::Data) -> Result<PublishAck, Error> {
        self.connection.ensure_connected().map_err(|e| match e {
            connection::Error::NotConnected(state) => Error::NotConnected(state),
            _ => Error::NotConnected(self.connection.state()),
        })?;

        let payload = codec::encode_with(&self.schema, data).map_err(|e| match e {
            codec::Error::SchemaViolation(violation) => Error::SchemaViolation(violation),
            e => Error::Encoding(e),
        })?;

        let ack = tokio::time::timeout(
            self.options.ack_timeout,
            self.connection.transport().publish(&self.subject, payload),
        )
        .await
        .map_err(|_| Error::PublishTimeout(self.options.ack_timeout))?
        .map_err(|e| {
            if e.is_disconnect() {
                // The supervisor may not have observed the drop yet.
                let state = match self.connection.state() {
                    ConnectionState::Connected => ConnectionState::Reconnecting,
                    state => state,
                };
                Error::NotConnected(state)
            } else {
                Error::Transport(Box::new(e))
            }
        })?;

        debug!(sequence = ack.sequence, "Event published");

        Ok(ack)
    }
}
