use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::contract::EventContract;
use crate::message::MessageInfo;

/// Marker trait for handler errors.
pub trait HandlerError: Debug + Error + Send + Sync + 'static {}

/// Processes decoded events of contract `C` for a listener.
///
/// Returning `Ok` acknowledges the message. Returning an error leaves it
/// pending so the broker redelivers it after the ack-wait.
#[async_trait]
pub trait EventHandler<C>
where
    Self: Send + Sync + 'static,
    C: EventContract,
{
    /// The error type for the handler.
    type Error: HandlerError;

    /// Handles one event.
    async fn handle(&self, data: C::Data, info: &MessageInfo) -> Result<(), Self::Error>;
}

impl HandlerError for std::convert::Infallible {}
