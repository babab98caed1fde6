mod error;

pub use error::Error;

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::codec;
use crate::connection::{Connection, ConnectionState};
use crate::contract::{EventContract, Schema};
use crate::dead_letter::{
    DeadLetter, DeadLetterReason, DeadLetterSink, FailureObserver, TracingDeadLetterSink,
    TracingObserver,
};
use crate::handler::EventHandler;
use crate::lifecycle::Lifecycle;
use crate::message::{AckToken, Delivery, Message};
use crate::subject::Subject;
use crate::transport::{SubscriptionSpec, Transport, TransportError, TransportSubscription};

const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(200);

/// Where a listener is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerState {
    /// Created but not started.
    Unsubscribed,

    /// Joining the queue group.
    Subscribing,

    /// Receiving and processing messages.
    Listening,

    /// No new messages are pulled; in-flight ones are finishing.
    Draining,

    /// Terminal.
    Closed,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribing => "subscribing",
            Self::Listening => "listening",
            Self::Draining => "draining",
            Self::Closed => "closed",
        })
    }
}

/// Options for a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerOptions {
    /// How long the broker waits for an ack before redelivering.
    pub ack_wait: Duration,

    /// Also dead-letter messages whose handler keeps failing.
    ///
    /// Off by default: a failing handler never causes an acknowledgment.
    pub dead_letter_handler_failures: bool,

    /// How long in-flight messages may take to finish on shutdown.
    pub drain_timeout: Duration,

    /// Messages processed concurrently. `1` preserves delivery order.
    pub max_in_flight: usize,

    /// Redeliveries after which an undecodable message is dead-lettered.
    pub max_redeliveries: u32,

    /// How long to wait for the broker to confirm a subscription.
    pub subscribe_timeout: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(30),
            dead_letter_handler_failures: false,
            drain_timeout: Duration::from_secs(10),
            max_in_flight: 1,
            max_redeliveries: 5,
            subscribe_timeout: Duration::from_secs(10),
        }
    }
}

/// Configures a [`Listener`].
pub struct ListenerBuilder<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    connection: Connection<T>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    handler: H,
    observer: Option<Arc<dyn FailureObserver>>,
    options: ListenerOptions,
    queue_group: String,
    _marker: PhantomData<fn() -> C>,
}

impl<T, C, H> ListenerBuilder<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    /// Sets the listener options.
    #[must_use]
    pub fn options(mut self, options: ListenerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets where exhausted messages go. Defaults to logging them.
    #[must_use]
    pub fn dead_letter_sink(mut self, sink: impl DeadLetterSink) -> Self {
        self.dead_letters = Some(Arc::new(sink));
        self
    }

    /// Sets who is told about per-message failures. Defaults to logging them.
    #[must_use]
    pub fn observer(mut self, observer: impl FailureObserver) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Builds the listener.
    ///
    /// # Errors
    ///
    /// Returns `Error::Registry` if `C` is not registered on the connection.
    pub fn build(self) -> Result<Listener<T, C, H>, Error> {
        let (subject, schema) = self.connection.registry().resolve::<C>()?;
        let (state, _) = watch::channel(ListenerState::Unsubscribed);

        Ok(Listener {
            inner: Arc::new(ListenerInner {
                connection: self.connection,
                dead_letters: self
                    .dead_letters
                    .unwrap_or_else(|| Arc::new(TracingDeadLetterSink)),
                handler: self.handler,
                observer: self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
                options: self.options,
                queue_group: self.queue_group,
                schema,
                shutdown: CancellationToken::new(),
                state,
                subject,
                task: Mutex::new(None),
                _marker: PhantomData,
            }),
        })
    }
}

struct ListenerInner<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    connection: Connection<T>,
    dead_letters: Arc<dyn DeadLetterSink>,
    handler: H,
    observer: Arc<dyn FailureObserver>,
    options: ListenerOptions,
    queue_group: String,
    schema: Schema,
    shutdown: CancellationToken,
    state: watch::Sender<ListenerState>,
    subject: Subject,
    task: Mutex<Option<JoinHandle<()>>>,
    _marker: PhantomData<fn() -> C>,
}

/// Consumes events of contract `C` as a member of a durable queue group.
///
/// Each message is delivered to exactly one member of the group. A message is
/// acknowledged only after the handler succeeded; otherwise the broker
/// redelivers it once the ack-wait elapses.
pub struct Listener<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    inner: Arc<ListenerInner<T, C, H>>,
}

impl<T, C, H> Clone for Listener<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, C, H> Debug for Listener<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("subject", &self.inner.subject)
            .field("queue_group", &self.inner.queue_group)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T, C, H> Listener<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    /// Starts configuring a listener for `queue_group`.
    pub fn builder(
        connection: Connection<T>,
        queue_group: impl Into<String>,
        handler: H,
    ) -> ListenerBuilder<T, C, H> {
        ListenerBuilder {
            connection,
            dead_letters: None,
            handler,
            observer: None,
            options: ListenerOptions::default(),
            queue_group: queue_group.into(),
            _marker: PhantomData,
        }
    }

    /// Creates a listener with default options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Registry` if `C` is not registered on the connection.
    pub fn new(
        connection: Connection<T>,
        queue_group: impl Into<String>,
        handler: H,
    ) -> Result<Self, Error> {
        Self::builder(connection, queue_group, handler).build()
    }

    /// The subject this listener consumes.
    #[must_use]
    pub fn subject(&self) -> &Subject {
        &self.inner.subject
    }

    /// The queue group this listener is a member of.
    #[must_use]
    pub fn queue_group(&self) -> &str {
        &self.inner.queue_group
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.inner.state.borrow()
    }

    /// Watches state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.inner.state.subscribe()
    }

    /// Joins the queue group and starts processing messages.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyStarted` unless the listener is `Unsubscribed`.
    /// - `Error::Subscription` or `Error::SubscribeTimeout` if joining failed,
    ///   in which case the listener is `Closed`.
    pub async fn start(&self) -> Result<(), Error> {
        let inner = &self.inner;

        let mut task = inner.task.lock().await;

        let started = inner.state.send_if_modified(|state| {
            if *state == ListenerState::Unsubscribed {
                *state = ListenerState::Subscribing;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(Error::AlreadyStarted(self.state()));
        }

        let subscription = match inner.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                inner.state.send_replace(ListenerState::Closed);
                return Err(e);
            }
        };

        inner.state.send_replace(ListenerState::Listening);
        info!(subject = %inner.subject, queue_group = %inner.queue_group, "Listening");

        let span = info_span!("listener", subject = %inner.subject, queue_group = %inner.queue_group);
        *task = Some(tokio::spawn(inner.clone().run(subscription).instrument(span)));

        Ok(())
    }

    /// Stops pulling messages, drains in-flight ones and leaves the group.
    ///
    /// Idempotent. A listener that was never started goes straight to
    /// `Closed`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Task` if the processing task panicked.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.inner.shutdown.cancel();

        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            task.await?;
        } else {
            self.inner.state.send_if_modified(|state| {
                if *state == ListenerState::Unsubscribed {
                    *state = ListenerState::Closed;
                    true
                } else {
                    false
                }
            });
            self.wait().await;
        }

        Ok(())
    }

    /// Waits until the listener is `Closed`.
    pub async fn wait(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| *state == ListenerState::Closed).await;
    }
}

impl<T, C, H> ListenerInner<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    fn spec(&self) -> SubscriptionSpec {
        SubscriptionSpec {
            ack_wait: self.options.ack_wait,
            max_in_flight: self.options.max_in_flight.max(1),
            queue_group: self.queue_group.clone(),
            subject: self.subject.clone(),
        }
    }

    async fn subscribe(&self) -> Result<T::Subscription, Error> {
        self.connection
            .ensure_connected()
            .map_err(|e| Error::Subscription {
                subject: self.subject.clone(),
                queue_group: self.queue_group.clone(),
                source: Box::new(e),
            })?;

        let spec = self.spec();
        let subscribe = self.connection.transport().subscribe(&spec);

        match tokio::time::timeout(self.options.subscribe_timeout, subscribe).await {
            Ok(Ok(subscription)) => Ok(subscription),
            Ok(Err(e)) => Err(Error::Subscription {
                subject: spec.subject,
                queue_group: spec.queue_group,
                source: Box::new(e),
            }),
            Err(_) => Err(Error::SubscribeTimeout {
                subject: spec.subject,
                queue_group: spec.queue_group,
            }),
        }
    }

    // Waits for the connection to come back and joins the group again.
    // Returns `None` once the connection or the listener is shutting down.
    async fn resubscribe(&self) -> Option<T::Subscription> {
        let mut connection_state = self.connection.watch_state();

        loop {
            let state = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return None,
                state = connection_state.wait_for(|state| {
                    matches!(
                        state,
                        ConnectionState::Connected | ConnectionState::Closing | ConnectionState::Closed
                    )
                }) => state.map(|state| *state).ok()?,
            };

            if state != ConnectionState::Connected {
                debug!(connection = %state, "Not resubscribing");
                return None;
            }

            match self.subscribe().await {
                Ok(subscription) => {
                    info!("Resubscribed");
                    return Some(subscription);
                }
                Err(e) => warn!(error = %e, "Failed to resubscribe, retrying"),
            }

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return None,
                () = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    async fn run(self: Arc<Self>, subscription: T::Subscription) {
        let semaphore = Arc::new(Semaphore::new(self.options.max_in_flight.max(1)));
        let mut in_flight = JoinSet::new();
        let mut subscription = Some(subscription);

        loop {
            while let Some(result) = in_flight.try_join_next() {
                log_task_result(result);
            }

            let Some(current) = subscription.as_mut() else {
                break;
            };

            // Taking the permit before pulling keeps unprocessed messages at
            // the broker, where other group members can still get them.
            let permit = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = current.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let inner = self.clone();
                    in_flight.spawn(async move {
                        inner.process(delivery).await;
                        drop(permit);
                    });
                }
                Some(Err(e)) if !e.is_disconnect() => {
                    warn!(error = %e, "Failed to receive message");
                }
                Some(Err(_)) | None => {
                    drop(permit);
                    warn!("Subscription lost, waiting to resubscribe");
                    subscription = self.resubscribe().await;
                }
            }
        }

        self.state.send_replace(ListenerState::Draining);
        info!(in_flight = in_flight.len(), "Draining");

        let drain = async {
            while let Some(result) = in_flight.join_next().await {
                log_task_result(result);
            }
        };
        if tokio::time::timeout(self.options.drain_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                abandoned = in_flight.len(),
                "Drain timed out, leaving messages unacknowledged"
            );
            in_flight.abort_all();
        }

        if let Some(mut subscription) = subscription {
            if let Err(e) = subscription.unsubscribe().await {
                debug!(error = %e, "Failed to unsubscribe");
            }
        }

        self.state.send_replace(ListenerState::Closed);
        info!("Listener closed");
    }

    async fn process(&self, delivery: Delivery) {
        let Delivery { message, token } = delivery;
        let info = message.info();

        let data = match codec::decode_with::<C::Data>(&self.schema, &message.payload) {
            Ok(data) => data,
            Err(source) => {
                let reason = DeadLetterReason::Malformed(source.to_string());
                self.observer.observe(&Error::MalformedMessage {
                    subject: info.subject,
                    sequence: info.sequence,
                    redelivery_count: info.redelivery_count,
                    source,
                });

                if message.redelivery_count >= self.options.max_redeliveries {
                    self.dead_letter(message, token, reason).await;
                } else {
                    // Left pending; the broker redelivers after the ack-wait.
                    drop(token);
                }
                return;
            }
        };

        match self.handler.handle(data, &info).await {
            Ok(()) => self.acknowledge(token).await,
            Err(e) => {
                let reason = DeadLetterReason::HandlerFailed(e.to_string());
                self.observer.observe(&Error::HandlerFailed {
                    subject: info.subject,
                    sequence: info.sequence,
                    redelivery_count: info.redelivery_count,
                    source: Box::new(e),
                });

                if self.options.dead_letter_handler_failures
                    && message.redelivery_count >= self.options.max_redeliveries
                {
                    self.dead_letter(message, token, reason).await;
                } else {
                    drop(token);
                }
            }
        }
    }

    async fn acknowledge(&self, token: AckToken) {
        let sequence = token.sequence();
        if let Err(e) = self.connection.acknowledge(token).await {
            warn!(sequence, error = %e, "Failed to acknowledge message, it will be redelivered");
        }
    }

    async fn dead_letter(&self, message: Message, token: AckToken, reason: DeadLetterReason) {
        let sequence = message.sequence;
        let letter = DeadLetter {
            subject: message.subject,
            sequence,
            payload: message.payload,
            redelivery_count: message.redelivery_count,
            reason,
        };

        match self.dead_letters.dead_letter(letter).await {
            Ok(()) => {
                warn!(sequence, "Message dead-lettered");
                self.acknowledge(token).await;
            }
            Err(e) => {
                error!(sequence, error = %e, "Dead-letter sink failed, leaving message pending");
            }
        }
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Message processing panicked, message left pending");
        }
    }
}

#[async_trait]
impl<T, C, H> Lifecycle for Listener<T, C, H>
where
    T: Transport,
    C: EventContract,
    H: EventHandler<C>,
{
    fn name(&self) -> String {
        format!("listener {} ({})", self.inner.subject, self.inner.queue_group)
    }

    async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Self::start(self).await.map_err(Into::into)
    }

    async fn shutdown(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Self::shutdown(self).await.map_err(Into::into)
    }

    async fn wait(&self) {
        Self::wait(self).await;
    }
}
