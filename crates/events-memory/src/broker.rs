use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use ticketing_events::{ConnectionOptions, Connector, Liveness, Subject};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Error;
use crate::transport::MemoryTransport;

#[derive(Debug)]
pub(crate) struct Pending {
    pub deadline: Instant,
    pub deliveries: u32,
}

/// Durable position of one queue group on one subject.
#[derive(Debug)]
pub(crate) struct ConsumerGroup {
    pub ack_wait: Duration,
    pub cursor: u64,
    pub pending: BTreeMap<u64, Pending>,
}

impl ConsumerGroup {
    const fn new(ack_wait: Duration) -> Self {
        Self {
            ack_wait,
            cursor: 1,
            pending: BTreeMap::new(),
        }
    }

    // Expired pending messages go out before new ones.
    pub fn take_next(&mut self, published: u64, now: Instant) -> Option<(u64, u32)> {
        let expired = self
            .pending
            .iter()
            .find(|(_, pending)| pending.deadline <= now)
            .map(|(sequence, _)| *sequence);

        if let Some(sequence) = expired {
            let pending = self.pending.get_mut(&sequence)?;
            pending.deliveries += 1;
            pending.deadline = now + self.ack_wait;
            return Some((sequence, pending.deliveries - 1));
        }

        if self.cursor <= published {
            let sequence = self.cursor;
            self.cursor += 1;
            self.pending.insert(
                sequence,
                Pending {
                    deadline: now + self.ack_wait,
                    deliveries: 1,
                },
            );
            return Some((sequence, 0));
        }

        None
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }
}

#[derive(Debug)]
pub(crate) struct SubjectLog {
    pub appended: watch::Sender<u64>,
    pub groups: HashMap<String, ConsumerGroup>,
    pub messages: Vec<Bytes>,
}

impl SubjectLog {
    fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            appended,
            groups: HashMap::new(),
            messages: Vec::new(),
        }
    }

    pub fn published(&self) -> u64 {
        self.messages.len() as u64
    }

    pub fn payload(&self, sequence: u64) -> Option<Bytes> {
        let index = usize::try_from(sequence.checked_sub(1)?).ok()?;
        self.messages.get(index).cloned()
    }
}

#[derive(Debug)]
pub(crate) struct BrokerState {
    pub clients: HashMap<String, Arc<watch::Sender<Liveness>>>,
    pub publish_latency: Option<Duration>,
    pub reachable: bool,
    pub subjects: HashMap<Subject, SubjectLog>,
}

impl BrokerState {
    pub fn subject_log(&mut self, subject: &Subject) -> &mut SubjectLog {
        self.subjects
            .entry(subject.clone())
            .or_insert_with(SubjectLog::new)
    }

    pub fn group(&mut self, subject: &Subject, queue_group: &str, ack_wait: Duration) -> &mut ConsumerGroup {
        let group = self
            .subject_log(subject)
            .groups
            .entry(queue_group.to_string())
            .or_insert_with(|| ConsumerGroup::new(ack_wait));
        group.ack_wait = ack_wait;
        group
    }
}

/// An in-process broker shared by every connection created from it.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    pub(crate) state: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty, reachable broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                clients: HashMap::new(),
                publish_latency: None,
                reachable: true,
                subjects: HashMap::new(),
            })),
        }
    }

    /// Makes the broker accept or refuse new sessions and reconnects.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Delays every publish acknowledgment.
    pub fn set_publish_latency(&self, latency: Option<Duration>) {
        self.state.lock().publish_latency = latency;
    }

    /// Drops the session of one client, as a network partition would.
    pub fn disconnect(&self, client_id: &str) {
        if let Some(liveness) = self.state.lock().clients.get(client_id) {
            liveness.send_if_modified(|liveness| {
                if *liveness == Liveness::Connected {
                    *liveness = Liveness::Disconnected;
                    true
                } else {
                    false
                }
            });
        }
        info!(client_id, "Dropped client session");
    }

    /// Drops every live session.
    pub fn disconnect_all(&self) {
        let client_ids: Vec<String> = self.state.lock().clients.keys().cloned().collect();
        for client_id in client_ids {
            self.disconnect(&client_id);
        }
    }

    /// Number of messages stored on a subject.
    #[must_use]
    pub fn published(&self, subject: &str) -> u64 {
        self.state
            .lock()
            .subjects
            .get(subject)
            .map_or(0, SubjectLog::published)
    }

    /// Number of messages delivered to a group but not yet acknowledged.
    #[must_use]
    pub fn pending(&self, subject: &str, queue_group: &str) -> usize {
        self.state
            .lock()
            .subjects
            .get(subject)
            .and_then(|log| log.groups.get(queue_group))
            .map_or(0, |group| group.pending.len())
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    type Transport = MemoryTransport;

    async fn connect(&self, options: &ConnectionOptions) -> Result<MemoryTransport, Error> {
        let mut state = self.state.lock();

        if !state.reachable {
            return Err(Error::Unreachable);
        }

        if let Some(existing) = state.clients.get(&options.client_id) {
            if *existing.borrow() != Liveness::Closed {
                return Err(Error::DuplicateClientId(options.client_id.clone()));
            }
        }

        let (liveness, _) = watch::channel(Liveness::Connected);
        let liveness = Arc::new(liveness);
        state
            .clients
            .insert(options.client_id.clone(), liveness.clone());

        debug!(client_id = %options.client_id, cluster_id = %options.cluster_id, "Client connected");

        Ok(MemoryTransport::new(
            self.clone(),
            options.client_id.clone(),
            liveness,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_delivers_new_messages_in_order() {
        let mut group = ConsumerGroup::new(Duration::from_secs(30));
        let now = Instant::now();

        assert_eq!(group.take_next(2, now), Some((1, 0)));
        assert_eq!(group.take_next(2, now), Some((2, 0)));
        assert_eq!(group.take_next(2, now), None);
        assert_eq!(group.pending.len(), 2);
    }

    #[test]
    fn test_group_redelivers_expired_before_new() {
        let mut group = ConsumerGroup::new(Duration::from_millis(10));
        let now = Instant::now();

        assert_eq!(group.take_next(1, now), Some((1, 0)));

        let later = now + Duration::from_millis(20);
        assert_eq!(group.take_next(2, later), Some((1, 1)));
        assert_eq!(group.take_next(2, later), Some((2, 0)));

        let much_later = later + Duration::from_millis(20);
        assert_eq!(group.take_next(2, much_later), Some((1, 2)));
    }

    #[test]
    fn test_payload_lookup_by_sequence() {
        let mut log = SubjectLog::new();
        log.messages.push(Bytes::from_static(b"first"));

        assert_eq!(log.payload(1), Some(Bytes::from_static(b"first")));
        assert_eq!(log.payload(0), None);
        assert_eq!(log.payload(2), None);
    }
}
