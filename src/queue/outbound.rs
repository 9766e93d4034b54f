// Outbound Queue - Per-peer FIFO of messages that could not be delivered
//
// One queue per peer, so a peer that stays down blocks only its own
// backlog. A drain takes entries from the head in order and stops as soon
// as the peer is known to be unreachable, leaving the rest in place.

use crate::peer::PeerId;
use crate::protocol::{Message, MessageId};
use crate::transport::DeliveryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// A message waiting for its peer to come back
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedMessage {
    pub peer: PeerId,
    pub message: Message,
    pub enqueued_at: DateTime<Utc>,
    /// Failed drain attempts so far
    pub attempts: u32,
}

impl QueuedMessage {
    pub fn new(peer: PeerId, message: Message) -> Self {
        Self {
            peer,
            message,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// What a drain needs from the delivery side
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Deliver one message through every adapter, without queueing on failure
    async fn deliver(&self, peer: PeerId, message: &Message) -> Result<Message, DeliveryError>;

    fn is_reachable(&self, peer: PeerId) -> bool;

    /// Record that delivery to `peer` just failed
    fn mark_unreachable(&self, peer: PeerId);
}

/// Result of one drain pass over a peer's queue
#[derive(Clone, Debug, Default)]
pub struct DrainReport {
    /// Ids delivered, in delivery order
    pub delivered: Vec<MessageId>,
    /// Entries that failed and went back to the tail
    pub requeued: usize,
    /// Entries that ran out of attempts
    pub dropped: Vec<QueuedMessage>,
    /// Entries left in the queue afterwards
    pub remaining: usize,
    /// Another drain for this peer was already running
    pub skipped: bool,
}

// ============================================================================
// OUTBOUND QUEUE
// ============================================================================

/// Undelivered messages, one FIFO per peer
#[derive(Debug)]
pub struct OutboundQueue {
    max_attempts: u32,
    queues: Mutex<HashMap<PeerId, VecDeque<QueuedMessage>>>,
    draining: Mutex<HashSet<PeerId>>,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            queues: Mutex::new(HashMap::new()),
            draining: Mutex::new(HashSet::new()),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, VecDeque<QueuedMessage>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Append `message` to the tail of `peer`'s queue; returns the new length
    pub fn enqueue(&self, peer: PeerId, message: Message) -> usize {
        let mut queues = self.lock();
        let queue = queues.entry(peer).or_default();
        debug!(peer = %peer, message_id = %message.id(), kind = %message.kind(), "Queueing message");
        queue.push_back(QueuedMessage::new(peer, message));
        queue.len()
    }

    pub fn len(&self, peer: PeerId) -> usize {
        self.lock().get(&peer).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, peer: PeerId) -> bool {
        self.len(peer) == 0
    }

    /// Messages waiting across every peer
    pub fn depth(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    /// Copy of `peer`'s queue, head first
    pub fn messages(&self, peer: PeerId) -> Vec<QueuedMessage> {
        self.lock()
            .get(&peer)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages dropped after exhausting their attempts, since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn pop_front(&self, peer: PeerId) -> Option<QueuedMessage> {
        self.lock().get_mut(&peer).and_then(VecDeque::pop_front)
    }

    fn push_back(&self, entry: QueuedMessage) {
        self.lock().entry(entry.peer).or_default().push_back(entry);
    }

    /// Deliver `peer`'s backlog in FIFO order
    ///
    /// Only the entries present at the start are attempted. A failed entry
    /// counts an attempt and goes to the tail, or is dropped once it reaches
    /// the maximum; either way the peer is then marked unreachable and the
    /// drain stops.
    pub async fn drain(&self, peer: PeerId, link: &dyn Deliver) -> DrainReport {
        let Some(_guard) = DrainGuard::acquire(self, peer) else {
            debug!(peer = %peer, "Drain already running");
            return DrainReport {
                skipped: true,
                remaining: self.len(peer),
                ..DrainReport::default()
            };
        };

        let mut report = DrainReport::default();
        let budget = self.len(peer);

        for _ in 0..budget {
            if !link.is_reachable(peer) {
                debug!(peer = %peer, "Peer unreachable, stopping drain");
                break;
            }
            let Some(mut entry) = self.pop_front(peer) else {
                break;
            };

            match link.deliver(peer, &entry.message).await {
                Ok(_) => {
                    debug!(peer = %peer, message_id = %entry.message.id(), "Queued message delivered");
                    report.delivered.push(entry.message.id().clone());
                }
                Err(e) => {
                    entry.attempts += 1;
                    if entry.attempts >= self.max_attempts {
                        warn!(
                            peer = %peer,
                            message_id = %entry.message.id(),
                            attempts = entry.attempts,
                            error = %e,
                            "Dropping message after max attempts"
                        );
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        report.dropped.push(entry);
                    } else {
                        debug!(
                            peer = %peer,
                            message_id = %entry.message.id(),
                            attempts = entry.attempts,
                            "Delivery failed, requeueing at tail"
                        );
                        self.push_back(entry);
                        report.requeued += 1;
                    }
                    link.mark_unreachable(peer);
                }
            }
        }

        report.remaining = self.len(peer);
        if !report.delivered.is_empty() {
            info!(
                peer = %peer,
                delivered = report.delivered.len(),
                remaining = report.remaining,
                "Drained queued messages"
            );
        }
        report
    }
}

struct DrainGuard<'a> {
    queue: &'a OutboundQueue,
    peer: PeerId,
}

impl<'a> DrainGuard<'a> {
    fn acquire(queue: &'a OutboundQueue, peer: PeerId) -> Option<Self> {
        let inserted = queue
            .draining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer);
        inserted.then_some(Self { queue, peer })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.queue
            .draining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.peer);
    }
}
