// Response Correlator - Matches inbound responses to waiting requests
//
// A listener is registered under the request id before the request leaves.
// Any response carrying that id completes the listener, whichever path it
// arrives on. Messages nobody waits for are handed back to the caller.

use crate::protocol::{Message, MessageId};
use crate::transport::TransportError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;

struct Pending {
    token: u64,
    sender: oneshot::Sender<Message>,
}

/// Table of requests awaiting a response
#[derive(Default)]
pub struct Correlator {
    next_token: AtomicU64,
    pending: Mutex<HashMap<MessageId, Pending>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageId, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start waiting for a response to `id`
    ///
    /// A second listener for the same id replaces the first, which then
    /// observes its sender closing.
    pub fn listen(&self, id: MessageId) -> ResponseListener<'_> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(id.clone(), Pending { token, sender });
        ResponseListener {
            correlator: self,
            id,
            token,
            receiver,
        }
    }

    /// Offer an inbound message to the waiting listeners
    ///
    /// Returns `None` when a listener took it, otherwise hands the message
    /// back so it can be dispatched.
    pub fn accept(&self, message: Message) -> Option<Message> {
        if !message.kind().is_response() {
            return Some(message);
        }

        let pending = self.lock().remove(message.id());
        match pending {
            Some(pending) => match pending.sender.send(message) {
                Ok(()) => None,
                // listener dropped between lookup and send
                Err(message) => Some(message),
            },
            None => Some(message),
        }
    }

    /// Number of requests still waiting
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, id: &MessageId, token: u64) {
        let mut pending = self.lock();
        if pending.get(id).map(|p| p.token == token).unwrap_or(false) {
            pending.remove(id);
        }
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// One outstanding request; deregisters itself when dropped
pub struct ResponseListener<'a> {
    correlator: &'a Correlator,
    id: MessageId,
    token: u64,
    receiver: oneshot::Receiver<Message>,
}

impl ResponseListener<'_> {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Wait for the response
    ///
    /// Fails with `Uncorrelated` if a newer listener for the same id took over.
    pub async fn wait(&mut self) -> Result<Message, TransportError> {
        (&mut self.receiver)
            .await
            .map_err(|_| TransportError::Uncorrelated(self.id.clone()))
    }

    /// Wait for the response until `deadline`
    pub async fn wait_until(&mut self, deadline: Instant) -> Result<Message, TransportError> {
        tokio::time::timeout_at(deadline, self.wait())
            .await
            .map_err(|_| TransportError::Timeout)?
    }
}

impl Drop for ResponseListener<'_> {
    fn drop(&mut self) {
        self.correlator.release(&self.id, self.token);
    }
}
