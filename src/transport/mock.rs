// Mock Transport - Scripted adapter for tests and demos
//
// Each call pops the next scripted outcome; once the script runs out the
// default outcome applies. Calls are counted and recorded on an optional
// shared call log, so tests can check the order adapters were tried in.

use crate::peer::PeerId;
use crate::protocol::{Message, MessageId, Payload};
use crate::transport::{TransportAdapter, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// What the mock does for one call
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    /// Reply with this payload under the request's id
    Respond(Payload),
    /// Reply with the kind the real dispatcher would use (Pong, Ack, ...)
    AutoRespond,
    /// Fail the attempt
    Fail(TransportError),
    /// Never answer; the router's timeout ends the attempt
    Hang,
    /// Wait, then behave like `AutoRespond`
    Delay(Duration),
    /// Reply under a different id
    WrongId(Payload),
}

/// Shared record of `(adapter name, message id)` in call order
pub type CallLog = Arc<Mutex<Vec<(String, MessageId)>>>;

/// Scripted adapter
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    script: Mutex<VecDeque<MockOutcome>>,
    default: Mutex<MockOutcome>,
    calls: AtomicUsize,
    sent: Mutex<Vec<Message>>,
    log: Option<CallLog>,
}

impl MockTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(MockOutcome::AutoRespond),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            log: None,
        }
    }

    /// Adapter whose every attempt fails
    pub fn failing(name: &str) -> Self {
        Self::new(name).with_default(MockOutcome::Fail(TransportError::ConnectionFailed(
            "scripted failure".to_string(),
        )))
    }

    pub fn with_default(self, outcome: MockOutcome) -> Self {
        *lock(&self.default) = outcome;
        self
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        lock(&self.script).extend(outcomes);
        self
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Outcome for every call after the script runs out
    pub fn set_default(&self, outcome: MockOutcome) {
        *lock(&self.default) = outcome;
    }

    pub fn push_outcome(&self, outcome: MockOutcome) {
        lock(&self.script).push_back(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages handed to this adapter, in call order
    pub fn sent(&self) -> Vec<Message> {
        lock(&self.sent).clone()
    }

    fn next_outcome(&self) -> MockOutcome {
        let scripted = lock(&self.script).pop_front();
        scripted.unwrap_or_else(|| lock(&self.default).clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The payload a well-behaved remote dispatcher answers `message` with
fn natural_reply(message: &Message) -> Message {
    let payload = match message.payload() {
        Payload::Sync(_) => Payload::SyncResponse(Default::default()),
        Payload::Ping => Payload::Pong,
        _ => Payload::Ack,
    };
    message.reply(payload)
}

#[async_trait]
impl TransportAdapter for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_send(
        &self,
        _peer: PeerId,
        message: &Message,
        _timeout: Duration,
    ) -> Result<Message, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.sent).push(message.clone());
        if let Some(log) = &self.log {
            lock(log).push((self.name.clone(), message.id().clone()));
        }

        match self.next_outcome() {
            MockOutcome::Respond(payload) => Ok(message.reply(payload)),
            MockOutcome::AutoRespond => Ok(natural_reply(message)),
            MockOutcome::Fail(e) => Err(e),
            MockOutcome::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Timeout)
            }
            MockOutcome::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(natural_reply(message))
            }
            MockOutcome::WrongId(payload) => {
                let other = Message::new(message.source(), message.target(), Payload::Ping);
                Ok(other.reply(payload))
            }
        }
    }
}
