// Event Dispatcher - Applies inbound messages to the local store
//
// Each handler is idempotent: the same message may arrive more than once
// (a timed-out attempt can still land remotely, then be retried).

use crate::events::bus::{BridgeEvent, EventBus};
use crate::ledger::LedgerHooks;
use crate::peer::PeerId;
use crate::protocol::{decode, Message, Payload, ProtocolError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Routes inbound messages to collaborator hooks and local subscribers
pub struct EventDispatcher {
    local: PeerId,
    hooks: Arc<dyn LedgerHooks>,
    events: Arc<EventBus>,
}

impl EventDispatcher {
    pub fn new(local: PeerId, hooks: Arc<dyn LedgerHooks>, events: Arc<EventBus>) -> Self {
        Self {
            local,
            hooks,
            events,
        }
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Decode and dispatch a raw envelope
    ///
    /// Undecodable envelopes, unknown kinds included, are logged and dropped.
    pub fn dispatch_bytes(&self, bytes: &[u8]) -> Option<Message> {
        match decode(bytes) {
            Ok(message) => self.dispatch(message),
            Err(ProtocolError::UnknownKind(kind)) => {
                warn!(node = %self.local, kind = %kind, "Ignoring message of unknown kind");
                None
            }
            Err(e) => {
                warn!(node = %self.local, error = %e, "Dropping undecodable message");
                None
            }
        }
    }

    /// Apply one inbound message; returns the reply to send back, if any
    pub fn dispatch(&self, message: Message) -> Option<Message> {
        if message.target() != self.local {
            warn!(
                node = %self.local,
                target = %message.target(),
                message_id = %message.id(),
                "Ignoring message addressed to another node"
            );
            return None;
        }

        debug!(
            node = %self.local,
            from = %message.source(),
            kind = %message.kind(),
            message_id = %message.id(),
            "Dispatching inbound message"
        );

        let from = message.source();
        match message.payload() {
            Payload::Sync(_) => self.handle_sync(&message),
            Payload::Ping => Some(message.reply(Payload::Pong)),
            Payload::Transaction(tx) => match self.hooks.apply_transaction(tx) {
                Ok(report) => {
                    info!(node = %self.local, from = %from, tx = %tx.id, inserted = report.inserted, "Transaction received");
                    self.events.publish(&BridgeEvent::TransactionReceived {
                        from,
                        transaction: tx.clone(),
                    });
                    Some(message.reply(Payload::Ack))
                }
                Err(e) => {
                    error!(node = %self.local, tx = %tx.id, error = %e, "Failed to store transaction");
                    None
                }
            },
            Payload::BalanceUpdate(update) => match self.hooks.apply_balance_update(update) {
                Ok(true) => {
                    info!(node = %self.local, from = %from, user = %update.username, "Balance updated");
                    self.events.publish(&BridgeEvent::BalanceUpdated {
                        from,
                        update: update.clone(),
                    });
                    Some(message.reply(Payload::Ack))
                }
                Ok(false) => {
                    debug!(node = %self.local, user = %update.username, "Balance update for unknown account");
                    Some(message.reply(Payload::Ack))
                }
                Err(e) => {
                    error!(node = %self.local, user = %update.username, error = %e, "Failed to apply balance update");
                    None
                }
            },
            Payload::UserUpdate(user) => match self.hooks.apply_user_update(user) {
                Ok(_) => {
                    info!(node = %self.local, from = %from, user = %user.username, "User updated");
                    self.events.publish(&BridgeEvent::UserUpdated {
                        from,
                        user: user.clone(),
                    });
                    Some(message.reply(Payload::Ack))
                }
                Err(e) => {
                    error!(node = %self.local, user = %user.username, error = %e, "Failed to apply user update");
                    None
                }
            },
            Payload::SyncResponse(_) | Payload::Pong | Payload::Ack => {
                debug!(
                    node = %self.local,
                    kind = %message.kind(),
                    message_id = %message.id(),
                    "No listener for response, ignoring"
                );
                None
            }
        }
    }

    fn handle_sync(&self, request: &Message) -> Option<Message> {
        match self.hooks.local_snapshot() {
            Ok(snapshot) => {
                debug!(
                    node = %self.local,
                    from = %request.source(),
                    records = snapshot.record_count(),
                    "Answering sync request"
                );
                Some(request.reply(Payload::SyncResponse(snapshot)))
            }
            Err(e) => {
                error!(node = %self.local, error = %e, "Cannot export snapshot for sync");
                None
            }
        }
    }
}
