// Protocol module - WHAT NODES SAY
// Message model and the JSON envelope every transport carries

mod message;
mod wire;

pub use message::{Message, MessageId, MessageKind, Payload, ProtocolError};
pub use wire::{decode, encode};
