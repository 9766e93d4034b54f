// Events module - WHAT THE HOST HEARS
// Inbound message dispatch and local event fan-out

mod bus;
mod dispatcher;

pub use bus::{BridgeEvent, EventBus, SubscriptionId};
pub use dispatcher::EventDispatcher;
