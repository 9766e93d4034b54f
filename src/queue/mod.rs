// Queue module - WHAT WAITS
// Store-and-forward backlog for peers that cannot be reached right now

mod outbound;

pub use outbound::{Deliver, DrainReport, OutboundQueue, QueuedMessage};
