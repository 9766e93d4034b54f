// Transport module - THE WIRE (abstract)
// Adapter capability, response correlation, and priority-ordered delivery
// over in-process, TCP and scripted transports

mod correlator;
mod memory;
mod mock;
mod router;
mod tcp;
mod traits;

pub use traits::{
    // Core traits
    InboundHandler, TransportAdapter,
    // Errors and statistics
    TransportError, TransportStats,
};

pub use correlator::{Correlator, ResponseListener};
pub use router::{DeliveryError, DeliveryRouter};

pub use memory::{MemoryHub, MemoryTransport};
pub use mock::{CallLog, MockOutcome, MockTransport};
pub use tcp::{TcpServer, TcpTransport, TcpTransportConfig};
