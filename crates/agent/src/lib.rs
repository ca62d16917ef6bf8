//! `rop-agent`: the protocol engine each peer runs.
//!
//! Both ends of a connection run the same `Agent`; there is no client/server
//! split in this protocol (section 1), only a pair of symmetric peers each
//! with their own `objects`, `proxyOIDs`, `updaters` and `observers` tables
//! (section 4.1). `rop_wire` supplies the inert wire types this crate builds
//! the live engine on top of.

mod agent;
mod error;
mod inbound;
mod outbound;
pub mod reactive;
pub mod transport;
pub mod value;

pub use agent::{Agent, Observation, ProxyHandle, TransportState};
pub use error::{AgentError, ProtocolError};
pub use reactive::{Cell, Evaluation};
pub use transport::Transport;
pub use value::{CapabilityRef, Exposed, HostError, HostValue};
