//! Error types. `ProtocolError` covers violations of the message-level
//! contract (section 7: "any handler may reject a message... the connection
//! is closed"); `AgentError` wraps it alongside transport and (de)serialization
//! failures for the surface the engine's async driver reports.

use rop_wire::{DecodeError, Slot};

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
	#[error("Start on slot {0:?} that is already active")]
	SlotAlreadyActive(Slot),
	#[error("message referenced unknown local object index {0}")]
	UnknownLocalObject(usize),
	#[error("Start targeted object {0} which is not a Function, Thunk, or Other")]
	NotObservable(usize),
	#[error("Perform targeted object {0} which is not an Action")]
	NotAnAction(usize),
	#[error("Result/End referenced unknown slot {0:?}")]
	UnknownSlot(Slot),
	#[error("peer closed with Error({0:?})")]
	PeerFatal(String),
}

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	#[error("malformed message: {0}")]
	Serialization(#[from] DecodeError),
	#[error("transport error: {0}")]
	Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}
