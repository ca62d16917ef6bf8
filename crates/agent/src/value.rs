//! Host-side values: the recursive tree an application actually works with,
//! as opposed to the tagged-string leaves `rop_wire::value` knows how to
//! encode on their own.
//!
//! Walking this tree into and out of wire JSON requires an `Agent` (to
//! register donated objects, to memoize proxies for received capabilities),
//! so the walk itself (`Agent::encode_value` / `Agent::decode_value`) lives
//! in `agent.rs`; this module only defines the shapes.

use std::fmt;
use std::rc::Rc;

use rop_wire::Kind;

use crate::agent::ProxyHandle;

/// A local object exposed to the peer: registered in `objects` the moment
/// its OID is first donated on the wire, kept alive by refcount until the
/// owning reactive scope drops.
pub enum Exposed {
	/// Invoked with arguments; the result becomes the slot value on every
	/// recompute.
	Function(Box<dyn Fn(&[HostValue]) -> crate::reactive::Evaluation>),
	/// A nullary lazy value backed by a reactive cell.
	Thunk(crate::reactive::Cell),
	/// A non-callable value donated by reference, backed by a reactive cell
	/// so it can still change over the Agent's lifetime.
	Other(crate::reactive::Cell),
	/// A fire-and-forget effect. Receives no arguments (section 4.7: `Perform`
	/// carries only an oid).
	Action(Box<dyn Fn()>),
}

impl fmt::Debug for Exposed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple(match self {
			Exposed::Function(_) => "Exposed::Function",
			Exposed::Thunk(_) => "Exposed::Thunk",
			Exposed::Other(_) => "Exposed::Other",
			Exposed::Action(_) => "Exposed::Action",
		})
		.finish()
	}
}

impl Exposed {
	pub fn kind(&self) -> Kind {
		match self {
			Exposed::Function(_) => Kind::Function,
			Exposed::Thunk(_) => Kind::Thunk,
			Exposed::Other(_) => Kind::Other,
			Exposed::Action(_) => Kind::Action,
		}
	}
}

/// A reference to a capability, either one we're donating (ours) or one the
/// peer donated to us and we've wrapped in a proxy.
#[derive(Clone)]
pub enum CapabilityRef {
	Local(Rc<Exposed>),
	Remote(Rc<ProxyHandle>),
}

impl CapabilityRef {
	pub fn kind(&self) -> Kind {
		match self {
			CapabilityRef::Local(e) => e.kind(),
			CapabilityRef::Remote(p) => p.kind,
		}
	}
}

/// A decoded remote or local `Error`. Unlike the JS runtime, Rust doesn't
/// need a second synthetic wrapper to preserve a stack trace across an
/// await/observe boundary, so a caller-side failure *is* the decoded
/// `HostError`, not an error-wrapping-an-error.
#[derive(Clone)]
pub struct HostError {
	pub message: String,
	pub stack: Option<String>,
	pub cause: Option<Box<HostValue>>,
}

impl fmt::Debug for HostError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HostError")
			.field("message", &self.message)
			.field("stack", &self.stack)
			.field("cause", &self.cause.is_some())
			.finish()
	}
}

impl fmt::Display for HostError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.message)
	}
}

impl std::error::Error for HostError {}

/// The value tree exchanged between host application code and the wire.
#[derive(Clone, Debug)]
pub enum HostValue {
	Null,
	Bool(bool),
	Number(f64),
	String(String),
	Array(Vec<HostValue>),
	Object(Vec<(String, HostValue)>),
	Capability(CapabilityRef),
	Error(Box<HostError>),
	/// A tagged string this version didn't recognize, preserved bit-identical
	/// (section 4.3, section 8 invariant 8 / scenario S6).
	UnValue(String),
}

impl fmt::Debug for CapabilityRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CapabilityRef::Local(e) => f.debug_tuple("Local").field(&e.kind()).finish(),
			CapabilityRef::Remote(p) => f.debug_tuple("Remote").field(&p.kind).field(&p.peer_index).finish(),
		}
	}
}

impl HostValue {
	pub fn str(s: impl Into<String>) -> Self {
		HostValue::String(s.into())
	}

	pub fn num(n: impl Into<f64>) -> Self {
		HostValue::Number(n.into())
	}

	/// Best-effort conversion to plain JSON, dropping any capability
	/// reference it finds (there is no JSON representation for a live
	/// object). Used by example code to print results; not used on the wire
	/// path at all, which goes through `Agent::encode_value`/`decode_value`.
	pub fn to_plain_json(&self) -> serde_json::Value {
		use serde_json::Value as Json;
		match self {
			HostValue::Null => Json::Null,
			HostValue::Bool(b) => Json::from(*b),
			HostValue::Number(n) => serde_json::json!(n),
			HostValue::String(s) => Json::from(s.clone()),
			HostValue::Array(items) => Json::Array(items.iter().map(Self::to_plain_json).collect()),
			HostValue::Object(entries) => entries
				.iter()
				.map(|(k, v)| (k.clone(), v.to_plain_json()))
				.collect(),
			HostValue::Capability(cap) => Json::String(format!("<capability {:?}>", cap.kind())),
			HostValue::Error(err) => serde_json::json!({"message": err.message}),
			HostValue::UnValue(s) => Json::from(s.clone()),
		}
	}
}

impl From<serde_json::Value> for HostValue {
	fn from(v: serde_json::Value) -> Self {
		use serde_json::Value as Json;
		match v {
			Json::Null => HostValue::Null,
			Json::Bool(b) => HostValue::Bool(b),
			Json::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
			Json::String(s) => HostValue::String(s),
			Json::Array(items) => HostValue::Array(items.into_iter().map(HostValue::from).collect()),
			Json::Object(map) => {
				HostValue::Object(map.into_iter().map(|(k, v)| (k, HostValue::from(v))).collect())
			}
		}
	}
}
