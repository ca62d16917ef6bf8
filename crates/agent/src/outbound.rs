//! Handling for messages the peer sends about objects *it* owns, i.e.
//! replies to observations we opened (section 4.6), plus the call-site API
//! (`ProxyHandle::call`/`perform`) applications use to open those
//! observations in the first place.

use std::rc::Rc;

use rop_wire::{Cond, Slot};

use crate::agent::{Agent, Observation, ObserverLookup, ProxyHandle};
use crate::error::ProtocolError;
use crate::reactive::Evaluation;
use crate::value::HostValue;

pub(crate) fn handle_result(
	agent: &Agent,
	slot: Slot,
	cond: Cond,
	value: serde_json::Value,
) -> Result<(), ProtocolError> {
	// A Result for a slot we've already zombified (End sent, AckEnd not yet
	// back) is expected and silently absorbed, but still acknowledged
	// (section 4.7). A Result for a slot that was never allocated or has
	// already been freed is the "any other unexpected observer state"
	// case of section 3 invariant 6: fatal.
	let cell = match agent.observer_lookup(slot) {
		ObserverLookup::Live(cell) => cell,
		ObserverLookup::Zombie => {
			agent.send(rop_wire::Message::AckResult { slot });
			return Ok(());
		}
		ObserverLookup::Absent => return Err(ProtocolError::UnknownSlot(slot)),
	};
	let decoded = agent.decode_value(&value)?;
	let eval = match cond {
		Cond::Success => Evaluation::Ready(decoded),
		Cond::Pending => Evaluation::Pending(decoded),
		Cond::Error => match decoded {
			HostValue::Error(e) => Evaluation::Err(*e),
			other => Evaluation::Err(crate::value::HostError {
				message: "peer sent a non-Error value with cond=Error".to_owned(),
				stack: None,
				cause: Some(Box::new(other)),
			}),
		},
	};
	cell.set(eval);
	agent.send(rop_wire::Message::AckResult { slot });
	Ok(())
}

pub(crate) fn handle_ack_end(agent: &Agent, slot: Slot) -> Result<(), ProtocolError> {
	agent.retire_observer_slot(slot);
	Ok(())
}

impl ProxyHandle {
	/// Opens (or reuses a live, memoized) observation of this Function,
	/// Thunk, or Other capability. Memoization is keyed on the peer index
	/// plus a structural key of the arguments, matching section 4.6's "the
	/// same (oid, args) observed twice while still live shares one slot".
	pub fn call(self: &Rc<Self>, args: Vec<HostValue>) -> Rc<Observation> {
		let agent = self.agent();
		let agent = Agent(agent);
		let key = args_key(&args);
		agent.observe_memoized(self.peer_index, args, key)
	}

	/// Performs an Action: fire-and-forget, no slot, no reply (section 4.7).
	pub fn perform(&self) {
		let agent = Agent(self.agent());
		agent.send(rop_wire::Message::Perform {
			oid: rop_wire::WireOid::refer(self.peer_index),
		});
	}
}

fn args_key(args: &[HostValue]) -> String {
	// A structural key good enough to distinguish call sites for
	// memoization; doesn't need to be a faithful reconstruction of `args`.
	fn push(buf: &mut String, v: &HostValue) {
		match v {
			HostValue::Null => buf.push('n'),
			HostValue::Bool(b) => buf.push_str(if *b { "t" } else { "f" }),
			HostValue::Number(n) => buf.push_str(&n.to_string()),
			HostValue::String(s) => {
				buf.push('"');
				buf.push_str(s);
				buf.push('"');
			}
			HostValue::Array(items) => {
				buf.push('[');
				for item in items {
					push(buf, item);
					buf.push(',');
				}
				buf.push(']');
			}
			HostValue::Object(entries) => {
				buf.push('{');
				for (k, val) in entries {
					buf.push_str(k);
					buf.push(':');
					push(buf, val);
					buf.push(',');
				}
				buf.push('}');
			}
			HostValue::Capability(cap) => match cap {
				crate::value::CapabilityRef::Local(e) => {
					buf.push_str("local@");
					buf.push_str(&format!("{:p}", Rc::as_ptr(e)));
				}
				crate::value::CapabilityRef::Remote(p) => {
					buf.push_str(&format!("remote@{}:{:?}", p.peer_index, p.kind));
				}
			},
			HostValue::Error(e) => buf.push_str(&format!("err:{}", e.message)),
			HostValue::UnValue(s) => buf.push_str(&format!("un:{s}")),
		}
	}
	let mut buf = String::new();
	for a in args {
		push(&mut buf, a);
		buf.push(';');
	}
	buf
}
