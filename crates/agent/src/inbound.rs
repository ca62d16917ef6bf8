//! Handling for messages the peer sends about objects *we* own: `Start`
//! opens an updater, `Perform` invokes an Action once, `End` tears an
//! updater down (section 4.5, 4.7).

use rop_wire::{Kind, Slot, WireOid};

use crate::agent::{Agent, UpdaterEntry};
use crate::error::ProtocolError;
use crate::reactive::{Cell, Evaluation};
use crate::value::{Exposed, HostValue};

pub(crate) fn handle_start(
	agent: &Agent,
	slot: Slot,
	oid: WireOid,
	args: Vec<serde_json::Value>,
) -> Result<(), ProtocolError> {
	if agent.0.updaters.borrow().contains_key(&slot) {
		return Err(ProtocolError::SlotAlreadyActive(slot));
	}

	let index = match oid.interpret() {
		rop_wire::Ownership::Local(index) => index,
		// A peer-owned oid on a Start makes no protocol sense (Start always
		// targets an object the *sender* is observing, i.e. one owned by us
		// from the sender's perspective it must be non-negative).
		rop_wire::Ownership::Peer(_) => return Err(ProtocolError::UnknownLocalObject(0)),
	};
	let exposed = agent
		.0
		.objects
		.borrow()
		.get(index)
		.cloned()
		.ok_or(ProtocolError::UnknownLocalObject(index))?;
	if matches!(exposed.kind(), Kind::Action) {
		return Err(ProtocolError::NotObservable(index));
	}

	let decoded_args = args
		.iter()
		.map(|v| agent.decode_value(v))
		.collect::<Result<Vec<_>, _>>()?;

	let agent_for_on_change = agent.clone();
	let recompute = move || -> Evaluation {
		match &*exposed {
			Exposed::Function(f) => f(&decoded_args),
			Exposed::Thunk(cell) => cell.get(),
			Exposed::Other(cell) => cell.get(),
			Exposed::Action(_) => unreachable!("checked above"),
		}
	};
	let on_change = move |eval: &Evaluation| emit_result(&agent_for_on_change, slot, eval);

	let cell = Cell::computed(recompute, on_change);
	agent.0.updaters.borrow_mut().insert(
		slot,
		UpdaterEntry {
			cell,
			donations: std::cell::RefCell::new(Vec::new()),
		},
	);
	Ok(())
}

fn emit_result(agent: &Agent, slot: Slot, eval: &Evaluation) {
	let value = match eval {
		Evaluation::Ready(v) | Evaluation::Pending(v) => v.clone(),
		Evaluation::Err(e) => HostValue::Error(Box::new(e.clone())),
	};
	let mut donations = Vec::new();
	let encoded = agent.encode_value(&value, &mut donations);

	let updaters = agent.0.updaters.borrow();
	let Some(entry) = updaters.get(&slot) else {
		return;
	};
	let old = std::mem::replace(&mut *entry.donations.borrow_mut(), donations);
	drop(updaters);
	{
		let mut objects = agent.0.objects.borrow_mut();
		for index in old {
			objects.dereg(index);
		}
	}

	agent.send(rop_wire::Message::Result {
		slot,
		cond: eval.cond(),
		value: encoded,
	});
}

pub(crate) fn handle_end(agent: &Agent, slot: Slot) -> Result<(), ProtocolError> {
	let entry = agent
		.0
		.updaters
		.borrow_mut()
		.remove(&slot)
		.ok_or(ProtocolError::UnknownSlot(slot))?;
	entry.cell.deactivate();
	let mut objects = agent.0.objects.borrow_mut();
	for index in entry.donations.into_inner() {
		objects.dereg(index);
	}
	drop(objects);
	agent.send(rop_wire::Message::AckEnd { slot });
	Ok(())
}

pub(crate) fn handle_perform(agent: &Agent, oid: WireOid) -> Result<(), ProtocolError> {
	let index = match oid.interpret() {
		rop_wire::Ownership::Local(index) => index,
		rop_wire::Ownership::Peer(_) => return Err(ProtocolError::UnknownLocalObject(0)),
	};
	let exposed = agent
		.0
		.objects
		.borrow()
		.get(index)
		.cloned()
		.ok_or(ProtocolError::UnknownLocalObject(index))?;
	match &*exposed {
		Exposed::Action(f) => {
			f();
			Ok(())
		}
		_ => Err(ProtocolError::NotAnAction(index)),
	}
}
