//! The Agent: the symmetric protocol engine each peer runs. One `Agent`
//! drives exactly one transport connection and owns every table section 4
//! names — `objects`, `proxyOIDs` (here `proxies`), `updaters`, `observers`
//! — plus the declared primordial sets.
//!
//! Message handling (`dispatch`) is entirely synchronous: every handler runs
//! to completion before the next message is looked at, matching section 5's
//! "a single handler runs to completion atomically" rule. Only the transport
//! pump (`Agent::run`) is async, since reading/writing frames is the only
//! part of this engine that actually waits on I/O.

use std::cell::{Cell as StdCell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use tokio::sync::Notify;
use tracing::{debug, instrument, trace};

use rop_wire::{Kind, Message, ObjTable, Slot, Table};

use crate::error::{AgentError, ProtocolError};
use crate::reactive::{Cell, Evaluation};
use crate::value::{CapabilityRef, Exposed, HostValue};

/// Whether the transport backing this agent can currently accept writes.
/// Mirrors section 5's "CONNECTING / OPEN / else" send discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
	Connecting,
	Open,
	Closing,
	Closed,
}

/// A proxy for an object the peer owns. Memoized on `(peer_index, kind)` for
/// the lifetime of the Agent (section 8 invariant 4).
pub struct ProxyHandle {
	pub kind: Kind,
	pub peer_index: usize,
	agent: Weak<AgentInner>,
}

impl ProxyHandle {
	pub(crate) fn agent(&self) -> Rc<AgentInner> {
		self.agent.upgrade().expect("agent outlives its proxies")
	}
}

/// An outstanding outbound observation: the handle an application holds
/// after calling `Agent::observe`/`ProxyHandle::call`. Dropping the last
/// clone ends the observation (sends `End`) — the RAII analogue of "the
/// reactive scope that opened the observation drops" (section 4.6).
pub struct Observation {
	agent: Weak<AgentInner>,
	slot: Slot,
	cell: Cell,
	memo_key: (usize, String),
}

impl Observation {
	pub fn get(&self) -> Evaluation {
		self.cell.get()
	}
}

impl Drop for Observation {
	fn drop(&mut self) {
		if let Some(agent) = self.agent.upgrade() {
			Agent(agent).end_observation(self.slot, &self.memo_key);
		}
	}
}

enum ObserverEntry {
	Live { cell: Cell, donations: RefCell<Vec<usize>> },
	/// Our `End` was sent but the peer's `AckEnd` hasn't arrived; any
	/// further `Result` for this slot is absorbed silently (section 4.8).
	Zombie,
}

/// The outcome of looking up an outbound slot, per section 4.7/8 invariant 6.
pub(crate) enum ObserverLookup {
	Live(Cell),
	Zombie,
	/// Never allocated, or already freed after `AckEnd` — not a valid target
	/// for a `Result`.
	Absent,
}

pub(crate) struct UpdaterEntry {
	pub(crate) cell: Cell,
	pub(crate) donations: RefCell<Vec<usize>>,
}

pub(crate) struct AgentInner {
	pub(crate) objects: RefCell<ObjTable<Rc<Exposed>>>,
	pub(crate) updaters: RefCell<HashMap<Slot, UpdaterEntry>>,
	observers: RefCell<Table<ObserverEntry>>,
	proxies: RefCell<HashMap<(usize, Kind), Rc<ProxyHandle>>>,
	observe_memo: RefCell<HashMap<(usize, String), Weak<Observation>>>,
	remotes: RefCell<HashMap<String, Rc<ProxyHandle>>>,
	outbox: RefCell<VecDeque<Message>>,
	notify: Notify,
	transport_state: StdCell<TransportState>,
	shutdown: RefCell<Option<String>>,
}

/// A cheaply-cloned handle to an Agent. All state lives behind the inner
/// `Rc`, so clones share one protocol engine.
#[derive(Clone)]
pub struct Agent(pub(crate) Rc<AgentInner>);

impl Agent {
	/// Builds an Agent and declares its primordials (section 4.4): `locals`
	/// become `objects[0..]` in order, `remotes` become proxies memoized at
	/// peer indices `0..` in order. Both sides of a connection must declare
	/// the same `remotes`/`locals` shapes (mirrored) for OIDs to line up.
	pub fn new(locals: Vec<(&str, Exposed)>, remote_decls: Vec<(&str, Kind)>) -> Self {
		let inner = Rc::new(AgentInner {
			objects: RefCell::new(ObjTable::new()),
			updaters: RefCell::new(HashMap::new()),
			observers: RefCell::new(Table::new()),
			proxies: RefCell::new(HashMap::new()),
			observe_memo: RefCell::new(HashMap::new()),
			remotes: RefCell::new(HashMap::new()),
			outbox: RefCell::new(VecDeque::new()),
			notify: Notify::new(),
			transport_state: StdCell::new(TransportState::Connecting),
			shutdown: RefCell::new(None),
		});

		{
			let mut objects = inner.objects.borrow_mut();
			for (_name, exposed) in locals {
				objects.reg(Rc::new(exposed));
			}
		}

		let agent = Agent(inner);
		for (index, (name, kind)) in remote_decls.into_iter().enumerate() {
			let proxy = agent.get_or_create_proxy(index, kind);
			agent.0.remotes.borrow_mut().insert(name.to_owned(), proxy);
		}
		agent
	}

	pub fn remote(&self, name: &str) -> Option<Rc<ProxyHandle>> {
		self.0.remotes.borrow().get(name).cloned()
	}

	pub(crate) fn get_or_create_proxy(&self, peer_index: usize, kind: Kind) -> Rc<ProxyHandle> {
		let mut proxies = self.0.proxies.borrow_mut();
		proxies
			.entry((peer_index, kind))
			.or_insert_with(|| {
				Rc::new(ProxyHandle {
					kind,
					peer_index,
					agent: Rc::downgrade(&self.0),
				})
			})
			.clone()
	}

	/// Enqueues a message per section 5's send discipline: buffered until
	/// the transport is open, dropped (and the connection torn down) once
	/// it's closing or closed.
	pub(crate) fn send(&self, msg: Message) {
		match self.0.transport_state.get() {
			TransportState::Closing | TransportState::Closed => {
				self.shutdown("send attempted after transport closed".to_owned());
			}
			TransportState::Connecting | TransportState::Open => {
				self.0.outbox.borrow_mut().push_back(msg);
				self.0.notify.notify_one();
			}
		}
	}

	fn shutdown(&self, reason: String) {
		self.0.shutdown.borrow_mut().get_or_insert(reason);
	}

	pub(crate) fn fatal(&self, err: &ProtocolError) {
		self.send(Message::Error { name: err.to_string() });
		self.shutdown(err.to_string());
	}

	/// Drains and JSON-encodes everything queued since the last flush.
	fn drain_outbox(&self) -> Vec<Message> {
		self.0.outbox.borrow_mut().drain(..).collect()
	}

	/// Synchronously applies one inbound message. Exposed directly so tests
	/// can drive the protocol without an async transport.
	#[instrument(skip(self, msg), fields(kind = message_kind(&msg)))]
	pub fn dispatch(&self, msg: Message) -> Result<(), AgentError> {
		let result = match msg {
			Message::Start { slot, oid, args } => crate::inbound::handle_start(self, slot, oid, args),
			Message::End { slot } => crate::inbound::handle_end(self, slot),
			Message::Result { slot, cond, value } => crate::outbound::handle_result(self, slot, cond, value),
			Message::AckEnd { slot } => crate::outbound::handle_ack_end(self, slot),
			Message::AckResult { slot } => {
				trace!(?slot, "AckResult received, no-op");
				Ok(())
			}
			Message::Perform { oid } => crate::inbound::handle_perform(self, oid),
			Message::Error { name } => Err(ProtocolError::PeerFatal(name)),
		};
		if let Err(ref err) = result {
			debug!(%err, "dispatch failed, marking connection fatal");
			self.fatal(err);
		}
		result.map_err(AgentError::from)
	}

	pub fn handle_text(&self, text: &str) -> Result<(), AgentError> {
		let msg = Message::from_text(text)?;
		self.dispatch(msg)
	}

	/// Runs the transport pump: flushes the outbox, then alternates between
	/// waiting for the next inbound frame and waking up whenever `send`
	/// enqueues something new, until the peer closes or a fatal error marks
	/// the connection for shutdown.
	pub async fn run<T: crate::transport::Transport>(&self, mut transport: T) -> Result<(), AgentError> {
		self.0.transport_state.set(TransportState::Open);
		self.flush(&mut transport).await?;
		loop {
			if self.0.shutdown.borrow().is_some() {
				break;
			}
			tokio::select! {
				biased;
				_ = self.0.notify.notified() => {}
				frame = transport.recv() => {
					match frame {
						Some(Ok(text)) => {
							if let Err(err) = self.handle_text(&text) {
								self.flush(&mut transport).await?;
								self.0.transport_state.set(TransportState::Closed);
								return Err(err);
							}
						}
						Some(Err(err)) => {
							self.0.transport_state.set(TransportState::Closed);
							return Err(AgentError::Transport(err));
						}
						None => {
							self.0.transport_state.set(TransportState::Closed);
							return Ok(());
						}
					}
				}
			}
			self.flush(&mut transport).await?;
		}
		self.flush(&mut transport).await?;
		self.0.transport_state.set(TransportState::Closed);
		Ok(())
	}

	async fn flush(&self, transport: &mut impl crate::transport::Transport) -> Result<(), AgentError> {
		for msg in self.drain_outbox() {
			transport.send(msg.to_text()).await.map_err(AgentError::Transport)?;
		}
		Ok(())
	}

	// --- value codec (section 4.3) -----------------------------------

	pub(crate) fn encode_value(&self, value: &HostValue, donations: &mut Vec<usize>) -> serde_json::Value {
		use serde_json::Value as Json;
		match value {
			HostValue::Null => Json::Null,
			HostValue::Bool(b) => Json::from(*b),
			HostValue::Number(n) => serde_json::json!(n),
			HostValue::String(s) => Json::from(rop_wire::value::encode_literal(s)),
			HostValue::Array(items) => {
				Json::Array(items.iter().map(|v| self.encode_value(v, donations)).collect())
			}
			HostValue::Object(entries) => entries
				.iter()
				.map(|(k, v)| (k.clone(), self.encode_value(v, donations)))
				.collect(),
			HostValue::Capability(cap) => {
				let (kind, oid) = match cap {
					CapabilityRef::Remote(proxy) => (proxy.kind, rop_wire::WireOid::refer(proxy.peer_index)),
					CapabilityRef::Local(exposed) => {
						let index = self.0.objects.borrow_mut().reg(exposed.clone());
						donations.push(index);
						(exposed.kind(), rop_wire::WireOid::donate(index))
					}
				};
				Json::from(rop_wire::value::encode_capability(kind, oid))
			}
			HostValue::Error(err) => {
				let packed = rop_wire::PackedError {
					message: err.message.clone(),
					stack: err.stack.clone(),
					cause: err
						.cause
						.as_ref()
						.map(|c| Box::new(self.encode_value(c, donations))),
				};
				Json::from(rop_wire::value::encode_error(&packed))
			}
			HostValue::UnValue(s) => Json::from(s.clone()),
		}
	}

	pub(crate) fn decode_value(&self, json: &serde_json::Value) -> Result<HostValue, ProtocolError> {
		use serde_json::Value as Json;
		Ok(match json {
			Json::Null => HostValue::Null,
			Json::Bool(b) => HostValue::Bool(*b),
			Json::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
			Json::Array(items) => HostValue::Array(
				items
					.iter()
					.map(|v| self.decode_value(v))
					.collect::<Result<_, _>>()?,
			),
			Json::Object(map) => HostValue::Object(
				map.iter()
					.map(|(k, v)| Ok((k.clone(), self.decode_value(v)?)))
					.collect::<Result<_, ProtocolError>>()?,
			),
			Json::String(s) => {
				if !s.starts_with(rop_wire::PREFIX) {
					return Ok(HostValue::String(s.clone()));
				}
				match rop_wire::value::decode_tag(s) {
					rop_wire::Tag::Literal(s) => HostValue::String(s),
					rop_wire::Tag::Unknown(s) => HostValue::UnValue(s),
					rop_wire::Tag::Error(packed) => HostValue::Error(Box::new(crate::value::HostError {
						message: packed.message,
						stack: packed.stack,
						cause: match packed.cause {
							Some(c) => Some(Box::new(self.decode_value(&c)?)),
							None => None,
						},
					})),
					rop_wire::Tag::Capability(kind, wire_oid) => match wire_oid.interpret() {
						rop_wire::Ownership::Local(index) => {
							let exposed = self
								.0
								.objects
								.borrow()
								.get(index)
								.cloned()
								.ok_or(ProtocolError::UnknownLocalObject(index))?;
							HostValue::Capability(CapabilityRef::Local(exposed))
						}
						rop_wire::Ownership::Peer(index) => {
							HostValue::Capability(CapabilityRef::Remote(self.get_or_create_proxy(index, kind)))
						}
					},
				}
			}
		})
	}

	// --- outbound observation bookkeeping (section 4.6) ---------------

	pub(crate) fn alloc_observer_slot(&self, cell: Cell, donations: Vec<usize>) -> Slot {
		let index = self.0.observers.borrow_mut().alloc(ObserverEntry::Live {
			cell,
			donations: RefCell::new(donations),
		});
		Slot(u32::try_from(index).expect("slot index fits u32"))
	}

	/// Looks up an outbound slot as section 4.7/8 invariant 6 requires a
	/// `Result` handler to: a live cell gets the update, a zombie swallows it
	/// silently, and anything else (the slot was never allocated, or was
	/// already freed) is a protocol error.
	pub(crate) fn observer_lookup(&self, slot: Slot) -> ObserverLookup {
		match self.0.observers.borrow().get(slot.0 as usize) {
			Some(ObserverEntry::Live { cell, .. }) => ObserverLookup::Live(cell.clone()),
			Some(ObserverEntry::Zombie) => ObserverLookup::Zombie,
			None => ObserverLookup::Absent,
		}
	}

	pub(crate) fn mark_observer_zombie(&self, slot: Slot) {
		let mut observers = self.0.observers.borrow_mut();
		if let Some(entry) = observers.get_mut(slot.0 as usize) {
			let donations = match entry {
				ObserverEntry::Live { donations, .. } => std::mem::take(&mut *donations.borrow_mut()),
				ObserverEntry::Zombie => Vec::new(),
			};
			*entry = ObserverEntry::Zombie;
			drop(observers);
			let mut objects = self.0.objects.borrow_mut();
			for index in donations {
				objects.dereg(index);
			}
		}
	}

	pub(crate) fn retire_observer_slot(&self, slot: Slot) {
		let mut observers = self.0.observers.borrow_mut();
		if observers.contains(slot.0 as usize) {
			observers.free(slot.0 as usize);
		}
	}

	fn end_observation(&self, slot: Slot, memo_key: &(usize, String)) {
		self.0.observe_memo.borrow_mut().remove(memo_key);
		self.mark_observer_zombie(slot);
		self.send(Message::End { slot });
	}

	pub(crate) fn observe_memoized(
		&self,
		peer_index: usize,
		args: Vec<HostValue>,
		memo_key_suffix: String,
	) -> Rc<Observation> {
		let memo_key = (peer_index, memo_key_suffix);
		if let Some(existing) = self.0.observe_memo.borrow().get(&memo_key).and_then(Weak::upgrade) {
			return existing;
		}

		let mut donations = Vec::new();
		let encoded_args: Vec<_> = args.iter().map(|a| self.encode_value(a, &mut donations)).collect();
		let cell = Cell::state(Evaluation::Pending(HostValue::Null));
		let slot = self.alloc_observer_slot(cell.clone(), donations);
		self.send(Message::Start {
			slot,
			oid: rop_wire::WireOid::refer(peer_index),
			args: encoded_args,
		});

		let observation = Rc::new(Observation {
			agent: Rc::downgrade(&self.0),
			slot,
			cell,
			memo_key: memo_key.clone(),
		});
		self.0
			.observe_memo
			.borrow_mut()
			.insert(memo_key, Rc::downgrade(&observation));
		observation
	}
}

fn message_kind(msg: &Message) -> &'static str {
	match msg {
		Message::Start { .. } => "Start",
		Message::Result { .. } => "Result",
		Message::AckResult { .. } => "AckResult",
		Message::End { .. } => "End",
		Message::AckEnd { .. } => "AckEnd",
		Message::Perform { .. } => "Perform",
		Message::Error { .. } => "Error",
	}
}

#[cfg(test)]
mod test {
	//! End-to-end scenarios from spec section 8, driven without a real
	//! transport: two `Agent`s exchange `Message`s directly through
	//! `dispatch`, with `pump` standing in for the wire.

	use super::*;
	use crate::value::HostError;
	use rop_wire::Cond;

	/// Relays whatever's in each outbox into the other agent's `dispatch`
	/// until both are quiet. Good enough for scenarios that don't need to
	/// control delivery order by hand (S1, S2, S4, S5); S3 pumps by hand.
	fn pump(a: &Agent, b: &Agent) {
		loop {
			let from_a = a.drain_outbox();
			let from_b = b.drain_outbox();
			let quiet = from_a.is_empty() && from_b.is_empty();
			for msg in from_a {
				b.dispatch(msg).expect("b accepts a's message");
			}
			for msg in from_b {
				a.dispatch(msg).expect("a accepts b's message");
			}
			if quiet {
				break;
			}
		}
	}

	fn doubler() -> Exposed {
		Exposed::Function(Box::new(|args: &[HostValue]| match args.first() {
			Some(HostValue::Number(n)) => Evaluation::Ready(HostValue::Number(n * 2.0)),
			_ => Evaluation::Err(HostError {
				message: "expected a single number argument".to_owned(),
				stack: None,
				cause: None,
			}),
		}))
	}

	#[test]
	fn scenario_s1_primordial_observation_succeeds() {
		let server = Agent::new(vec![("double", doubler())], vec![]);
		let client = Agent::new(vec![], vec![("double", Kind::Function)]);

		let remote_double = client.remote("double").expect("declared above");
		let obs = remote_double.call(vec![HostValue::Number(21.0)]);
		pump(&client, &server);

		match obs.get() {
			Evaluation::Ready(HostValue::Number(n)) => assert_eq!(n, 42.0),
			other => panic!("expected Ready(42), got {other:?}"),
		}
	}

	#[test]
	fn scenario_s2_pending_then_resolved() {
		let backing = Cell::state(Evaluation::Pending(HostValue::str("loading")));
		let server = Agent::new(vec![("v", Exposed::Thunk(backing.clone()))], vec![]);
		let client = Agent::new(vec![], vec![("v", Kind::Thunk)]);

		let remote_v = client.remote("v").expect("declared above");
		let obs = remote_v.call(vec![]);
		pump(&client, &server);

		match obs.get() {
			Evaluation::Pending(HostValue::String(s)) => assert_eq!(s, "loading"),
			other => panic!("expected Pending(\"loading\"), got {other:?}"),
		}

		backing.set(Evaluation::Ready(HostValue::str("ok")));
		pump(&server, &client);

		match obs.get() {
			Evaluation::Ready(HostValue::String(s)) => assert_eq!(s, "ok"),
			other => panic!("expected Ready(\"ok\"), got {other:?}"),
		}
	}

	#[test]
	fn scenario_s3_end_races_result() {
		let server = Agent::new(vec![("v", Exposed::Other(Cell::state(Evaluation::Ready(HostValue::str("v0")))))], vec![]);
		let client = Agent::new(vec![], vec![("v", Kind::Other)]);
		let remote_v = client.remote("v").expect("declared above");

		let obs = remote_v.call(vec![]);
		let starts = client.drain_outbox();
		assert_eq!(starts.len(), 1, "expected a single Start");
		for msg in starts {
			server.dispatch(msg).unwrap();
		}

		// The server's initial Result is in flight but not yet delivered.
		let in_flight_result = server.drain_outbox();
		assert_eq!(in_flight_result.len(), 1);

		// The client's reactive scope drops first: it sends End and
		// zombifies the slot before seeing the Result above.
		drop(obs);
		let ends = client.drain_outbox();
		assert_eq!(ends.len(), 1, "expected a single End");
		for msg in ends {
			server.dispatch(msg).unwrap();
		}

		// The stale Result now arrives, routed to a ZOMBIE slot: absorbed
		// silently, but still acknowledged.
		for msg in in_flight_result {
			client.dispatch(msg).expect("zombie Result is not an error");
		}
		let ack_results = client.drain_outbox();
		assert_eq!(ack_results.len(), 1, "ZOMBIE Result is still ACKed");
		assert!(matches!(ack_results[0], Message::AckResult { .. }));

		// AckEnd from the server frees the slot for reuse.
		let ack_ends = server.drain_outbox();
		assert_eq!(ack_ends.len(), 1);
		for msg in ack_ends {
			client.dispatch(msg).unwrap();
		}
		assert!(client.0.observers.borrow().is_empty(), "slot must be freed after AckEnd");

		// A fresh observation succeeds using the now-free slot space.
		let obs2 = remote_v.call(vec![]);
		pump(&client, &server);
		assert!(matches!(obs2.get(), Evaluation::Ready(_)));
	}

	#[test]
	fn scenario_s4_capability_round_trips_without_double_wrapping() {
		// The server exposes `applyTo`, which returns its argument unchanged
		// — the capability must round-trip as the client's original object,
		// not a fresh proxy-of-a-proxy.
		let apply_to = Exposed::Function(Box::new(|args: &[HostValue]| match args.first() {
			Some(cap @ HostValue::Capability(_)) => Evaluation::Ready(cap.clone()),
			_ => Evaluation::Err(HostError {
				message: "expected a capability argument".to_owned(),
				stack: None,
				cause: None,
			}),
		}));
		let server = Agent::new(vec![("applyTo", apply_to)], vec![]);
		let client = Agent::new(vec![], vec![("applyTo", Kind::Function)]);

		let local_fn = Rc::new(Exposed::Function(Box::new(|_: &[HostValue]| {
			Evaluation::Ready(HostValue::str("original"))
		})));
		let remote_apply_to = client.remote("applyTo").expect("declared above");
		let arg = HostValue::Capability(CapabilityRef::Local(local_fn.clone()));
		let obs = remote_apply_to.call(vec![arg]);
		pump(&client, &server);

		match obs.get() {
			Evaluation::Ready(HostValue::Capability(CapabilityRef::Local(returned))) => {
				assert!(Rc::ptr_eq(&returned, &local_fn), "round-tripped capability must be the original object, not a new proxy");
			}
			other => panic!("expected the original local capability back, got {other:?}"),
		}
	}

	#[test]
	fn scenario_s5_error_propagation() {
		let boom = Exposed::Function(Box::new(|_: &[HostValue]| {
			Evaluation::Err(HostError {
				message: "bad".to_owned(),
				stack: None,
				cause: Some(Box::new(HostValue::str("x"))),
			})
		}));
		let server = Agent::new(vec![("boom", boom)], vec![]);
		let client = Agent::new(vec![], vec![("boom", Kind::Function)]);

		let remote_boom = client.remote("boom").expect("declared above");
		let obs = remote_boom.call(vec![]);
		pump(&client, &server);

		match obs.get() {
			Evaluation::Err(e) => {
				assert_eq!(e.message, "bad");
				match e.cause.as_deref() {
					Some(HostValue::String(s)) => assert_eq!(s, "x"),
					other => panic!("expected cause \"x\", got {other:?}"),
				}
			}
			other => panic!("expected Err, got {other:?}"),
		}
	}

	#[test]
	fn result_for_never_allocated_slot_is_fatal() {
		let client = Agent::new(vec![], vec![]);
		let err = client.dispatch(Message::Result {
			slot: Slot(0),
			cond: Cond::Success,
			value: serde_json::Value::Null,
		});
		assert!(err.is_err(), "Result on an unallocated slot must be a protocol error");
	}
}
