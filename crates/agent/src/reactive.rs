//! A minimal single-threaded reactive cell graph.
//!
//! Section 6 of the spec treats the reactive runtime (`cell`, `state`, `use`,
//! `memo`, `onDrop`, `Pending`) as an external collaborator the Agent merely
//! consumes. Rust has no such runtime sitting in the ecosystem the way a host
//! JS environment might, so this module supplies the minimum concrete
//! implementation the Agent needs to actually run: a push-based dependency
//! graph of `Cell`s, tracked with a thread-local "currently recomputing"
//! stack, exactly the shape of a small signals library. `use`(x) is `x.get()`
//! called from inside another cell's recompute closure; `memo` is handled at
//! the agent layer (keyed by oid+args, see `outbound::observe`) rather than
//! here; `onDrop` is `Cell::on_drop`, fired from `Cell::deactivate`.
//!
//! Swap this module out if you already have a real reactive runtime (Bevy's
//! change detection, a signals crate, etc.) to drive the Agent with instead —
//! nothing outside this file assumes a specific implementation, only the
//! `Cell`/`Evaluation` surface.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::value::{HostError, HostValue};
use rop_wire::Cond;

/// The outcome of evaluating a cell: either a value, a "not ready yet"
/// sentinel carrying a diagnostic payload, or an error. Maps directly onto
/// the wire's `cond` field (section 6).
#[derive(Debug, Clone)]
pub enum Evaluation {
	Ready(HostValue),
	Pending(HostValue),
	Err(HostError),
}

impl Evaluation {
	pub fn cond(&self) -> Cond {
		match self {
			Evaluation::Ready(_) => Cond::Success,
			Evaluation::Pending(_) => Cond::Pending,
			Evaluation::Err(_) => Cond::Error,
		}
	}
}

struct Node {
	recompute: RefCell<Option<Box<dyn Fn() -> Evaluation>>>,
	value: RefCell<Evaluation>,
	dependents: RefCell<Vec<Weak<Node>>>,
	on_change: RefCell<Option<Box<dyn FnMut(&Evaluation)>>>,
	on_drop: RefCell<Vec<Box<dyn FnOnce()>>>,
}

thread_local! {
	/// The stack of cells currently being recomputed, innermost last. Reading
	/// a cell while this is non-empty subscribes the top entry as a
	/// dependent.
	static STACK: RefCell<Vec<Rc<Node>>> = const { RefCell::new(Vec::new()) };
}

/// A reactive cell: either a mutable leaf (`Cell::state`) or a memoized
/// recomputation (`Cell::computed`). Cheap to clone; clones share the same
/// underlying node.
#[derive(Clone)]
pub struct Cell(Rc<Node>);

impl Cell {
	/// A mutable leaf cell, analogous to the runtime's `state(init)`.
	pub fn state(initial: Evaluation) -> Self {
		Self(Rc::new(Node {
			recompute: RefCell::new(None),
			value: RefCell::new(initial),
			dependents: RefCell::new(Vec::new()),
			on_change: RefCell::new(None),
			on_drop: RefCell::new(Vec::new()),
		}))
	}

	/// A memoized recomputation node, analogous to the runtime's `cell(fn)`.
	/// `on_change` fires after every recompute, including the initial one —
	/// this is how the Agent hangs a `Result` emission off of an updater's
	/// re-evaluation.
	pub fn computed(
		recompute: impl Fn() -> Evaluation + 'static,
		on_change: impl FnMut(&Evaluation) + 'static,
	) -> Self {
		let node = Rc::new(Node {
			recompute: RefCell::new(Some(Box::new(recompute))),
			value: RefCell::new(Evaluation::Pending(HostValue::Null)),
			dependents: RefCell::new(Vec::new()),
			on_change: RefCell::new(Some(Box::new(on_change))),
			on_drop: RefCell::new(Vec::new()),
		});
		recompute_node(&node);
		Self(node)
	}

	/// Reads the current value, subscribing the cell currently being
	/// recomputed (if any) as a dependent. This is `use(x)`.
	pub fn get(&self) -> Evaluation {
		STACK.with(|stack| {
			if let Some(top) = stack.borrow().last() {
				let mut deps = self.0.dependents.borrow_mut();
				let already = deps.iter().any(|w| w.ptr_eq(&Rc::downgrade(top)));
				if !already {
					deps.push(Rc::downgrade(top));
				}
			}
		});
		self.0.value.borrow().clone()
	}

	/// Sets a leaf cell's value, synchronously propagating to dependents.
	/// Calling this on a `computed` cell is a logic error: its value is
	/// owned by its recompute function.
	pub fn set(&self, value: Evaluation) {
		debug_assert!(
			self.0.recompute.borrow().is_none(),
			"set() called on a computed cell"
		);
		*self.0.value.borrow_mut() = value.clone();
		if let Some(cb) = self.0.on_change.borrow_mut().as_mut() {
			cb(&value);
		}
		propagate(&self.0);
	}

	pub fn on_drop(&self, f: impl FnOnce() + 'static) {
		self.0.on_drop.borrow_mut().push(Box::new(f));
	}

	/// Tears down this cell's reactive participation: it stops recomputing
	/// when its (former) dependencies change, and its `on_drop` hooks fire.
	///
	/// Dead `Weak` entries left behind in a dependency's `dependents` list
	/// are not swept; they simply fail to upgrade on the next propagation.
	/// TODO: sweep dependents lists opportunistically if long-lived agents
	/// end up accumulating enough dead entries to matter.
	pub fn deactivate(&self) {
		self.0.recompute.borrow_mut().take();
		for f in self.0.on_drop.borrow_mut().drain(..) {
			f();
		}
	}
}

fn recompute_node(node: &Rc<Node>) {
	let f = match node.recompute.borrow().as_ref() {
		Some(f) => {
			// SAFETY-free workaround for borrowing `node.recompute` across the
			// call: we can't hold the `Ref` while also pushing `node` onto the
			// stack and letting the closure re-enter `get()` on other cells,
			// so reborrow the pointer directly (the closure is never replaced
			// while live, only cleared in `deactivate`, which doesn't run
			// concurrently in a single-threaded runtime).
			let ptr: *const (dyn Fn() -> Evaluation) = &**f;
			ptr
		}
		None => return,
	};
	STACK.with(|stack| stack.borrow_mut().push(node.clone()));
	// SAFETY: `f` was derived from `node.recompute`, which is not mutated
	// while a recompute is in flight (single-threaded, no re-entrant
	// `deactivate` from within a recompute of the same node).
	let result = unsafe { (*f)() };
	STACK.with(|stack| {
		stack.borrow_mut().pop();
	});
	*node.value.borrow_mut() = result.clone();
	if let Some(cb) = node.on_change.borrow_mut().as_mut() {
		cb(&result);
	}
	propagate(node);
}

fn propagate(node: &Rc<Node>) {
	let deps: Vec<_> = node.dependents.borrow().clone();
	for dep in deps {
		if let Some(dep) = dep.upgrade() {
			recompute_node(&dep);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::cell::RefCell as StdRefCell;

	fn ready(n: i64) -> Evaluation {
		Evaluation::Ready(HostValue::Number(n as f64))
	}

	#[test]
	fn computed_reruns_when_dependency_changes() {
		let leaf = Cell::state(ready(1));
		let seen = Rc::new(StdRefCell::new(Vec::new()));
		let seen2 = seen.clone();
		let leaf2 = leaf.clone();
		let _computed = Cell::computed(
			move || match leaf2.get() {
				Evaluation::Ready(HostValue::Number(n)) => Evaluation::Ready(HostValue::Number(n * 2.0)),
				other => other,
			},
			move |ev| seen2.borrow_mut().push(ev.clone()),
		);
		assert_eq!(seen.borrow().len(), 1);
		leaf.set(ready(2));
		assert_eq!(seen.borrow().len(), 2);
		let last = seen.borrow().last().unwrap().clone();
		assert!(matches!(last, Evaluation::Ready(HostValue::Number(n)) if n == 4.0));
	}

	#[test]
	fn deactivate_stops_future_recomputes_and_fires_on_drop() {
		let leaf = Cell::state(ready(1));
		let count = Rc::new(StdRefCell::new(0));
		let count2 = count.clone();
		let leaf2 = leaf.clone();
		let computed = Cell::computed(
			move || leaf2.get(),
			move |_| *count2.borrow_mut() += 1,
		);
		assert_eq!(*count.borrow(), 1);
		let dropped = Rc::new(StdRefCell::new(false));
		let dropped2 = dropped.clone();
		computed.on_drop(move || *dropped2.borrow_mut() = true);
		computed.deactivate();
		assert!(*dropped.borrow());
		leaf.set(ready(2));
		assert_eq!(*count.borrow(), 1, "deactivated cell must not recompute again");
	}
}
