//! Wire-level object and slot identifiers.

use serde::{Deserialize, Serialize};

/// A per-direction, non-negative identifier for an outstanding observation.
///
/// Outbound slots (in `observers`) are allocated by the local agent;
/// inbound slots (in `updaters`) are allocated by the peer. The two spaces
/// are independent: the same number may be live simultaneously in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(pub u32);

/// The signed object identifier as it appears on the wire.
///
/// The sign encodes ownership direction *from the sender's perspective*:
/// negative values denote objects owned by the sender (being donated),
/// non-negative values refer back to an object the receiver previously
/// donated. The encoding is `-1 - index` so that index `0` is representable
/// as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireOid(pub i64);

/// What a [`WireOid`] means to the *receiver* that just read it off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
	/// The peer owns this object; the receiver should look up or create a
	/// proxy for local index `.0`.
	Peer(usize),
	/// The receiver owns this object already, at local index `.0`.
	Local(usize),
}

impl WireOid {
	/// Encodes a reference to an object this agent owns and is donating to
	/// the peer.
	pub fn donate(local_index: usize) -> Self {
		Self(-1 - i64::try_from(local_index).expect("index too large for wire OID"))
	}

	/// Encodes a reference back to an object the peer previously donated to
	/// this agent (a non-negative, "look it up yourself" OID).
	pub fn refer(local_index: usize) -> Self {
		Self(i64::try_from(local_index).expect("index too large for wire OID"))
	}

	pub fn interpret(self) -> Ownership {
		if self.0 < 0 {
			Ownership::Peer((-1 - self.0) as usize)
		} else {
			Ownership::Local(self.0 as usize)
		}
	}
}

/// The kind of a shared object, as declared by a primordial or carried
/// alongside a capability reference in serialized values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
	/// Invoked with arguments; the result becomes the slot value.
	Function,
	/// A nullary lazy value; composes through `use`.
	Thunk,
	/// A fire-and-forget effect; performing it sends `Perform`, no slot.
	Action,
	/// A non-callable value donated by reference.
	Other,
}

impl Kind {
	pub fn tag_char(self) -> char {
		match self {
			Kind::Function => 'F',
			Kind::Thunk => 'T',
			Kind::Action => 'A',
			Kind::Other => 'O',
		}
	}

	pub fn from_tag_char(c: char) -> Option<Self> {
		match c {
			'F' => Some(Kind::Function),
			'T' => Some(Kind::Thunk),
			'A' => Some(Kind::Action),
			'O' => Some(Kind::Other),
			_ => None,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn donate_encodes_index_zero_as_minus_one() {
		assert_eq!(WireOid::donate(0), WireOid(-1));
		assert_eq!(WireOid::donate(5), WireOid(-6));
	}

	#[test]
	fn interpret_round_trips() {
		assert_eq!(WireOid::donate(7).interpret(), Ownership::Peer(7));
		assert_eq!(WireOid::refer(7).interpret(), Ownership::Local(7));
	}

	#[test]
	fn kind_tag_round_trip() {
		for k in [Kind::Function, Kind::Thunk, Kind::Action, Kind::Other] {
			assert_eq!(Kind::from_tag_char(k.tag_char()), Some(k));
		}
	}
}
