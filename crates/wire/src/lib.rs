//! Wire types shared by both sides of a ROP connection: the slab allocator
//! and refcounted object table underlying the protocol's capability tables,
//! the object/slot identifier newtypes, the tagged-string value codec, and
//! the six message shapes.
//!
//! This crate is deliberately inert: it has no notion of a transport, a
//! reactive runtime, or a live capability. `rop-agent` builds the protocol
//! engine on top of these types.

pub mod message;
pub mod objtable;
pub mod oid;
pub mod table;
pub mod value;

pub use message::{Cond, DecodeError, Message};
pub use objtable::{Identity, ObjTable};
pub use oid::{Kind, Ownership, Slot, WireOid};
pub use table::Table;
pub use value::{PackedError, Tag, PREFIX};
