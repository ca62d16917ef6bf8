//! The leaf-string tag codec used to smuggle capability references and
//! packed errors through plain JSON.
//!
//! This module only deals with *strings*; walking an arbitrary value tree
//! and deciding which leaves need tagging requires knowledge of live
//! capabilities and belongs to the agent that owns the object tables
//! (`rop_agent::value`). This module only encodes/parses one already-decided
//! leaf at a time, matching the escape discipline of spec section 4.3.

use serde::{Deserialize, Serialize};

use crate::oid::{Kind, WireOid};

/// Every tagged string on the wire begins with this character.
pub const PREFIX: char = '.';

/// An `Error`, packed for the wire. `cause` holds an already wire-encoded
/// value (i.e. this type's own tagging has already been applied recursively
/// to anything nested inside it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedError {
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cause: Option<Box<serde_json::Value>>,
}

/// The decoded meaning of a tagged string.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
	/// A string that merely started with [`PREFIX`]; doubled-prefix escape
	/// already stripped.
	Literal(String),
	Capability(Kind, WireOid),
	Error(PackedError),
	/// A prefix-tagged string whose kind letter this version doesn't
	/// recognize. Carries the *original, still-tagged* string so it can be
	/// re-encoded bit-identically.
	Unknown(String),
}

/// Encodes a plain string for the wire: strings that don't start with
/// [`PREFIX`] pass through unchanged; strings that do get a second prefix
/// character prepended (the escape).
pub fn encode_literal(s: &str) -> String {
	if s.starts_with(PREFIX) {
		format!("{PREFIX}{s}")
	} else {
		s.to_owned()
	}
}

pub fn encode_capability(kind: Kind, oid: WireOid) -> String {
	format!("{PREFIX}{}{}", kind.tag_char(), oid.0)
}

pub fn encode_error(err: &PackedError) -> String {
	let json = serde_json::to_string(err).expect("PackedError always serializes to JSON");
	format!("{PREFIX}E{json}")
}

/// Parses a string already known to start with [`PREFIX`].
///
/// # Panics
/// Panics (via `debug_assert`) if `s` does not start with [`PREFIX`]; callers
/// are expected to have already checked this (it's how they decided to call
/// `decode_tag` in the first place).
pub fn decode_tag(s: &str) -> Tag {
	debug_assert!(s.starts_with(PREFIX), "decode_tag called on untagged string");
	let rest = &s[PREFIX.len_utf8()..];

	if let Some(doubled) = rest.strip_prefix(PREFIX) {
		return Tag::Literal(format!("{PREFIX}{doubled}"));
	}

	let Some(kind_char) = rest.chars().next() else {
		return Tag::Unknown(s.to_owned());
	};

	if kind_char == 'E' {
		let body = &rest[kind_char.len_utf8()..];
		return match serde_json::from_str::<PackedError>(body) {
			Ok(err) => Tag::Error(err),
			Err(_) => Tag::Unknown(s.to_owned()),
		};
	}

	if let Some(kind) = Kind::from_tag_char(kind_char) {
		let digits = &rest[kind_char.len_utf8()..];
		return match digits.parse::<i64>() {
			Ok(index) => Tag::Capability(kind, WireOid(index)),
			Err(_) => Tag::Unknown(s.to_owned()),
		};
	}

	Tag::Unknown(s.to_owned())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn plain_string_round_trips() {
		let s = "hello world";
		assert_eq!(encode_literal(s), s);
	}

	#[test]
	fn prefixed_string_escapes_by_doubling() {
		let s = ".oops";
		let encoded = encode_literal(s);
		assert_eq!(encoded, "..oops");
		assert!(encoded.starts_with(PREFIX));
		assert_eq!(decode_tag(&encoded), Tag::Literal(s.to_owned()));
	}

	#[test]
	fn capability_round_trips() {
		let encoded = encode_capability(Kind::Function, WireOid::donate(3));
		assert_eq!(decode_tag(&encoded), Tag::Capability(Kind::Function, WireOid::donate(3)));
	}

	#[test]
	fn error_round_trips() {
		let err = PackedError {
			message: "bad".to_owned(),
			stack: Some("at foo".to_owned()),
			cause: Some(Box::new(serde_json::json!(".O5"))),
		};
		let encoded = encode_error(&err);
		assert_eq!(decode_tag(&encoded), Tag::Error(err));
	}

	#[test]
	fn unknown_tag_round_trips_bit_identical() {
		let original = ".Z99";
		let Tag::Unknown(s) = decode_tag(original) else {
			panic!("expected Unknown");
		};
		assert_eq!(s, original);
	}
}
