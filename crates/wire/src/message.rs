//! The six (plus fatal `Error`) tagged-array message shapes of section 6.
//!
//! Every message is a JSON array whose first element is a kind string, e.g.
//! `["Start", 0, 0, 21]`. We don't lean on serde's enum tagging for this
//! (that's built for tagged *objects*, not heterogeneous arrays), so
//! encoding/decoding is done by hand against `serde_json::Value`.

use serde_json::Value as Json;

use crate::oid::{Slot, WireOid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
	Success = 0,
	Pending = 1,
	Error = 2,
}

impl Cond {
	pub fn to_u8(self) -> u8 {
		self as u8
	}

	pub fn from_u8(v: u8) -> Option<Self> {
		match v {
			0 => Some(Cond::Success),
			1 => Some(Cond::Pending),
			2 => Some(Cond::Error),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
	Start { slot: Slot, oid: WireOid, args: Vec<Json> },
	Result { slot: Slot, cond: Cond, value: Json },
	AckResult { slot: Slot },
	End { slot: Slot },
	AckEnd { slot: Slot },
	Perform { oid: WireOid },
	/// Fatal: sent just before the connection is closed.
	Error { name: String },
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
	#[error("message was not a json array")]
	NotAnArray,
	#[error("message array was empty")]
	Empty,
	#[error("unknown message kind {0:?}")]
	UnknownKind(String),
	#[error("malformed {kind} message: {reason}")]
	Malformed { kind: &'static str, reason: String },
	#[error("invalid json: {0}")]
	InvalidJson(#[from] serde_json::Error),
}

fn as_u32(kind: &'static str, v: &Json, field: &str) -> Result<u32, DecodeError> {
	v.as_u64()
		.and_then(|n| u32::try_from(n).ok())
		.ok_or_else(|| DecodeError::Malformed {
			kind,
			reason: format!("expected {field} to be a non-negative integer, got {v}"),
		})
}

fn as_i64(kind: &'static str, v: &Json, field: &str) -> Result<i64, DecodeError> {
	v.as_i64().ok_or_else(|| DecodeError::Malformed {
		kind,
		reason: format!("expected {field} to be an integer, got {v}"),
	})
}

fn as_string(kind: &'static str, v: &Json, field: &str) -> Result<String, DecodeError> {
	v.as_str()
		.map(str::to_owned)
		.ok_or_else(|| DecodeError::Malformed {
			kind,
			reason: format!("expected {field} to be a string, got {v}"),
		})
}

impl Message {
	pub fn to_json(&self) -> Vec<Json> {
		match self {
			Message::Start { slot, oid, args } => {
				let mut out = vec![Json::from("Start"), Json::from(slot.0), Json::from(oid.0)];
				out.extend(args.iter().cloned());
				out
			}
			Message::Result { slot, cond, value } => {
				vec![
					Json::from("Result"),
					Json::from(slot.0),
					Json::from(cond.to_u8()),
					value.clone(),
				]
			}
			Message::AckResult { slot } => vec![Json::from("AckResult"), Json::from(slot.0)],
			Message::End { slot } => vec![Json::from("End"), Json::from(slot.0)],
			Message::AckEnd { slot } => vec![Json::from("AckEnd"), Json::from(slot.0)],
			Message::Perform { oid } => vec![Json::from("Perform"), Json::from(oid.0)],
			Message::Error { name } => vec![Json::from("Error"), Json::from(name.clone())],
		}
	}

	pub fn from_json(mut array: Vec<Json>) -> Result<Self, DecodeError> {
		if array.is_empty() {
			return Err(DecodeError::Empty);
		}
		let kind = array
			.first()
			.and_then(Json::as_str)
			.ok_or(DecodeError::Empty)?
			.to_owned();

		match kind.as_str() {
			"Start" => {
				if array.len() < 3 {
					return Err(DecodeError::Malformed {
						kind: "Start",
						reason: "expected at least [kind, slot, oid]".to_owned(),
					});
				}
				let args = array.split_off(3);
				let oid = as_i64("Start", &array[2], "oid")?;
				let slot = as_u32("Start", &array[1], "slot")?;
				Ok(Message::Start {
					slot: Slot(slot),
					oid: WireOid(oid),
					args,
				})
			}
			"Result" => {
				if array.len() != 4 {
					return Err(DecodeError::Malformed {
						kind: "Result",
						reason: "expected exactly [kind, slot, cond, value]".to_owned(),
					});
				}
				let slot = as_u32("Result", &array[1], "slot")?;
				let cond_raw = array[2].as_u64().ok_or_else(|| DecodeError::Malformed {
					kind: "Result",
					reason: format!("expected cond to be an integer, got {}", array[2]),
				})?;
				let cond = u8::try_from(cond_raw)
					.ok()
					.and_then(Cond::from_u8)
					.ok_or_else(|| DecodeError::Malformed {
						kind: "Result",
						reason: format!("cond {cond_raw} is not 0, 1, or 2"),
					})?;
				Ok(Message::Result {
					slot: Slot(slot),
					cond,
					value: array[3].clone(),
				})
			}
			"AckResult" => Ok(Message::AckResult {
				slot: Slot(as_u32("AckResult", array.get(1).unwrap_or(&Json::Null), "slot")?),
			}),
			"End" => Ok(Message::End {
				slot: Slot(as_u32("End", array.get(1).unwrap_or(&Json::Null), "slot")?),
			}),
			"AckEnd" => Ok(Message::AckEnd {
				slot: Slot(as_u32("AckEnd", array.get(1).unwrap_or(&Json::Null), "slot")?),
			}),
			"Perform" => Ok(Message::Perform {
				oid: WireOid(as_i64("Perform", array.get(1).unwrap_or(&Json::Null), "oid")?),
			}),
			"Error" => Ok(Message::Error {
				name: as_string("Error", array.get(1).unwrap_or(&Json::Null), "name")?,
			}),
			other => Err(DecodeError::UnknownKind(other.to_owned())),
		}
	}

	pub fn to_text(&self) -> String {
		serde_json::to_string(&self.to_json()).expect("Vec<Value> always serializes")
	}

	pub fn from_text(s: &str) -> Result<Self, DecodeError> {
		let array: Vec<Json> = serde_json::from_str(s).map_err(|_| DecodeError::NotAnArray)?;
		Self::from_json(array)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn start_round_trips_with_args() {
		let msg = Message::Start {
			slot: Slot(0),
			oid: WireOid(0),
			args: vec![Json::from(21)],
		};
		assert_eq!(msg.to_text(), r#"["Start",0,0,21]"#);
		assert_eq!(Message::from_text(&msg.to_text()).unwrap(), msg);
	}

	#[test]
	fn result_round_trips() {
		let msg = Message::Result {
			slot: Slot(0),
			cond: Cond::Success,
			value: Json::from(42),
		};
		assert_eq!(msg.to_text(), r#"["Result",0,0,42]"#);
		assert_eq!(Message::from_text(&msg.to_text()).unwrap(), msg);
	}

	#[test]
	fn unknown_kind_is_an_error() {
		assert!(matches!(
			Message::from_text(r#"["Bogus",0]"#),
			Err(DecodeError::UnknownKind(k)) if k == "Bogus"
		));
	}

	#[test]
	fn non_array_is_an_error() {
		assert!(matches!(Message::from_text(r#"{"a":1}"#), Err(DecodeError::NotAnArray)));
	}

	#[test]
	fn ack_end_round_trips() {
		let msg = Message::AckEnd { slot: Slot(7) };
		assert_eq!(Message::from_text(&msg.to_text()).unwrap(), msg);
	}
}
