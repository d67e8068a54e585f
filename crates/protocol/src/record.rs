//! Log records emitted by the engine on stdout.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::level::LogLevel;

/// `msg` of the record the engine logs once its HTTP listener is bound.
pub const READY_MESSAGE: &str = "Started HTTP server.";

/// One decoded log record.
///
/// The field set is open; only `msg`, `address` and `level` have meaning to
/// the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRecord(pub Map<String, Value>);

impl LogRecord {
	pub fn msg(&self) -> Option<&str> {
		self.str_field("msg")
	}

	/// Listening address (`host:port`) on the readiness record.
	pub fn address(&self) -> Option<&str> {
		self.str_field("address")
	}

	/// The raw `level` token, as written by the engine.
	pub fn level_token(&self) -> Option<&str> {
		self.str_field("level")
	}

	/// The record's level mapped through [`LogLevel::from_token`].
	pub fn level(&self) -> Option<LogLevel> {
		self.level_token().and_then(LogLevel::from_token)
	}

	/// Whether this is the readiness record.
	pub fn is_ready(&self) -> bool {
		self.msg() == Some(READY_MESSAGE)
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.0.get(key)
	}

	fn str_field(&self, key: &str) -> Option<&str> {
		self.0.get(key).and_then(Value::as_str)
	}
}

impl TryFrom<Value> for LogRecord {
	type Error = Value;

	/// Accepts JSON objects; hands any other value back unchanged.
	fn try_from(value: Value) -> Result<Self, Self::Error> {
		match value {
			Value::Object(map) => Ok(LogRecord(map)),
			other => Err(other),
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn readiness_record_is_detected() {
		let record = LogRecord::try_from(json!({
			"level": "INFO",
			"msg": "Started HTTP server.",
			"address": "127.0.0.1:54321"
		}))
		.unwrap();
		assert!(record.is_ready());
		assert_eq!(record.address(), Some("127.0.0.1:54321"));
		assert_eq!(record.level(), Some(LogLevel::Info));
	}

	#[test]
	fn non_objects_are_rejected() {
		assert!(LogRecord::try_from(json!([1, 2])).is_err());
		assert!(LogRecord::try_from(json!("Started HTTP server.")).is_err());
	}

	#[test]
	fn non_string_fields_read_as_absent() {
		let record = LogRecord::try_from(json!({"msg": 3, "level": 30})).unwrap();
		assert_eq!(record.msg(), None);
		assert_eq!(record.level(), None);
		assert!(!record.is_ready());
	}
}
