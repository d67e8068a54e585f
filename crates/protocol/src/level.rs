//! Engine log severity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity levels understood by the engine, ordered from most to least verbose.
///
/// Serializes as the lowercase token the engine expects (`"info"`, `"warn"`, ...).
/// Parsing is case-insensitive and accepts a small fixed synonym table, see
/// [`LogLevel::from_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum LogLevel {
	Debug,
	#[default]
	Info,
	Warn,
	Error,
	Fatal,
}

impl LogLevel {
	/// All levels, least severe first.
	pub const ALL: [LogLevel; 5] = [
		LogLevel::Debug,
		LogLevel::Info,
		LogLevel::Warn,
		LogLevel::Error,
		LogLevel::Fatal,
	];

	/// Maps a level token to a [`LogLevel`].
	///
	/// | token(s)                        | level   |
	/// |---------------------------------|---------|
	/// | `trace`, `debug`                | Debug   |
	/// | `info`, `information`           | Info    |
	/// | `warn`, `warning`               | Warn    |
	/// | `error`, `err`                  | Error   |
	/// | `fatal`, `panic`, `critical`    | Fatal   |
	///
	/// Matching ignores ASCII case and surrounding whitespace. Anything else is `None`.
	pub fn from_token(token: &str) -> Option<Self> {
		let token = token.trim().to_ascii_lowercase();
		let level = match token.as_str() {
			"trace" | "debug" => LogLevel::Debug,
			"info" | "information" => LogLevel::Info,
			"warn" | "warning" => LogLevel::Warn,
			"error" | "err" => LogLevel::Error,
			"fatal" | "panic" | "critical" => LogLevel::Fatal,
			_ => return None,
		};
		Some(level)
	}

	/// The canonical wire token.
	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Debug => "debug",
			LogLevel::Info => "info",
			LogLevel::Warn => "warn",
			LogLevel::Error => "error",
			LogLevel::Fatal => "fatal",
		}
	}

	/// Whether the engine would hide `info` records at this level.
	///
	/// The readiness record is emitted at `info`, so these levels need the
	/// startup downgrade.
	pub fn suppresses_info(&self) -> bool {
		*self > LogLevel::Info
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Error returned when a token is not in the synonym table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLevel(pub String);

impl fmt::Display for UnknownLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"unknown log level '{}' (expected one of debug, info, warn, error, fatal)",
			self.0
		)
	}
}

impl std::error::Error for UnknownLevel {}

impl FromStr for LogLevel {
	type Err = UnknownLevel;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		LogLevel::from_token(s).ok_or_else(|| UnknownLevel(s.to_string()))
	}
}

impl TryFrom<String> for LogLevel {
	type Error = UnknownLevel;

	fn try_from(value: String) -> Result<Self, UnknownLevel> {
		value.parse()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn owned_tokens_convert() {
		assert_eq!(LogLevel::try_from("Critical".to_string()), Ok(LogLevel::Fatal));
		assert_eq!(
			LogLevel::try_from("verbose".to_string()),
			Err(UnknownLevel("verbose".to_string()))
		);
	}

	#[test]
	fn synonyms_map_to_canonical_levels() {
		assert_eq!(LogLevel::from_token("WARNING"), Some(LogLevel::Warn));
		assert_eq!(LogLevel::from_token("warn"), Some(LogLevel::Warn));
		assert_eq!(LogLevel::from_token(" Err "), Some(LogLevel::Error));
		assert_eq!(LogLevel::from_token("trace"), Some(LogLevel::Debug));
		assert_eq!(LogLevel::from_token("critical"), Some(LogLevel::Fatal));
		assert_eq!(LogLevel::from_token("verbose"), None);
	}

	#[test]
	fn ordering_follows_severity() {
		assert!(LogLevel::Debug < LogLevel::Info);
		assert!(LogLevel::Warn < LogLevel::Error);
		assert!(LogLevel::Error < LogLevel::Fatal);
		assert!(!LogLevel::Info.suppresses_info());
		assert!(LogLevel::Warn.suppresses_info());
	}

	#[test]
	fn serde_uses_lowercase_tokens() {
		assert_eq!(serde_json::to_string(&LogLevel::Error).unwrap(), "\"error\"");
		let level: LogLevel = serde_json::from_str("\"Warning\"").unwrap();
		assert_eq!(level, LogLevel::Warn);
		assert!(serde_json::from_str::<LogLevel>("\"loud\"").is_err());
	}
}
