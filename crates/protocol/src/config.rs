//! The configuration document written to the engine's stdin.
//!
//! Only the fields the supervisor touches are typed. Everything else the user
//! supplies is carried through `extra` untouched, so the engine sees the
//! document exactly as written apart from the injected pieces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::level::LogLevel;

/// Header carrying the shared secret on requests the engine sends to an origin.
pub const PSK_HEADER: &str = "x-sidecar-psk";

/// The only log format the supervisor can parse.
pub const LOG_FORMAT: &str = "JSON";

/// The only log destination the supervisor reads from.
pub const LOG_DESTINATION: &str = "STDOUT";

/// Full engine configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
	/// Upstream servers the engine forwards traffic to.
	#[serde(default)]
	pub origins: Vec<Origin>,
	/// Listeners the engine binds for inbound traffic.
	#[serde(default)]
	pub frontends: Vec<Frontend>,
	#[serde(default)]
	pub logging: LoggingConfig,
	/// Fields the supervisor does not interpret.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// An upstream the engine forwards to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Origin {
	pub url: String,
	/// Headers added to every request sent to this origin.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub headers: BTreeMap<String, String>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Origin {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			..Default::default()
		}
	}

	/// Whether this origin speaks HTTP (`http://` or `https://`, any case).
	pub fn is_http(&self) -> bool {
		let Some((scheme, _)) = self.url.split_once("://") else {
			return false;
		};
		scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
	}

	/// The shared-secret header value, if set.
	pub fn psk(&self) -> Option<&str> {
		self.headers.get(PSK_HEADER).map(String::as_str)
	}

	/// Sets (or overwrites) the shared-secret header.
	pub fn set_psk(&mut self, psk: &str) {
		self.headers.insert(PSK_HEADER.to_string(), psk.to_string());
	}
}

/// A listener the engine binds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontend {
	pub host: String,
	/// `0` lets the engine pick an ephemeral port.
	#[serde(default)]
	pub port: u16,
	pub endpoint: String,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Logging section of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
	#[serde(default)]
	pub level: LogLevel,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub format: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub destination: Option<String>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}
