//! Where forwarded engine output ends up.

use sidecar_protocol::{LogLevel, LogRecord};
use tracing::{debug, error, info, warn};

/// Receives engine output the supervisor decides to forward.
///
/// Called from the supervisor task, so implementations should not block.
pub trait DiagnosticSink: Send + Sync + 'static {
	/// A decoded log record.
	fn record(&self, record: &LogRecord);

	/// Output that could not be decoded, exactly as the engine wrote it.
	fn malformed(&self, raw: &[u8]);
}

/// Re-emits engine output as `tracing` events under the `sidecar.engine` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
	fn record(&self, record: &LogRecord) {
		let msg = record.msg().unwrap_or_default();
		let fields = serde_json::Value::Object(record.0.clone());
		match record.level() {
			Some(LogLevel::Debug) => debug!(target: "sidecar.engine", %fields, "{msg}"),
			Some(LogLevel::Info) | None => info!(target: "sidecar.engine", %fields, "{msg}"),
			Some(LogLevel::Warn) => warn!(target: "sidecar.engine", %fields, "{msg}"),
			Some(LogLevel::Error) | Some(LogLevel::Fatal) => {
				error!(target: "sidecar.engine", %fields, "{msg}")
			}
		}
	}

	fn malformed(&self, raw: &[u8]) {
		let text = String::from_utf8_lossy(raw);
		warn!(target: "sidecar.engine", raw = %text.trim_end(), "unparseable engine output");
	}
}
