//! Error types for the sidecar runtime.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while assembling, launching or supervising the engine.
///
/// Unexpected engine crashes are not errors: they are recovered by respawning
/// and reported as [`SupervisorEvent::Crashed`](crate::SupervisorEvent::Crashed).
#[derive(Debug, Error)]
pub enum Error {
	/// The configuration source could not be read or parsed.
	#[error("Failed to load engine configuration from {source_desc}: {reason}")]
	ConfigLoad { source_desc: String, reason: String },

	/// No origins were configured and no origin port could be determined.
	#[error(
		"No origin configured and no origin port available. Set an explicit origin port or the {env_var} environment variable."
	)]
	MissingOriginPort { env_var: String },

	/// No engine binary is published for this platform.
	#[error("Unsupported platform: {os}-{arch}. Set SIDECAR_ENGINE_PATH to an engine binary.")]
	UnsupportedPlatform { os: String, arch: String },

	/// The platform is supported but no engine binary was found.
	#[error("Engine binary not found (searched: {})", searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
	BinaryNotFound { searched: Vec<PathBuf> },

	/// Failed to spawn the engine process.
	#[error("Failed to launch engine: {0}")]
	LaunchFailed(String),

	/// The engine did not report readiness in time; it has been killed.
	#[error("Engine did not start within {}ms", timeout.as_millis())]
	StartupTimeout { timeout: Duration },

	/// The readiness record carried an address with no usable port.
	#[error("Could not parse a port from engine address '{address}'")]
	ReadinessParse { address: String },

	/// The engine exited with the configuration-error code; it will not be restarted.
	#[error("Engine rejected its configuration (exit code {code})")]
	FatalConfiguration { code: i32 },

	/// `stop()` was called with no engine running.
	#[error("Engine is not running")]
	NotRunning,

	/// `start()` was called while an engine is already supervised.
	#[error("Engine is already running")]
	AlreadyRunning,

	/// Transport-level error (stdio communication).
	#[error("Transport error: {0}")]
	Transport(String),

	/// The supervisor task went away unexpectedly.
	#[error("Supervisor channel closed unexpectedly")]
	ChannelClosed,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this is a startup timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::StartupTimeout { .. })
	}

	/// Returns true if the error can only be fixed by changing configuration or
	/// installation, so retrying is pointless.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Error::ConfigLoad { .. }
				| Error::MissingOriginPort { .. }
				| Error::UnsupportedPlatform { .. }
				| Error::BinaryNotFound { .. }
				| Error::FatalConfiguration { .. }
		)
	}
}
