//! Supervisor configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::binary::CONFIG_STDIN_ARG;
use crate::sink::{DiagnosticSink, TracingSink};

/// Default inbound endpoint path.
pub const DEFAULT_ENDPOINT: &str = "/graphql";

/// Environment variable consulted for the host application's port.
pub const DEFAULT_PORT_ENV: &str = "PORT";

/// Fully owned supervisor configuration.
///
/// Everything here is fixed for the supervisor's life; each engine spawn reads
/// from the same options.
#[derive(Clone)]
pub struct SupervisorOptions {
	/// Engine executable. Resolved from the environment when unset.
	pub binary: Option<PathBuf>,
	/// Arguments passed to the engine.
	pub args: Vec<String>,
	/// Path the engine serves inbound traffic on.
	pub endpoint: String,
	/// Port of the host application, used for the synthetic origin.
	pub origin_port: Option<u16>,
	/// Environment variable read when `origin_port` is unset.
	pub port_env: String,
	/// Path appended to the synthetic origin URL.
	pub origin_path: String,
	/// Diagnostic flag passed through to middleware.
	pub dump_traffic: bool,
	/// How long `start()` waits for the readiness record.
	pub startup_timeout: Duration,
	/// How long the startup log filter outlives readiness.
	pub level_grace: Duration,
	/// Pause before respawning a crashed engine.
	pub restart_delay: Duration,
	/// How long `stop()` waits after the termination signal before killing.
	pub stop_timeout: Duration,
	/// Where engine log records are forwarded.
	pub sink: Arc<dyn DiagnosticSink>,
}

impl Default for SupervisorOptions {
	fn default() -> Self {
		Self {
			binary: None,
			args: vec![CONFIG_STDIN_ARG.to_string()],
			endpoint: DEFAULT_ENDPOINT.to_string(),
			origin_port: None,
			port_env: DEFAULT_PORT_ENV.to_string(),
			origin_path: DEFAULT_ENDPOINT.to_string(),
			dump_traffic: false,
			startup_timeout: Duration::from_millis(1000),
			level_grace: Duration::from_secs(1),
			restart_delay: Duration::ZERO,
			stop_timeout: Duration::from_secs(5),
			sink: Arc::new(TracingSink),
		}
	}
}

impl SupervisorOptions {
	pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
		self.binary = Some(binary.into());
		self
	}

	pub fn with_args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = endpoint.into();
		self
	}

	pub fn with_origin_port(mut self, port: u16) -> Self {
		self.origin_port = Some(port);
		self
	}

	pub fn with_port_env(mut self, name: impl Into<String>) -> Self {
		self.port_env = name.into();
		self
	}

	pub fn with_origin_path(mut self, path: impl Into<String>) -> Self {
		self.origin_path = path.into();
		self
	}

	pub fn with_dump_traffic(mut self, dump: bool) -> Self {
		self.dump_traffic = dump;
		self
	}

	pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
		self.startup_timeout = timeout;
		self
	}

	pub fn with_level_grace(mut self, grace: Duration) -> Self {
		self.level_grace = grace;
		self
	}

	pub fn with_restart_delay(mut self, delay: Duration) -> Self {
		self.restart_delay = delay;
		self
	}

	pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
		self.stop_timeout = timeout;
		self
	}

	pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
		self.sink = sink;
		self
	}
}

impl std::fmt::Debug for SupervisorOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SupervisorOptions")
			.field("binary", &self.binary)
			.field("args", &self.args)
			.field("endpoint", &self.endpoint)
			.field("origin_port", &self.origin_port)
			.field("port_env", &self.port_env)
			.field("origin_path", &self.origin_path)
			.field("dump_traffic", &self.dump_traffic)
			.field("startup_timeout", &self.startup_timeout)
			.field("level_grace", &self.level_grace)
			.field("restart_delay", &self.restart_delay)
			.field("stop_timeout", &self.stop_timeout)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_engine_contract() {
		let options = SupervisorOptions::default();
		assert_eq!(options.args, vec!["--config-stdin".to_string()]);
		assert_eq!(options.startup_timeout, Duration::from_millis(1000));
		assert_eq!(options.level_grace, Duration::from_secs(1));
		assert_eq!(options.restart_delay, Duration::ZERO);
		assert_eq!(options.port_env, "PORT");
	}

	#[test]
	fn builders_override_fields() {
		let options = SupervisorOptions::default()
			.with_binary("/opt/engine")
			.with_origin_port(4000)
			.with_args(["run", "-"]);
		assert_eq!(options.binary, Some(PathBuf::from("/opt/engine")));
		assert_eq!(options.origin_port, Some(4000));
		assert_eq!(options.args, vec!["run".to_string(), "-".to_string()]);
	}
}
