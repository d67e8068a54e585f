//! Builds the configuration document handed to the engine.
//!
//! The user's document is taken as-is and three things are layered on top:
//!
//! - a loopback frontend on an ephemeral port, serving [`MiddlewareParams::endpoint`]
//! - the shared secret on every HTTP origin, or a synthetic origin pointing at the
//!   host application when none are configured
//! - fixed log format and destination, so the supervisor can parse stdout
//!
//! The result is an immutable [`AssembledConfig`]. Each delivery to the engine
//! renders a fresh copy from it, so a level override on one delivery never
//! leaks into the next spawn.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use sidecar_protocol::{EngineConfig, Frontend, LOG_DESTINATION, LOG_FORMAT, LogLevel, Origin};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::options::SupervisorOptions;
use crate::params::MiddlewareParams;

/// Host of the synthetic frontend and origin.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Where the user configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
	/// An already-typed document.
	Document(EngineConfig),
	/// A parsed but untyped JSON document.
	Value(Value),
	/// A JSON file on disk.
	Path(PathBuf),
}

impl From<EngineConfig> for ConfigSource {
	fn from(config: EngineConfig) -> Self {
		ConfigSource::Document(config)
	}
}

impl From<Value> for ConfigSource {
	fn from(value: Value) -> Self {
		ConfigSource::Value(value)
	}
}

impl From<PathBuf> for ConfigSource {
	fn from(path: PathBuf) -> Self {
		ConfigSource::Path(path)
	}
}

impl From<&Path> for ConfigSource {
	fn from(path: &Path) -> Self {
		ConfigSource::Path(path.to_path_buf())
	}
}

impl ConfigSource {
	fn load(self) -> Result<EngineConfig> {
		match self {
			ConfigSource::Document(config) => Ok(config),
			ConfigSource::Value(value) => {
				serde_json::from_value(value).map_err(|e| Error::ConfigLoad {
					source_desc: "inline document".to_string(),
					reason: e.to_string(),
				})
			}
			ConfigSource::Path(path) => {
				let source_desc = path.display().to_string();
				let text = std::fs::read_to_string(&path).map_err(|e| Error::ConfigLoad {
					source_desc: source_desc.clone(),
					reason: e.to_string(),
				})?;
				serde_json::from_str(&text).map_err(|e| Error::ConfigLoad {
					source_desc,
					reason: e.to_string(),
				})
			}
		}
	}
}

/// The engine configuration after injection, shared read-only by every spawn.
#[derive(Debug, Clone)]
pub struct AssembledConfig {
	base: Arc<EngineConfig>,
}

impl AssembledConfig {
	pub fn document(&self) -> &EngineConfig {
		&self.base
	}

	/// The level the user asked for.
	pub fn requested_level(&self) -> LogLevel {
		self.base.logging.level
	}

	/// The level the first delivery to a fresh engine carries.
	///
	/// Levels that would hide the `info` readiness record are lowered to `info`.
	pub fn startup_level(&self) -> LogLevel {
		let requested = self.requested_level();
		if requested.suppresses_info() {
			LogLevel::Info
		} else {
			requested
		}
	}

	/// Renders one delivery: compact JSON at `level`, terminated by a newline.
	pub fn render(&self, level: LogLevel) -> Result<Vec<u8>> {
		let mut document = EngineConfig::clone(&self.base);
		document.logging.level = level;
		let mut bytes = serde_json::to_vec(&document)?;
		bytes.push(b'\n');
		Ok(bytes)
	}
}

/// Injects the supervisor's pieces into user configuration.
#[derive(Debug, Clone)]
pub struct ConfigAssembler {
	endpoint: String,
	psk: String,
	origin_port: Option<u16>,
	port_env: String,
	origin_path: String,
}

impl ConfigAssembler {
	pub fn new(params: &MiddlewareParams, options: &SupervisorOptions) -> Self {
		Self {
			endpoint: params.endpoint().to_string(),
			psk: params.psk().to_string(),
			origin_port: options.origin_port,
			port_env: options.port_env.clone(),
			origin_path: options.origin_path.clone(),
		}
	}

	/// Loads `source` and produces the final document.
	///
	/// # Errors
	///
	/// Returns `Error::ConfigLoad` if the source cannot be read or parsed, and
	/// `Error::MissingOriginPort` if an origin must be synthesized but no port
	/// is configured.
	pub fn assemble(&self, source: ConfigSource) -> Result<AssembledConfig> {
		self.assemble_with_env(source, |name| std::env::var(name).ok())
	}

	fn assemble_with_env<F>(&self, source: ConfigSource, env: F) -> Result<AssembledConfig>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = source.load()?;

		config.frontends.push(Frontend {
			host: LOOPBACK_HOST.to_string(),
			port: 0,
			endpoint: self.endpoint.clone(),
			..Default::default()
		});

		if config.origins.is_empty() {
			let port = self.origin_port(&env)?;
			let mut origin = Origin::new(format!("http://{LOOPBACK_HOST}:{port}{}", self.origin_path));
			origin.set_psk(&self.psk);
			debug!(target: "sidecar.config", url = %origin.url, "synthesized origin");
			config.origins.push(origin);
		} else {
			for origin in config.origins.iter_mut().filter(|o| o.is_http()) {
				origin.set_psk(&self.psk);
			}
		}

		force_value(&mut config.logging.format, LOG_FORMAT, "logging.format");
		force_value(&mut config.logging.destination, LOG_DESTINATION, "logging.destination");

		Ok(AssembledConfig {
			base: Arc::new(config),
		})
	}

	fn origin_port<F>(&self, env: &F) -> Result<u16>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(port) = self.origin_port {
			return Ok(port);
		}

		let missing = || Error::MissingOriginPort {
			env_var: self.port_env.clone(),
		};
		let raw = env(&self.port_env).ok_or_else(missing)?;
		match raw.trim().parse::<u16>() {
			Ok(port) if port != 0 => Ok(port),
			_ => {
				warn!(
					target: "sidecar.config",
					var = %self.port_env,
					value = %raw,
					"ignoring unusable origin port"
				);
				Err(missing())
			}
		}
	}
}

fn force_value(field: &mut Option<String>, wanted: &str, name: &str) {
	if let Some(current) = field.as_deref() {
		if !current.eq_ignore_ascii_case(wanted) {
			warn!(
				target: "sidecar.config",
				field = name,
				configured = current,
				forced = wanted,
				"overriding unsupported logging setting"
			);
		}
	}
	*field = Some(wanted.to_string());
}

#[cfg(test)]
mod tests;
