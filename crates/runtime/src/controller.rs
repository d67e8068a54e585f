//! Public start/stop surface over the supervisor.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tracing::{info, warn};

use crate::assembler::{AssembledConfig, ConfigAssembler, ConfigSource};
use crate::binary::resolve_engine_binary;
use crate::error::{Error, Result};
use crate::gate::StartupGate;
use crate::options::SupervisorOptions;
use crate::params::MiddlewareParams;
use crate::supervisor::{
	self, Command, SupervisorContext, SupervisorEvent, SupervisorHandle, SupervisorState,
	Termination,
};

const EVENT_CAPACITY: usize = 64;

/// Owns one engine: starts it, keeps it alive and stops it.
///
/// # Example
///
/// ```ignore
/// use sidecar::{LifecycleController, SupervisorOptions};
///
/// let controller = LifecycleController::new(
///     std::path::PathBuf::from("engine.json"),
///     SupervisorOptions::default().with_origin_port(4000),
/// )?;
/// let port = controller.start().await?;
/// let params = controller.params().clone(); // hand to middleware
/// // ...
/// controller.stop().await?;
/// ```
pub struct LifecycleController {
	program: PathBuf,
	options: SupervisorOptions,
	params: MiddlewareParams,
	config: AssembledConfig,
	state: Arc<watch::Sender<SupervisorState>>,
	events: broadcast::Sender<SupervisorEvent>,
	supervisor: Mutex<Option<SupervisorHandle>>,
}

impl LifecycleController {
	/// Resolves the engine binary and assembles its configuration.
	///
	/// Nothing is spawned until [`start`](Self::start).
	///
	/// # Errors
	///
	/// Returns binary resolution errors and configuration errors from
	/// [`ConfigAssembler::assemble`].
	pub fn new(source: impl Into<ConfigSource>, options: SupervisorOptions) -> Result<Self> {
		let program = resolve_engine_binary(options.binary.as_deref())?;
		let params = MiddlewareParams::new(options.endpoint.clone(), options.dump_traffic);
		let config = ConfigAssembler::new(&params, &options).assemble(source.into())?;
		let (state, _) = watch::channel(SupervisorState::NotStarted);
		let (events, _) = broadcast::channel(EVENT_CAPACITY);

		Ok(Self {
			program,
			options,
			params,
			config,
			state: Arc::new(state),
			events,
			supervisor: Mutex::new(None),
		})
	}

	/// Spawns the engine and waits for it to report readiness.
	///
	/// Returns the port the engine listens on. On failure the engine has
	/// already been killed.
	///
	/// # Errors
	///
	/// - `Error::AlreadyRunning` while a previous start is still supervised
	/// - `Error::LaunchFailed` if the engine cannot be spawned
	/// - `Error::StartupTimeout` if readiness is not reported in time
	/// - `Error::ReadinessParse` if the readiness record has no usable port
	/// - `Error::FatalConfiguration` if the engine rejects its configuration
	pub async fn start(&self) -> Result<u16> {
		let mut slot = self.supervisor.lock().await;
		if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
			return Err(Error::AlreadyRunning);
		}

		let (signal, gate) = StartupGate::new();
		let handle = supervisor::launch(self.context(), signal)?;

		match gate.wait(self.options.startup_timeout).await {
			Ok(port) => {
				info!(target: "sidecar.controller", port, "engine started");
				*slot = Some(handle);
				Ok(port)
			}
			Err(e) => {
				warn!(target: "sidecar.controller", error = %e, "engine failed to start; killing");
				if let Ok(()) = request_stop(&handle, Termination::Forced).await {
					handle.join().await;
				}
				Err(e)
			}
		}
	}

	/// Stops the engine and waits for it to exit.
	///
	/// The engine gets a termination signal first and is killed if it is still
	/// alive after [`SupervisorOptions::stop_timeout`]. A pending respawn is
	/// cancelled.
	///
	/// # Errors
	///
	/// Returns `Error::NotRunning` if no engine is being supervised.
	pub async fn stop(&self) -> Result<()> {
		let mut slot = self.supervisor.lock().await;
		let Some(handle) = slot.take() else {
			return Err(Error::NotRunning);
		};
		request_stop(&handle, Termination::Graceful).await?;
		handle.join().await;
		info!(target: "sidecar.controller", "engine stopped");
		Ok(())
	}

	/// Values for request-routing middleware. Stays valid across restarts.
	pub fn params(&self) -> &MiddlewareParams {
		&self.params
	}

	/// The configuration every spawn starts from.
	pub fn config(&self) -> &AssembledConfig {
		&self.config
	}

	/// Path of the engine binary in use.
	pub fn program(&self) -> &std::path::Path {
		&self.program
	}

	pub fn state(&self) -> SupervisorState {
		*self.state.borrow()
	}

	/// Receiver that observes every state transition.
	pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
		self.state.subscribe()
	}

	/// Subscribes to engine lifecycle events from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
		self.events.subscribe()
	}

	fn context(&self) -> SupervisorContext {
		SupervisorContext {
			program: self.program.clone(),
			args: self.options.args.clone(),
			config: self.config.clone(),
			params: self.params.clone(),
			sink: Arc::clone(&self.options.sink),
			level_grace: self.options.level_grace,
			restart_delay: self.options.restart_delay,
			stop_timeout: self.options.stop_timeout,
			state: Arc::clone(&self.state),
			events: self.events.clone(),
		}
	}
}

impl std::fmt::Debug for LifecycleController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LifecycleController")
			.field("program", &self.program)
			.field("state", &self.state())
			.field("params", &self.params)
			.finish_non_exhaustive()
	}
}

/// Asks the supervisor to stop and waits until the engine has exited.
///
/// A supervisor that has already finished reports `Error::NotRunning`.
async fn request_stop(handle: &SupervisorHandle, how: Termination) -> Result<()> {
	let (reply, done) = oneshot::channel();
	handle
		.commands
		.send(Command::Stop { how, reply })
		.map_err(|_| Error::NotRunning)?;
	done.await.map_err(|_| Error::NotRunning)?
}
