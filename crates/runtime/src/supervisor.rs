//! Engine supervision
//!
//! A single task owns the engine process and is the only writer of
//! [`MiddlewareParams::uri`] and of the lifecycle state. Engine output, engine
//! exit, commands from the controller and timers are all multiplexed onto that
//! one task, so transitions never interleave.
//!
//! ```text
//! NotStarted -> Starting -> Running -> Stopping -> Stopped
//!                  ^           |
//!                  |        (exit)
//!                  |           v
//!                  +------- Crashed        (exit code 78) -> Failed
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sidecar_protocol::{LogLevel, LogRecord};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::assembler::AssembledConfig;
use crate::error::{Error, Result};
use crate::gate::ReadySignal;
use crate::params::MiddlewareParams;
use crate::sink::DiagnosticSink;
use crate::stream::StreamItem;

mod process;

pub(crate) use process::Termination;
use process::{ChildEvent, EngineProcess};

/// Exit code the engine uses for an invalid configuration.
pub const EXIT_CONFIG_ERROR: i32 = 78;

/// Lifecycle of the supervised engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorState {
	#[default]
	NotStarted,
	/// Spawned, waiting for the readiness record.
	Starting,
	/// Ready and reachable at [`MiddlewareParams::uri`].
	Running,
	/// `stop()` requested; waiting for the process to exit.
	Stopping,
	/// Exited unexpectedly; a respawn is pending.
	Crashed,
	Stopped,
	/// The engine rejected its configuration, or could not be respawned.
	Failed,
}

impl SupervisorState {
	/// Whether the supervisor has given up the engine for good.
	pub fn is_terminal(&self) -> bool {
		matches!(self, SupervisorState::Stopped | SupervisorState::Failed)
	}
}

/// Notable things that happen to the engine, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
	Spawned { generation: u64, pid: Option<u32> },
	Ready { port: u16 },
	/// Unexpected exit; a replacement is being spawned.
	Crashed { code: Option<i32>, signal: Option<i32> },
	/// Exit with [`EXIT_CONFIG_ERROR`]; no replacement will be spawned.
	FatalConfiguration { code: i32 },
	/// A respawn failed to launch; supervision has ended.
	SpawnFailed { reason: String },
	/// The engine exited after `stop()`.
	Exited,
}

/// Passes records at or above a threshold.
///
/// Records without a recognizable level are held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelFilter {
	threshold: LogLevel,
}

impl LevelFilter {
	pub fn at_least(threshold: LogLevel) -> Self {
		Self { threshold }
	}

	pub fn allows(&self, record: &LogRecord) -> bool {
		record.level().is_some_and(|level| level >= self.threshold)
	}
}

/// Parses the port out of a `host:port` address.
pub fn parse_port(address: &str) -> Option<u16> {
	let (_, port) = address.rsplit_once(':')?;
	port.parse().ok()
}

pub(crate) enum Command {
	Stop {
		how: Termination,
		reply: oneshot::Sender<Result<()>>,
	},
}

/// Everything a supervisor task needs, fixed for its lifetime.
pub(crate) struct SupervisorContext {
	pub(crate) program: PathBuf,
	pub(crate) args: Vec<String>,
	pub(crate) config: AssembledConfig,
	pub(crate) params: MiddlewareParams,
	pub(crate) sink: Arc<dyn DiagnosticSink>,
	pub(crate) level_grace: Duration,
	pub(crate) restart_delay: Duration,
	pub(crate) stop_timeout: Duration,
	pub(crate) state: Arc<watch::Sender<SupervisorState>>,
	pub(crate) events: broadcast::Sender<SupervisorEvent>,
}

/// Controller-side handle on a running supervisor task.
pub(crate) struct SupervisorHandle {
	pub(crate) commands: mpsc::UnboundedSender<Command>,
	task: JoinHandle<()>,
}

impl SupervisorHandle {
	pub(crate) fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	/// Waits for the supervisor task to return.
	pub(crate) async fn join(self) {
		if let Err(e) = self.task.await {
			warn!(target: "sidecar.supervisor", error = %e, "supervisor task failed");
		}
	}
}

/// Spawns the first engine and hands it to a new supervisor task.
///
/// # Errors
///
/// Returns the spawn error if the first engine cannot be launched; no task is
/// left behind.
pub(crate) fn launch(ctx: SupervisorContext, ready: ReadySignal) -> Result<SupervisorHandle> {
	let (child_tx, child_rx) = mpsc::unbounded_channel();
	let (commands_tx, commands_rx) = mpsc::unbounded_channel();

	let mut supervisor = Supervisor {
		ctx,
		child_tx,
		child_rx,
		commands: commands_rx,
		detached: false,
		ready,
		generation: 0,
		engine: None,
		filter: None,
		lift_filter_at: None,
		respawn_at: None,
		stop_replies: Vec::new(),
	};
	if let Err(e) = supervisor.spawn_engine() {
		supervisor.set_state(SupervisorState::Stopped);
		return Err(e);
	}

	let task = tokio::spawn(supervisor.run());
	Ok(SupervisorHandle {
		commands: commands_tx,
		task,
	})
}

struct Supervisor {
	ctx: SupervisorContext,
	child_tx: mpsc::UnboundedSender<ChildEvent>,
	child_rx: mpsc::UnboundedReceiver<ChildEvent>,
	commands: mpsc::UnboundedReceiver<Command>,
	detached: bool,
	ready: ReadySignal,
	generation: u64,
	engine: Option<EngineProcess>,
	filter: Option<LevelFilter>,
	lift_filter_at: Option<Instant>,
	respawn_at: Option<Instant>,
	stop_replies: Vec<oneshot::Sender<Result<()>>>,
}

impl Supervisor {
	async fn run(mut self) {
		loop {
			if self.engine.is_none() && self.state().is_terminal() {
				break;
			}

			tokio::select! {
				Some(event) = self.child_rx.recv() => self.on_child_event(event),
				command = self.commands.recv(), if !self.detached => match command {
					Some(command) => self.on_command(command),
					None => {
						debug!(target: "sidecar.supervisor", "controller dropped; stopping engine");
						self.detached = true;
						self.begin_stop(Termination::Forced);
					}
				},
				_ = sleep_until(self.lift_filter_at) => {
					self.lift_filter_at = None;
					self.filter = None;
					debug!(target: "sidecar.supervisor", "startup log filter lifted");
				}
				_ = sleep_until(self.respawn_at) => {
					self.respawn_at = None;
					self.respawn();
				}
			}
		}
		debug!(target: "sidecar.supervisor", state = ?self.state(), "supervisor finished");
	}

	fn state(&self) -> SupervisorState {
		*self.ctx.state.borrow()
	}

	fn set_state(&self, state: SupervisorState) {
		let previous = self.ctx.state.send_replace(state);
		if previous != state {
			debug!(target: "sidecar.supervisor", from = ?previous, to = ?state, "state transition");
		}
	}

	fn emit(&self, event: SupervisorEvent) {
		let _ = self.ctx.events.send(event);
	}

	/// Spawns a fresh engine from the unmodified base configuration.
	fn spawn_engine(&mut self) -> Result<()> {
		let config = &self.ctx.config;
		let requested = config.requested_level();
		let document = config.render(config.startup_level())?;

		self.generation += 1;
		let engine = EngineProcess::spawn(
			&self.ctx.program,
			&self.ctx.args,
			self.generation,
			&document,
			self.ctx.stop_timeout,
			self.child_tx.clone(),
		)?;

		self.filter = requested
			.suppresses_info()
			.then(|| LevelFilter::at_least(requested));
		self.lift_filter_at = None;

		info!(
			target: "sidecar.supervisor",
			generation = engine.generation,
			pid = ?engine.pid,
			program = %self.ctx.program.display(),
			"engine spawned"
		);
		self.emit(SupervisorEvent::Spawned {
			generation: engine.generation,
			pid: engine.pid,
		});
		self.engine = Some(engine);
		self.set_state(SupervisorState::Starting);
		Ok(())
	}

	fn respawn(&mut self) {
		if let Err(e) = self.spawn_engine() {
			error!(target: "sidecar.supervisor", error = %e, "failed to respawn engine");
			self.emit(SupervisorEvent::SpawnFailed {
				reason: e.to_string(),
			});
			self.set_state(SupervisorState::Failed);
			self.ready.notify(Err(e));
			self.answer_stop_replies();
		}
	}

	fn on_command(&mut self, command: Command) {
		match command {
			Command::Stop { how, reply } => {
				if self.engine.is_some() {
					self.stop_replies.push(reply);
					self.begin_stop(how);
				} else if self.state() == SupervisorState::Crashed {
					// Between a crash and its respawn: cancel the respawn.
					self.respawn_at = None;
					self.set_state(SupervisorState::Stopped);
					let _ = reply.send(Ok(()));
				} else {
					let _ = reply.send(Err(Error::NotRunning));
				}
			}
		}
	}

	fn begin_stop(&mut self, how: Termination) {
		self.respawn_at = None;
		let Some(engine) = &self.engine else {
			if !self.state().is_terminal() {
				self.set_state(SupervisorState::Stopped);
			}
			return;
		};
		// Middleware must stop routing before the engine goes away.
		self.ctx.params.clear_uri();
		if self.state() != SupervisorState::Stopping {
			info!(target: "sidecar.supervisor", generation = engine.generation, ?how, "stopping engine");
			self.set_state(SupervisorState::Stopping);
		}
		engine.terminate(how);
	}

	fn on_child_event(&mut self, event: ChildEvent) {
		match event {
			ChildEvent::Output { generation, item } => match item {
				StreamItem::Record(record) => {
					if generation == self.generation && record.is_ready() {
						self.on_ready(&record);
					}
					if self.filter.is_none_or(|filter| filter.allows(&record)) {
						self.ctx.sink.record(&record);
					}
				}
				StreamItem::Malformed(raw) => self.ctx.sink.malformed(&raw),
			},
			ChildEvent::Exit { generation, status } => {
				if generation != self.generation {
					return;
				}
				self.on_exit(status);
			}
		}
	}

	fn on_ready(&mut self, record: &LogRecord) {
		if self.state() != SupervisorState::Starting {
			return;
		}
		let address = record.address().unwrap_or_default().to_string();
		let Some(port) = parse_port(&address) else {
			error!(target: "sidecar.supervisor", %address, "readiness record without a usable port");
			self.ready.notify(Err(Error::ReadinessParse { address }));
			return;
		};

		self.ctx.params.set_uri(format!("http://{address}"));
		self.set_state(SupervisorState::Running);
		info!(target: "sidecar.supervisor", %address, port, "engine ready");
		self.emit(SupervisorEvent::Ready { port });
		self.ready.notify(Ok(port));

		if self.filter.is_some() {
			let requested = self.ctx.config.requested_level();
			match self.ctx.config.render(requested) {
				Ok(document) => {
					if let Some(engine) = &self.engine {
						engine.send_document(&document);
					}
					debug!(target: "sidecar.supervisor", level = %requested, "restored requested log level");
				}
				Err(e) => {
					error!(target: "sidecar.supervisor", error = %e, "failed to render configuration")
				}
			}
			self.lift_filter_at = Some(Instant::now() + self.ctx.level_grace);
		}
	}

	fn on_exit(&mut self, status: std::io::Result<std::process::ExitStatus>) {
		self.engine = None;
		self.filter = None;
		self.lift_filter_at = None;
		self.ctx.params.clear_uri();

		if self.state() == SupervisorState::Stopping {
			info!(target: "sidecar.supervisor", generation = self.generation, "engine stopped");
			self.set_state(SupervisorState::Stopped);
			self.emit(SupervisorEvent::Exited);
			self.answer_stop_replies();
			return;
		}

		let (code, signal) = match &status {
			Ok(status) => (status.code(), exit_signal(status)),
			Err(e) => {
				warn!(target: "sidecar.supervisor", error = %e, "failed to collect engine exit status");
				(None, None)
			}
		};

		if code == Some(EXIT_CONFIG_ERROR) {
			error!(
				target: "sidecar.supervisor",
				code = EXIT_CONFIG_ERROR,
				"engine rejected its configuration; not restarting"
			);
			self.set_state(SupervisorState::Failed);
			self.emit(SupervisorEvent::FatalConfiguration {
				code: EXIT_CONFIG_ERROR,
			});
			self.ready.notify(Err(Error::FatalConfiguration {
				code: EXIT_CONFIG_ERROR,
			}));
			return;
		}

		warn!(
			target: "sidecar.supervisor",
			generation = self.generation,
			?code,
			?signal,
			"engine exited unexpectedly; restarting"
		);
		self.set_state(SupervisorState::Crashed);
		self.emit(SupervisorEvent::Crashed { code, signal });
		self.respawn_at = Some(Instant::now() + self.ctx.restart_delay);
	}

	fn answer_stop_replies(&mut self) {
		for reply in self.stop_replies.drain(..) {
			let _ = reply.send(Ok(()));
		}
	}
}

pub(crate) async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
	use std::os::unix::process::ExitStatusExt;
	status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
	None
}
