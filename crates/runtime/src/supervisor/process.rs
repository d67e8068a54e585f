//! One engine process: spawn, stdin writes, output and exit forwarding.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::sleep_until;

use crate::error::{Error, Result};
use crate::stream::{LogStream, StreamItem};

/// How long an exited engine's remaining output is awaited before its exit is
/// reported. Bounded because a grandchild may keep stdout open.
const OUTPUT_DRAIN: Duration = Duration::from_millis(250);

/// What the supervisor hears about a child, tagged with its generation.
#[derive(Debug)]
pub(crate) enum ChildEvent {
	Output {
		generation: u64,
		item: StreamItem,
	},
	Exit {
		generation: u64,
		status: std::io::Result<ExitStatus>,
	},
}

/// How a child should be brought down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
	/// Termination signal, escalating to a kill after the stop timeout.
	Graceful,
	/// Immediate kill.
	Forced,
}

/// Handle to a running engine. The `Child` itself lives in its exit watcher.
#[derive(Debug)]
pub(crate) struct EngineProcess {
	pub(crate) generation: u64,
	pub(crate) pid: Option<u32>,
	documents: mpsc::UnboundedSender<Vec<u8>>,
	control: mpsc::UnboundedSender<Termination>,
}

impl EngineProcess {
	/// Launches the engine and queues `document` for its stdin.
	///
	/// Stdout is decoded by a [`LogStream`]; stderr is inherited. Output and
	/// the eventual exit status arrive on `events`.
	///
	/// # Errors
	///
	/// Returns `Error::LaunchFailed` if the process cannot be spawned.
	pub(crate) fn spawn(
		program: &Path,
		args: &[String],
		generation: u64,
		document: &[u8],
		stop_timeout: Duration,
		events: mpsc::UnboundedSender<ChildEvent>,
	) -> Result<Self> {
		let mut child = Command::new(program)
			.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| {
				Error::LaunchFailed(format!("Failed to spawn {}: {}", program.display(), e))
			})?;

		let pid = child.id();
		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| Error::LaunchFailed("engine stdin was not piped".to_string()))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| Error::LaunchFailed("engine stdout was not piped".to_string()))?;

		let output = forward_output(generation, stdout, events.clone());

		let (control, control_rx) = mpsc::unbounded_channel();
		tokio::spawn(watch_exit(
			generation,
			child,
			control_rx,
			stop_timeout,
			output,
			events,
		));

		let (documents, documents_rx) = mpsc::unbounded_channel();
		tokio::spawn(write_documents(generation, stdin, documents_rx));

		let process = Self {
			generation,
			pid,
			documents,
			control,
		};
		process.send_document(document);
		Ok(process)
	}

	/// Queues one configuration delivery for the stdin writer.
	///
	/// Never waits on the pipe, so an engine that is slow to read stdin cannot
	/// hold up startup or the supervisor.
	pub(crate) fn send_document(&self, document: &[u8]) {
		let _ = self.documents.send(document.to_vec());
	}

	pub(crate) fn terminate(&self, how: Termination) {
		let _ = self.control.send(how);
	}
}

/// Writes queued deliveries in order until the engine goes away.
///
/// A failed write means the engine is exiting; its exit event follows, so the
/// failure is only logged. Stdin closes once the `EngineProcess` is dropped.
async fn write_documents(
	generation: u64,
	mut stdin: ChildStdin,
	mut documents: mpsc::UnboundedReceiver<Vec<u8>>,
) {
	while let Some(document) = documents.recv().await {
		let result = async {
			stdin.write_all(&document).await?;
			stdin.flush().await
		}
		.await;
		if let Err(e) = result {
			warn!(
				target: "sidecar.supervisor",
				generation,
				error = %e,
				"failed to write configuration to engine stdin"
			);
			break;
		}
	}
}

fn forward_output<R>(
	generation: u64,
	stdout: R,
	events: mpsc::UnboundedSender<ChildEvent>,
) -> JoinHandle<()>
where
	R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
	let (stream, mut items) = LogStream::new(stdout);
	tokio::spawn(async move {
		if let Err(e) = stream.run().await {
			debug!(target: "sidecar.supervisor", generation, error = %e, "engine stdout closed");
		}
	});
	tokio::spawn(async move {
		while let Some(item) = items.recv().await {
			if events.send(ChildEvent::Output { generation, item }).is_err() {
				break;
			}
		}
	})
}

async fn watch_exit(
	generation: u64,
	mut child: Child,
	mut control: mpsc::UnboundedReceiver<Termination>,
	stop_timeout: Duration,
	output: JoinHandle<()>,
	events: mpsc::UnboundedSender<ChildEvent>,
) {
	let mut kill_at: Option<Instant> = None;
	let status = loop {
		tokio::select! {
			status = child.wait() => break status,
			Some(how) = control.recv() => match how {
				Termination::Graceful if kill_at.is_some() => {}
				Termination::Graceful if signal_terminate(&child) => {
					kill_at = Some(Instant::now() + stop_timeout);
				}
				_ => force_kill(&mut child, generation),
			},
			_ = sleep_until(kill_at) => {
				warn!(
					target: "sidecar.supervisor",
					generation,
					timeout_ms = stop_timeout.as_millis() as u64,
					"engine ignored termination signal; killing"
				);
				kill_at = None;
				force_kill(&mut child, generation);
			}
		}
	};

	// Output events precede the exit event on the same channel.
	if tokio::time::timeout(OUTPUT_DRAIN, output).await.is_err() {
		debug!(target: "sidecar.supervisor", generation, "engine stdout still open after exit");
	}
	let _ = events.send(ChildEvent::Exit { generation, status });
}

fn force_kill(child: &mut Child, generation: u64) {
	if let Err(e) = child.start_kill() {
		debug!(target: "sidecar.supervisor", generation, error = %e, "kill failed");
	}
}

/// Sends SIGTERM. Returns false when no signal could be sent.
#[cfg(unix)]
fn signal_terminate(child: &Child) -> bool {
	let Some(pid) = child.id() else {
		return false;
	};
	let Ok(pid) = libc::pid_t::try_from(pid) else {
		return false;
	};
	unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn signal_terminate(_child: &Child) -> bool {
	false
}
