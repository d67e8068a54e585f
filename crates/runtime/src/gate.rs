//! One-shot startup synchronization.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Resolves a [`StartupGate`]. Only the first call to [`notify`](Self::notify) counts.
#[derive(Debug, Clone)]
pub struct ReadySignal {
	tx: Arc<Mutex<Option<oneshot::Sender<Result<u16>>>>>,
}

impl ReadySignal {
	/// Delivers the startup outcome. Returns false if the gate was already resolved
	/// or is no longer waiting.
	pub fn notify(&self, outcome: Result<u16>) -> bool {
		match self.tx.lock().take() {
			Some(tx) => tx.send(outcome).is_ok(),
			None => false,
		}
	}

	/// Whether an outcome has already been delivered.
	pub fn is_resolved(&self) -> bool {
		self.tx.lock().is_none()
	}
}

/// Waits for the engine's readiness, bounded by a timeout.
#[derive(Debug)]
pub struct StartupGate {
	rx: oneshot::Receiver<Result<u16>>,
}

impl StartupGate {
	pub fn new() -> (ReadySignal, StartupGate) {
		let (tx, rx) = oneshot::channel();
		(
			ReadySignal {
				tx: Arc::new(Mutex::new(Some(tx))),
			},
			StartupGate { rx },
		)
	}

	/// Resolves with the listening port, or fails.
	///
	/// # Errors
	///
	/// Returns `Error::StartupTimeout` when `timeout` elapses first, the error
	/// passed to [`ReadySignal::notify`] if startup failed, and
	/// `Error::ChannelClosed` if every signal was dropped unresolved.
	pub async fn wait(self, timeout: Duration) -> Result<u16> {
		match tokio::time::timeout(timeout, self.rx).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) => Err(Error::ChannelClosed),
			Err(_) => Err(Error::StartupTimeout { timeout }),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_resolves_with_port() {
		let (signal, gate) = StartupGate::new();
		assert!(signal.notify(Ok(54321)));
		assert_eq!(gate.wait(Duration::from_secs(1)).await.unwrap(), 54321);
	}

	#[tokio::test]
	async fn test_first_writer_wins() {
		let (signal, gate) = StartupGate::new();
		let other = signal.clone();
		assert!(signal.notify(Ok(1)));
		assert!(!other.notify(Ok(2)));
		assert!(!other.notify(Err(Error::NotRunning)));
		assert!(other.is_resolved());
		assert_eq!(gate.wait(Duration::from_secs(1)).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_times_out() {
		let (signal, gate) = StartupGate::new();
		let err = gate.wait(Duration::from_millis(20)).await.unwrap_err();
		assert!(err.is_timeout());
		// Late readiness after the timeout has no effect.
		assert!(!signal.notify(Ok(80)));
	}

	#[tokio::test]
	async fn test_failure_is_propagated() {
		let (signal, gate) = StartupGate::new();
		signal.notify(Err(Error::ReadinessParse {
			address: "nowhere".to_string(),
		}));
		let err = gate.wait(Duration::from_secs(1)).await.unwrap_err();
		assert!(matches!(err, Error::ReadinessParse { .. }));
	}

	#[tokio::test]
	async fn test_dropped_signal_closes_gate() {
		let (signal, gate) = StartupGate::new();
		drop(signal);
		let err = gate.wait(Duration::from_secs(1)).await.unwrap_err();
		assert!(matches!(err, Error::ChannelClosed));
	}
}
