//! Wire types for the sidecar engine.
//!
//! The engine is an opaque proxy process. It reads a JSON configuration
//! document on stdin and writes newline-delimited JSON log records on stdout.
//! This crate holds the shapes of both, as they appear on the wire:
//!
//! - [`EngineConfig`] - the configuration document written to the engine
//! - [`LogRecord`] - one decoded log record read back from the engine
//! - [`LogLevel`] - the severity scale shared by both
//!
//! Types here carry no process or I/O behavior; that lives in `sidecar-runtime`.

pub mod config;
pub mod level;
pub mod record;

pub use config::*;
pub use level::*;
pub use record::*;
