//! Sidecar runtime - Engine lifecycle, output parsing, and supervision
//!
//! This crate runs a proxy engine as a child process next to a host
//! application and keeps it alive:
//!
//! - **Config assembly**: Injecting the loopback frontend, shared secret and
//!   fixed log settings into user configuration
//! - **Log stream**: Decoding the engine's JSON log records from stdout
//! - **Supervision**: Readiness detection, crash respawn, and temporary log filtering
//! - **Lifecycle**: `start()` and `stop()` for the host application
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ LifecycleController │  start / stop, StartupGate
//! └──────────┬──────────┘
//!            │ commands
//! ┌──────────▼──────────┐
//! │     Supervisor      │  single task: state, uri, respawn
//! │  ┌───────────────┐  │
//! │  │ EngineProcess │  │  stdin config, exit watcher
//! │  └───────────────┘  │
//! │  ┌───────────────┐  │
//! │  │   LogStream   │  │  stdout decoding
//! │  └───────────────┘  │
//! └──────────┬──────────┘
//!            │ uri
//! ┌──────────▼──────────┐
//! │  MiddlewareParams   │  read by request routing
//! └─────────────────────┘
//! ```

pub mod assembler;
pub mod binary;
pub mod controller;
pub mod error;
pub mod gate;
pub mod options;
pub mod params;
pub mod sink;
pub mod stream;
pub mod supervisor;

// Re-export key types at crate root
pub use assembler::{AssembledConfig, ConfigAssembler, ConfigSource};
pub use binary::resolve_engine_binary;
pub use controller::LifecycleController;
pub use error::{Error, Result};
pub use gate::{ReadySignal, StartupGate};
pub use options::SupervisorOptions;
pub use params::MiddlewareParams;
pub use sidecar_protocol::{EngineConfig, LogLevel, LogRecord, Origin};
pub use sink::{DiagnosticSink, TracingSink};
pub use stream::{LogStream, LogStreamDecoder, StreamItem};
pub use supervisor::{EXIT_CONFIG_ERROR, LevelFilter, SupervisorEvent, SupervisorState};
