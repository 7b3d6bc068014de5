//! Client for a Guile evaluator used to query and operate on Guix.
//!
//! Provides:
//! - `ConnectionManager` - Main and internal sessions, started lazily
//! - `BridgeConfig` - Evaluator program, load path, server mode, prompt
//! - `BridgeError` - Startup, evaluation and decoding failures
//!
//! Encoding and decoding live in `guix-bridge-core` and are re-exported here.

pub mod config;
pub mod error;
pub mod manager;

pub use config::{BridgeConfig, ConfigError};
pub use error::BridgeError;
pub use guix_bridge_core::{
    Arg, Call, DecodeError, Notifier, Role, SessionEvent, SessionId, Transcript, TranscriptEntry,
    TracingNotifier, Value, decode, encode,
};
pub use guix_bridge_repl::{Launcher, Session};
pub use manager::ConnectionManager;
