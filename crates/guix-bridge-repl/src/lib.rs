//! Guile REPL sessions.
//!
//! Provides:
//! - `CommandBuilder` - Evaluator command lines (`-L` load path, `--listen=<port>`)
//! - `Launcher` / `ProcessLauncher` - Spawn evaluators or connect to REPL servers
//! - `Session` - One live REPL: transcript, prompt tracking, request framing

pub mod command;
pub mod helper;
pub mod launcher;
pub mod prompt;
pub mod session;

pub use command::{CommandBuildError, CommandBuilder, CommandParts, resolve_executable_path};
pub use launcher::{BoxReader, BoxWriter, Connection, LaunchError, Launcher, ProcessLauncher};
pub use prompt::{DEFAULT_PROMPT, PromptMatcher};
pub use session::{Session, SessionError};
