//! Core building blocks for talking to a Guile evaluator.
//!
//! This crate provides:
//! - `Call` / `Arg` - Encode procedure calls into Guile source text
//! - `Value` and `decode` - Read Guile data back into host values
//! - `Reply` - The structured outcome of one evaluation
//! - `Transcript` - Retained and broadcast record of a session's traffic
//! - `Role`, `SessionEvent` and the `Notifier` trait

pub mod call;
pub mod reader;
pub mod reply;
pub mod traits;
pub mod transcript;
pub mod value;

pub use call::{Arg, Call, encode};
pub use reader::{DecodeError, decode, decode_all};
pub use reply::{Reply, ReplyError};
pub use traits::{Notifier, Role, SessionEvent, SessionId, TracingNotifier};
pub use transcript::{Transcript, TranscriptEntry};
pub use value::Value;
