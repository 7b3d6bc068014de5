//! Session roles and the notification seam.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// The role a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Interactive session for operations with visible side effects.
    Main,
    /// Session for synchronous, read-only queries.
    Internal,
}

impl Role {
    /// Human-readable session name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Main => "Guix REPL",
            Self::Internal => "Guix Internal REPL",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Main => "main",
            Self::Internal => "internal",
        })
    }
}

/// Status changes reported to the [`Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session is being started.
    Starting { role: Role },
    /// A session is ready.
    Started { role: Role, session: SessionId },
    /// A session failed to start; details are in its transcript.
    StartupFailed {
        role: Role,
        port: Option<u16>,
        message: String,
    },
    /// An interactive operation returned to the prompt.
    OperationFinished { role: Role, session: SessionId },
    /// A dead session was discarded.
    Discarded { role: Role, session: SessionId },
}

/// Receiver of session status notifications.
///
/// Implement this to surface progress in a UI; the bridge never consumes a
/// return value.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &SessionEvent);
}

/// Notifier that writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Starting { role } => {
                tracing::info!(%role, "Starting {}...", role.display_name());
            }
            SessionEvent::Started { role, session } => {
                tracing::info!(%role, %session, "{} started", role.display_name());
            }
            SessionEvent::StartupFailed {
                role,
                port,
                message,
            } => {
                tracing::error!(%role, ?port, "{} failed to start: {message}", role.display_name());
            }
            SessionEvent::OperationFinished { role, session } => {
                tracing::debug!(%role, %session, "Operation finished");
            }
            SessionEvent::Discarded { role, session } => {
                tracing::warn!(%role, %session, "Discarding dead {}", role.display_name());
            }
        }
    }
}
