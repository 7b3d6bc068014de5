//! Errors reported to bridge callers.

use guix_bridge_core::{DecodeError, Role};
use guix_bridge_repl::SessionError;
use thiserror::Error;

use crate::config::ConfigError;

/// Bridge error.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A session could not be started. Its output is kept in the role's
    /// transcript (`transcript` names it).
    #[error("{transcript} failed to start: {reason}. See the \"{transcript}\" transcript for details")]
    StartupFailure {
        role: Role,
        port: Option<u16>,
        transcript: &'static str,
        reason: String,
    },
    /// The evaluator reported an error, or the session went away before it
    /// replied (`key` is `None` then).
    #[error("Error in evaluating guile expression: {diagnostic}")]
    Evaluation {
        key: Option<String>,
        diagnostic: String,
    },
    #[error("Cannot decode evaluation result: {0}")]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    pub(crate) fn startup(role: Role, port: Option<u16>, reason: impl Into<String>) -> Self {
        Self::StartupFailure {
            role,
            port,
            transcript: role.display_name(),
            reason: reason.into(),
        }
    }

    /// The session could not carry the request or reply.
    pub(crate) fn transport(error: &SessionError) -> Self {
        Self::Evaluation {
            key: None,
            diagnostic: error.to_string(),
        }
    }

    /// Whether this is an error raised by the evaluated code itself.
    #[must_use]
    pub const fn is_evaluation_error(&self) -> bool {
        matches!(self, Self::Evaluation { key: Some(_), .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failure_names_transcript() {
        let err = BridgeError::startup(Role::Main, Some(37246), "Port 37246 is already in use");
        assert_eq!(
            err.to_string(),
            "Guix REPL failed to start: Port 37246 is already in use. \
             See the \"Guix REPL\" transcript for details"
        );
    }

    #[test]
    fn test_transport_error_has_no_key() {
        let err = BridgeError::transport(&SessionError::Closed);
        assert!(matches!(err, BridgeError::Evaluation { key: None, .. }));
        assert!(!err.is_evaluation_error());
        assert_eq!(
            err.to_string(),
            "Error in evaluating guile expression: Session closed"
        );
    }
}
