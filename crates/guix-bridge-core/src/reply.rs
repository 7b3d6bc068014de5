//! Structured evaluation replies.
//!
//! The bridge helper running inside the evaluator answers every request with
//! one association list:
//!
//! ```text
//! ((result "3" "4") (output . "text printed while evaluating"))
//! ((error (key . unbound-variable) (msg . "...")) (output . ""))
//! ```
//!
//! Result values are kept as the raw strings Guile printed; decoding them is
//! a separate step (see [`crate::reader`]).

use thiserror::Error;

use crate::{DecodeError, Value, reader};

/// Reply envelope error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyError {
    #[error("Malformed reply: {0}")]
    Decode(#[from] DecodeError),
    #[error("Reply has neither a result nor an error entry: {0}")]
    MissingOutcome(String),
    #[error("Result entry contains a non-string value: {0}")]
    NonStringResult(String),
}

/// The outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Evaluation succeeded.
    Success {
        /// Printed values, in order.
        values: Vec<String>,
        /// Standard output captured during evaluation.
        output: String,
    },
    /// The evaluator raised an error.
    Failure {
        /// Error key, e.g. `unbound-variable`.
        key: Option<String>,
        /// Diagnostic text as printed by the evaluator.
        diagnostic: String,
        /// Standard output captured during evaluation.
        output: String,
    },
}

impl Reply {
    /// Parse the text the helper wrote for one request.
    ///
    /// The reply is the last datum in `text`. Anything the evaluator printed
    /// on earlier lines outside the helper, such as module warnings, is
    /// skipped.
    ///
    /// # Errors
    /// Returns error if the text does not end in a reply alist.
    pub fn parse(text: &str) -> Result<Self, ReplyError> {
        let alist = last_datum(text.trim())?;
        let output = alist
            .assq("output")
            .and_then(Value::cdr)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        if let Some(entry) = alist.assq("result") {
            let values = entry
                .cdr()
                .as_ref()
                .and_then(Value::as_list)
                .unwrap_or_default()
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ReplyError::NonStringResult(v.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Self::Success { values, output });
        }

        if let Some(entry) = alist.assq("error") {
            let details = entry.cdr().unwrap_or(Value::Nil);
            let key = details.assq("key").and_then(Value::cdr).map(|k| match k {
                Value::Symbol(s) | Value::Str(s) => s,
                other => other.to_string(),
            });
            let diagnostic = details
                .assq("msg")
                .and_then(Value::cdr)
                .map(|m| match m {
                    Value::Str(s) => s,
                    other => other.to_string(),
                })
                .or_else(|| key.clone())
                .unwrap_or_else(|| details.to_string());
            return Ok(Self::Failure {
                key,
                diagnostic,
                output,
            });
        }

        Err(ReplyError::MissingOutcome(text.trim().to_string()))
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Standard output captured while evaluating.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Success { output, .. } | Self::Failure { output, .. } => output,
        }
    }

    /// Convert into the success values or the diagnostic text.
    ///
    /// # Errors
    /// Returns the diagnostic when the reply is a failure.
    pub fn into_result(self) -> Result<Vec<String>, String> {
        match self {
            Self::Success { values, .. } => Ok(values),
            Self::Failure { diagnostic, .. } => Err(diagnostic),
        }
    }
}

/// Decode the whole of `text`, or failing that the longest suffix starting
/// at a line break that reads as one datum.
fn last_datum(text: &str) -> Result<Value, DecodeError> {
    reader::decode(text).or_else(|err| {
        text.match_indices('\n')
            .find_map(|(at, _)| reader::decode(&text[at + 1..]).ok())
            .ok_or(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_reply() {
        let reply = Reply::parse(r#"((result "3" "(1 2)") (output . "hi\n"))"#).unwrap();
        assert_eq!(
            reply,
            Reply::Success {
                values: vec!["3".into(), "(1 2)".into()],
                output: "hi\n".into(),
            }
        );
    }

    #[test]
    fn test_success_without_values() {
        let reply = Reply::parse("((result) (output . \"\"))").unwrap();
        assert_eq!(reply.into_result().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_failure_reply() {
        let text = r#"
            ((error (key . unbound-variable)
                    (msg . "(unbound-variable #f \"Unbound variable: ~S\" (frob) #f)"))
             (output . ""))"#;
        let reply = Reply::parse(text).unwrap();
        match reply {
            Reply::Failure { key, diagnostic, .. } => {
                assert_eq!(key.as_deref(), Some("unbound-variable"));
                assert!(diagnostic.contains("Unbound variable"));
            }
            Reply::Success { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn test_failure_falls_back_to_key() {
        let reply = Reply::parse("((error (key . misc-error)))").unwrap();
        assert_eq!(reply.into_result(), Err("misc-error".to_string()));
    }

    #[test]
    fn test_warnings_before_reply_are_skipped() {
        let text = "WARNING: (guix ui): imported module (guix build utils) overrides core binding `delete'\n\
                    ;;; note: source file newer than compiled\n\
                    ((result \"1\") (output . \"\"))\n";
        assert_eq!(
            Reply::parse(text).unwrap(),
            Reply::Success {
                values: vec!["1".into()],
                output: String::new(),
            }
        );
    }

    #[test]
    fn test_malformed_replies() {
        assert!(matches!(Reply::parse("(("), Err(ReplyError::Decode(_))));
        assert!(matches!(
            Reply::parse("((output . \"\"))"),
            Err(ReplyError::MissingOutcome(_))
        ));
        assert!(matches!(
            Reply::parse("((result 1))"),
            Err(ReplyError::NonStringResult(_))
        ));
    }
}
