//! Evaluator command building.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::ExecutableNotFound(program))?;
        Ok((executable, args))
    }
}

/// Builder for the evaluator command line.
///
/// `base` may carry its own arguments (`"guile --debug"`); it is split with
/// shell quoting rules.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command.
    pub base: String,
    /// Parameters appended after the base.
    pub params: Vec<String>,
    /// Directories prepended to the evaluator's load path (`-L <dir>`).
    pub load_path: Vec<PathBuf>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: Vec::new(),
            load_path: Vec::new(),
        }
    }

    /// Set parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Extend parameters.
    #[must_use]
    pub fn extend_params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(more.into_iter().map(Into::into));
        self
    }

    /// Add a load-path directory.
    #[must_use]
    pub fn load_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.load_path.push(dir.as_ref().to_path_buf());
        self
    }

    /// Build the command for a standalone evaluator.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        self.build_with(&[])
    }

    /// Build the command for an evaluator that also opens a REPL server on
    /// `port`. The flag is passed as a single `--listen=<port>` token.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn build_listening(&self, port: u16) -> Result<CommandParts, CommandBuildError> {
        self.build_with(&[format!("--listen={port}")])
    }

    fn build_with(&self, additional_args: &[String]) -> Result<CommandParts, CommandBuildError> {
        let mut parts = shlex::split(&self.base)
            .ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        parts.extend(self.params.iter().cloned());
        for dir in &self.load_path {
            parts.push("-L".to_string());
            parts.push(dir.to_string_lossy().into_owned());
        }
        parts.extend(additional_args.iter().cloned());

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}

/// Resolve an executable by name.
///
/// Explicit paths (absolute, or containing a separator) are used as-is when
/// they point at a file; everything else is looked up on `PATH`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_plain() {
        let parts = CommandBuilder::new("guile")
            .params(["--no-auto-compile"])
            .build()
            .unwrap();
        assert_eq!(parts.program, "guile");
        assert_eq!(parts.args, vec!["--no-auto-compile".to_string()]);
    }

    #[test]
    fn test_listen_flag_is_one_token() {
        let parts = CommandBuilder::new("guile").build_listening(37246).unwrap();
        assert_eq!(parts.args, vec!["--listen=37246".to_string()]);
    }

    #[test]
    fn test_base_with_quoted_args_and_load_path() {
        let parts = CommandBuilder::new(r#"guile --debug "-x" ".scm""#)
            .load_dir("/opt/guix/scheme")
            .extend_params(["-q"])
            .build_listening(1234)
            .unwrap();
        assert_eq!(parts.program, "guile");
        assert_eq!(
            parts.args,
            vec!["--debug", "-x", ".scm", "-q", "-L", "/opt/guix/scheme", "--listen=1234"]
        );
    }

    #[test]
    fn test_invalid_base() {
        assert!(matches!(
            CommandBuilder::new("").build(),
            Err(CommandBuildError::EmptyCommand)
        ));
        assert!(matches!(
            CommandBuilder::new("guile \"unterminated").build(),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_missing_executable() {
        assert!(resolve_executable_path("").await.is_none());
        assert!(
            resolve_executable_path("/definitely/not/here/guile")
                .await
                .is_none()
        );
        assert!(
            resolve_executable_path("guix-bridge-no-such-program")
                .await
                .is_none()
        );
    }
}
