//! Bridge configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use guix_bridge_repl::{CommandBuilder, DEFAULT_PROMPT, PromptMatcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_PATH_ENV: &str = "GUIX_BRIDGE_CONFIG";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid prompt pattern: {0}")]
    Prompt(#[from] regex::Error),
}

/// How the bridge starts and talks to the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Evaluator program; may carry its own arguments.
    pub program: String,
    /// Arguments passed to every evaluator.
    pub args: Vec<String>,
    /// Extra load-path directories (`-L <dir>`).
    pub load_path: Vec<PathBuf>,
    /// Run the internal session against a REPL server opened by the main
    /// evaluator. When off, both roles share one session.
    pub server_mode: bool,
    /// Port of the REPL server in server mode.
    pub listen_port: u16,
    /// How long a new session may take to show its first prompt.
    pub startup_timeout_ms: u64,
    /// Regular expression matching the REPL prompt at the end of output.
    pub prompt: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "guile".to_string(),
            args: vec!["--no-auto-compile".to_string()],
            load_path: Vec::new(),
            server_mode: true,
            listen_port: 37246,
            startup_timeout_ms: 30_000,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns error if the document is not valid TOML or the prompt pattern
    /// does not compile.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.prompt_matcher()?;
        Ok(config)
    }

    /// Load a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Load the user's configuration file, or the defaults if there is none.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Compile the prompt pattern.
    ///
    /// # Errors
    /// Returns error if the pattern is not a valid regular expression.
    pub fn prompt_matcher(&self) -> Result<PromptMatcher, ConfigError> {
        Ok(PromptMatcher::new(&self.prompt)?)
    }

    /// Command builder for the configured evaluator.
    #[must_use]
    pub fn command_builder(&self) -> CommandBuilder {
        self.load_path.iter().fold(
            CommandBuilder::new(self.program.clone()).params(self.args.iter().cloned()),
            |builder, dir| builder.load_dir(dir),
        )
    }
}

/// `$GUIX_BRIDGE_CONFIG`, or `guix-bridge/config.toml` in the user's
/// configuration directory.
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("guix-bridge").join("config.toml"))
}
