//! Server and shell configuration, loaded from TOML.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! working configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TetherError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub server: ServerConfig,
    pub shell: ShellConfig,
    pub translator: TranslatorConfig,
}

/// WebSocket listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,
    /// TCP port (0 = pick any free port).
    pub port: u16,
    /// Maximum simultaneous sessions.
    pub max_connections: usize,
    /// Idle session timeout in seconds (0 = no timeout).
    pub idle_timeout_secs: u64,
    /// Maximum length of one inbound frame in bytes.
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
            max_connections: 16,
            idle_timeout_secs: 0,
            max_line_len: 4096,
        }
    }
}

/// Command execution settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Wall-clock limit for one external process (0 = unbounded).
    pub process_timeout_secs: u64,
    /// Per-session history bound; the oldest entries are dropped.
    pub max_history: usize,
}

impl ShellConfig {
    /// External process limit, `None` when unbounded.
    pub fn process_timeout(&self) -> Option<Duration> {
        (self.process_timeout_secs > 0).then(|| Duration::from_secs(self.process_timeout_secs))
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            process_timeout_secs: 30,
            max_history: 500,
        }
    }
}

/// Optional natural-language-to-command translator.
///
/// Disabled when `program` is unset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub program: Option<String>,
    pub args: Vec<String>,
}

impl TetherConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| TetherError::resource(path, e))?;
        log::debug!("loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(TetherError::Config(
                "server.max_connections must be at least 1".to_string(),
            ));
        }
        if self.server.max_line_len == 0 {
            return Err(TetherError::Config(
                "server.max_line_len must be at least 1".to_string(),
            ));
        }
        if self.translator.program.as_deref().is_some_and(str::is_empty) {
            return Err(TetherError::Config(
                "translator.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
