//! Error types for tether.
//!
//! Every variant except `Transport` is recoverable: the shell turns it into
//! a text line for the session that caused it and keeps going.

use std::io;
use std::path::Path;

/// Errors produced by the tether shell and server.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// Malformed command, bad argument, invalid line index.
    #[error("{0}")]
    Command(String),

    /// A filesystem operation failed on a specific path.
    #[error("{path}: {source}")]
    Resource {
        path: String,
        #[source]
        source: io::Error,
    },

    /// An external process could not be spawned or failed.
    #[error("process error: {0}")]
    Process(String),

    #[error("session error: {0}")]
    Session(String),

    /// The client connection broke; ends only that session.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl TetherError {
    /// Wrap an I/O failure together with the path it happened on.
    pub fn resource(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Resource {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TetherError>;
