//! Error types for the instrumentation core.
//!
//! Only conditions that abort a run live here. Patterns the recognizers
//! decline to rewrite are ordinary outcomes and never surface as errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstrumentError {
    /// Reading a source file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The Go grammar could not be loaded into the parser.
    #[error("failed to initialise the Go grammar: {0}")]
    Grammar(String),

    /// A source file contains syntax the parser rejected.
    #[error("{path}:{line}: syntax error near `{snippet}`")]
    Parse {
        path: PathBuf,
        line: usize,
        snippet: String,
    },

    /// The selected directory holds no Go package.
    #[error("no Go package found under {0}")]
    NoPackage(PathBuf),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The tree was left in a state that cannot be mutated or rendered.
    #[error("structural invariant violated in {function}: {message}")]
    Structural { function: String, message: String },

    /// The diff artifact could not be created or appended to.
    #[error("failed to write diff file {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstrumentError {
    pub fn structural(function: impl Into<String>, message: impl Into<String>) -> Self {
        InstrumentError::Structural {
            function: function.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InstrumentError>;
