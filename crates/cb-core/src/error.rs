//! Error types for cuebank

use thiserror::Error;

/// Core error type
///
/// Only load-time and programming errors surface here. Conditions the
/// engine is expected to ride out (a cue missing from a bank, a wave entry
/// that has not streamed in yet, a failing backend call) are reported as
/// `Option`s, load states or log lines instead.
#[derive(Error, Debug)]
pub enum CueError {
    #[error("{what} was built with format version {found}, expected {expected}")]
    FormatVersion {
        what: &'static str,
        expected: i32,
        found: i32,
    },

    #[error("Unresolved {kind} reference: '{name}'")]
    UnresolvedReference { kind: &'static str, name: String },

    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: i64,
        len: usize,
    },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported cue variable: '{0}'")]
    UnsupportedVariable(String),

    #[error("Truncated {what}: needed {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Malformed content: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CueError {
    /// True for errors caused by the content rather than by the caller
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            CueError::FormatVersion { .. }
                | CueError::UnresolvedReference { .. }
                | CueError::IndexOutOfRange { .. }
                | CueError::Truncated { .. }
                | CueError::Malformed(_)
        )
    }
}

/// Result type alias
pub type CueResult<T> = Result<T, CueError>;
