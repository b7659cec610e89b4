//! Structured error taxonomy for the simulator.
//!
//! Config/IO-facing code returns `Result<_, SimError>`; protocol invariants
//! that indicate an implementation bug panic instead (see module docs on
//! `mac.rs`/`channel.rs`), matching the split mandated for this crate:
//! recoverable configuration/IO failures propagate, internal contradictions
//! do not.

use thiserror::Error;

/// All failure kinds the simulator can report to its caller.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("config error: {0}")]
    Config(String),

    #[error("syntax error at config.txt:{line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("could not open {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timestamp overflow: {0}")]
    TimestampOverflow(String),

    #[error("scheduler event error: {0}")]
    Event(String),

    #[error("protocol invariant violated: {0}")]
    ProtocolInvariant(String),

    #[error("{0}")]
    General(String),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Config(msg.into())
    }

    pub fn syntax(line: usize, msg: impl Into<String>) -> Self {
        SimError::Syntax {
            line,
            message: msg.into(),
        }
    }
}

/// A protocol invariant has been violated. This always indicates a bug in
/// this implementation, not a recoverable runtime condition, so it panics
/// rather than returning a `Result` — matching the redesign guidance to
/// turn `ProtocolInvariant` exceptions into panics.
#[macro_export]
macro_rules! protocol_invariant {
    ($($arg:tt)*) => {
        panic!("protocol invariant violated: {}", format!($($arg)*))
    };
}
