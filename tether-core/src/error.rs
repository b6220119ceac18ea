//! Error Types
//!
//! Every fallible operation in the crate returns [`Error`]. The variants
//! follow the runtime's failure taxonomy:
//!
//! - `Lex` / `Syntax` / `UnknownFilter`: compile time, never recovered.
//! - `Security` / `NotAssignable` / `Eval`: abort one evaluation only.
//! - `Phase` / `Divergence`: digest engine misuse or non-converging watchers.
//! - `Callback`: raised by user code (watch functions, listeners, tasks).
//!   These are routed to the scope tree's exception handler instead of
//!   aborting the digest.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The digest engine phases that cannot be re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Digest,
    Apply,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Digest => f.write_str("$digest"),
            Phase::Apply => f.write_str("$apply"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The lexer met a character or literal it cannot tokenize.
    #[error("lexer error at column {position}: {message}")]
    Lex { message: String, position: usize },

    /// The token stream does not match the expression grammar.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A filter pipe names a filter the lookup does not know.
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    /// A guarded dereference or call was refused.
    #[error("security violation: {0}")]
    Security(String),

    /// `assign` was called on an expression that does not denote a location.
    #[error("expression `{0}` is not assignable")]
    NotAssignable(String),

    /// Evaluation failed for a reason other than a guard.
    #[error("evaluation error: {0}")]
    Eval(String),

    /// A digest or apply was started while one is already running.
    #[error("{0} already in progress")]
    Phase(Phase),

    /// The digest loop kept finding dirty watchers.
    #[error("{0} $digest() iterations reached, aborting")]
    Divergence(usize),

    /// Raised from inside a user callback.
    #[error("{0}")]
    Callback(String),

    /// Rejected runtime configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Deferred work could not be scheduled.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl Error {
    /// Build a callback error from any message.
    pub fn callback(message: impl Into<String>) -> Self {
        Error::Callback(message.into())
    }

    pub(crate) fn lex(message: impl Into<String>, position: usize) -> Self {
        Error::Lex {
            message: message.into(),
            position,
        }
    }

    pub(crate) fn security(message: impl Into<String>) -> Self {
        Error::Security(message.into())
    }

    /// True for errors that must never be swallowed by a caller retrying
    /// the same evaluation.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Error::Security(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_errors_name_the_phase() {
        assert_eq!(
            Error::Phase(Phase::Digest).to_string(),
            "$digest already in progress"
        );
        assert_eq!(
            Error::Phase(Phase::Apply).to_string(),
            "$apply already in progress"
        );
    }

    #[test]
    fn divergence_reports_ttl() {
        assert_eq!(
            Error::Divergence(10).to_string(),
            "10 $digest() iterations reached, aborting"
        );
    }

    #[test]
    fn security_flag() {
        assert!(Error::security("nope").is_security_violation());
        assert!(!Error::callback("nope").is_security_violation());
    }
}
