#![forbid(unsafe_code)]

use miette::Diagnostic;
use symcheck_ast::SortError;
use thiserror::Error;

/// Misuse of the frame stack. These are programmer errors: a store that hit
/// one can no longer promise scope isolation, so callers must not swallow it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ScopeError {
    #[error("assert with no open frame")]
    #[diagnostic(code(symcheck::scope::no_open_frame))]
    NoOpenFrame,

    #[error("pop with no frame above the root frame")]
    #[diagnostic(code(symcheck::scope::empty_stack))]
    EmptyStack,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum OracleError {
    #[error("no decision procedure available: {0}")]
    #[diagnostic(
        code(symcheck::oracle::unavailable),
        help("rebuild with `--features symcheck-verify/z3`")
    )]
    Unavailable(String),

    #[error("cannot translate `{expr}`: {reason}")]
    #[diagnostic(code(symcheck::oracle::translation))]
    Translation { expr: String, reason: String },

    #[error("`{name}` is already declared as {existing}, cannot redeclare as {requested}")]
    #[diagnostic(code(symcheck::oracle::sort_mismatch))]
    SortMismatch {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("solver error: {0}")]
    #[diagnostic(code(symcheck::oracle::backend))]
    Backend(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum VerifyError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Oracle(#[from] OracleError),

    #[error("ill-sorted constraint: {0}")]
    #[diagnostic(code(symcheck::sort))]
    Sort(#[from] SortError),

    /// Reading a model from a verdict that is not SAT, or a binding the model
    /// does not carry.
    #[error("invalid model access: {what}")]
    #[diagnostic(code(symcheck::model))]
    InvalidModelAccess { what: String },

    #[error("configuration error: {message}")]
    #[diagnostic(code(symcheck::config))]
    Config { message: String },
}

impl VerifyError {
    pub fn model_access(what: impl Into<String>) -> Self {
        VerifyError::InvalidModelAccess { what: what.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        VerifyError::Config {
            message: message.into(),
        }
    }
}
