//! Runtime errors and the exception value model.
//!
//! Every runtime failure is an [`EvalError`]: a kind, a message, optionally
//! the user-thrown value, and the stack trace recorded while unwinding.
//! Inside the VM these propagate as `Err`; a `Try` scope catches them and
//! resumes bytecode, and anything uncaught surfaces through the engine with
//! its trace rendered most-recent-call-last.

use std::fmt;
use std::sync::Arc;

use strum::{Display, IntoStaticStr};

use crate::{intern::SymbolId, value::Value};

/// The runtime error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    NativeMethodError,
    PropertyError,
    ObjectSecurityError,
    EvalError,
    /// A value thrown by user code.
    UserThrown,
}

/// One attributed frame in a stack trace.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub filename: Arc<str>,
    pub line: u32,
    pub column: u32,
    /// The enclosing function's name, when one was assigned.
    pub function: SymbolId,
}

/// A runtime error in flight.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
    /// The thrown value, for `UserThrown`.
    pub value: Option<Value>,
    /// Frames recorded while unwinding, innermost first.
    pub trace: Vec<TraceEntry>,
}

impl EvalError {
    #[must_use]
    pub fn native(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NativeMethodError, message)
    }

    #[must_use]
    pub fn property(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PropertyError, message)
    }

    #[must_use]
    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ObjectSecurityError, message)
    }

    #[must_use]
    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EvalError, message)
    }

    #[must_use]
    pub fn thrown(value: Value, message: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            ..Self::new(ErrorKind::UserThrown, message)
        }
    }

    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: None,
            trace: Vec::new(),
        }
    }

    /// The value a `catch` handler receives: the thrown value, or the
    /// message for runtime-generated errors (boxed by the VM).
    #[must_use]
    pub fn payload(&self) -> Option<Value> {
        self.value
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_kind_colon_message() {
        let err = EvalError::property("no such property \"x\"");
        assert_eq!(err.to_string(), "property-error: no such property \"x\"");
    }
}
