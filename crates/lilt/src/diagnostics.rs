//! Parser and compiler diagnostics.
//!
//! The front end never prints; it collects [`Diagnostic`] records and keeps
//! going wherever recovery is possible. The embedder (or the CLI) decides how
//! to render them.

use std::fmt;
use std::sync::Arc;

use strum::{Display, IntoStaticStr};

/// How bad a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Fatal,
}

/// A `(filename, line, column)` position in source text.
///
/// Filenames are shared, not cloned, since every token in a module carries
/// one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub filename: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Position {
    #[must_use]
    pub fn new(filename: Arc<str>, line: u32, column: u32) -> Self {
        Self { filename, line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.column)
    }
}

/// One collected message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub position: Position,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn error(position: Position, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            position,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(position: Position, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warn,
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.position, self.severity, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position_and_severity() {
        let d = Diagnostic::error(Position::new("main.lt".into(), 3, 14), "unexpected token");
        assert_eq!(d.to_string(), "main.lt:3:14: error: unexpected token");
    }
}
