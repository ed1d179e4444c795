//! Error types for WAT lexing.

use super::token::Span;
use std::fmt;

/// An error encountered during lexical analysis.
#[derive(Debug, Clone)]
#[must_use]
pub struct LexError {
    /// Human-readable description of the error.
    pub message: String,
    /// Location in source where the error occurred.
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

impl std::error::Error for LexError {}
