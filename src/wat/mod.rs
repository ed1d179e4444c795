//! WebAssembly text format support.
//!
//! This module covers the full text pipeline: lexing WAT source into
//! tokens, decoding string and numeric literals, and parsing the token
//! stream into the AST.
//!
//! # Example
//!
//! ```
//! use wattle::wat;
//! use wattle::ast::NodeKind;
//!
//! let program = wat::parse_str("(module)").unwrap();
//! match &program.kind {
//!     NodeKind::Program { body } => assert_eq!(body.len(), 1),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! # Error handling
//!
//! Lexical errors carry a span; parse errors additionally carry a rendered
//! two-line code frame citing the offending token:
//!
//! ```
//! use wattle::wat;
//!
//! let err = wat::parse_str("(module (bogus))").unwrap_err();
//! assert!(err.to_string().contains("unknown section"));
//! ```

mod cursor;
mod error;
mod lexer;

pub mod codeframe;
pub mod number;
pub mod parser;
pub mod strings;
pub mod token;

pub use codeframe::code_frame;
pub use error::LexError;
pub use lexer::Lexer;
pub use parser::{parse, parse_str, ParseError};
pub use token::{Span, Token, TokenKind};
