//! Diagnostic code frames.
//!
//! Every fatal parse diagnostic begins with a two-line frame: the source
//! line containing the offending token, and a caret underline marking it.
//!
//! ```text
//!  3 | (func $f (bloop))
//!              ^^^^^
//! ```

use super::token::Span;

/// Render the two-line code frame for a span.
///
/// The first line is the source line the span starts on, prefixed with its
/// line number; the second underlines the span. A span reaching past the end
/// of its line is clipped to the line. Returns an empty string when the span
/// lies outside the source.
#[must_use]
pub fn code_frame(source: &str, span: Span) -> String {
    let Some(line_text) = source.lines().nth(span.line.saturating_sub(1) as usize) else {
        return String::new();
    };

    let prefix = format!("{:>3} | ", span.line);
    let column = span.column.saturating_sub(1) as usize;

    // Underline at least one character, clipped to the line's width.
    let line_chars = line_text.chars().count();
    let width = span_char_width(source, span).max(1);
    let width = width.min(line_chars.saturating_sub(column).max(1));

    let underline: String = std::iter::repeat(' ')
        .take(prefix.chars().count() + column)
        .chain(std::iter::repeat('^').take(width))
        .collect();

    format!("{}{}\n{}", prefix, line_text, underline)
}

/// The span's width in characters, clipped at the first newline.
fn span_char_width(source: &str, span: Span) -> usize {
    source
        .get(span.start..span.end)
        .map(|text| text.chars().take_while(|&c| c != '\n').count())
        .unwrap_or(1)
}
