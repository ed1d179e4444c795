//! Lexer for the WebAssembly text format.
//!
//! Tokenises WAT source into the stream the parser consumes. The lexer is
//! an iterator, producing tokens lazily on demand. It deliberately does
//! *not* decode literals: string and number tokens carry raw source text so
//! that the decoders in [`crate::wat::strings`] and [`crate::wat::number`]
//! remain the single place those conversions happen. Comment tokens are
//! emitted (not skipped); the parser discards them at every natural
//! boundary.
//!
//! # Example
//!
//! ```
//! use wattle::wat::{Lexer, TokenKind};
//!
//! let source = "(module (func $main (result i32) (i32.const 42)))";
//! let tokens: Vec<_> = Lexer::new(source).collect::<Result<_, _>>().unwrap();
//!
//! assert!(matches!(tokens[0].kind, TokenKind::OpenParen));
//! assert!(matches!(tokens[1].kind, TokenKind::Keyword(ref k) if k == "module"));
//! ```

use super::cursor::{Cursor, Mark};
use super::error::LexError;
use super::token::{Token, TokenKind};
use crate::ast::Valtype;

/// The structural words of the text format.
///
/// Everything else that looks like a word is either a valtype, a special
/// float (`inf`, `nan`), or a bare name (instruction mnemonics).
const KEYWORDS: &[&str] = &[
    "module", "func", "param", "result", "type", "export", "import", "memory", "data", "table", "elem", "global",
    "start", "block", "loop", "if", "then", "else", "offset", "mut", "anyfunc", "binary", "quote",
];

/// Lexer for WebAssembly text format source.
///
/// Produces tokens via the `Iterator` trait. Each call to `next()` returns
/// the next token, or an error if the input is malformed.
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source text.
    pub fn new(source: &'a str) -> Self {
        Self {
            cursor: Cursor::new(source),
        }
    }

    /// Tokenise the entire source, returning all tokens or the first error.
    pub fn tokenise(source: &str) -> Result<Vec<Token>, LexError> {
        Lexer::new(source).collect()
    }

    fn error(&self, message: impl Into<String>, start: Mark) -> LexError {
        LexError::new(message, self.cursor.span_from(start))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.bump_while(|c| c.is_ascii_whitespace());
        if self.cursor.is_eof() {
            return None;
        }

        let start = self.cursor.mark();
        let kind = match self.lex_token(start) {
            Ok(k) => k,
            Err(e) => return Some(Err(e)),
        };
        let span = self.cursor.span_from(start);

        Some(Ok(Token::new(kind, span)))
    }
}

// ============================================================================
// Token dispatch
// ============================================================================

impl<'a> Lexer<'a> {
    fn lex_token(&mut self, start: Mark) -> Result<TokenKind, LexError> {
        match self.cursor.peek().unwrap() {
            '(' if self.cursor.peek_at(1) == Some(';') => self.lex_block_comment(start),
            '(' => {
                self.cursor.bump();
                Ok(TokenKind::OpenParen)
            }
            ')' => {
                self.cursor.bump();
                Ok(TokenKind::CloseParen)
            }
            ';' if self.cursor.peek_at(1) == Some(';') => Ok(self.lex_line_comment()),
            '.' => {
                self.cursor.bump();
                Ok(TokenKind::Dot)
            }
            '=' => {
                self.cursor.bump();
                Ok(TokenKind::Equal)
            }
            '"' => {
                let kind = self.lex_string(start)?;
                self.check_token_boundary(start)?;
                Ok(kind)
            }
            '$' => {
                let kind = self.lex_identifier(start)?;
                self.check_token_boundary(start)?;
                Ok(kind)
            }
            '+' | '-' => {
                let kind = self.lex_number(start);
                self.check_token_boundary(start)?;
                Ok(kind)
            }
            c if c.is_ascii_digit() => {
                let kind = self.lex_number(start);
                self.check_token_boundary(start)?;
                Ok(kind)
            }
            c if is_word_char(c) => {
                let kind = self.lex_word();
                self.check_token_boundary(start)?;
                Ok(kind)
            }
            c => {
                self.cursor.bump();
                Err(self.error(format!("unexpected character: {:?}", c), start))
            }
        }
    }

    /// Verify the next character can legally follow a token. WAT requires
    /// whitespace or parentheses between tokens, with `.` and `=` joining
    /// compound forms (`i32.add`, `offset=4`).
    fn check_token_boundary(&self, start: Mark) -> Result<(), LexError> {
        match self.cursor.peek() {
            None => Ok(()),
            Some(c) if c.is_ascii_whitespace() => Ok(()),
            Some('(' | ')' | ';' | '.' | '=') => Ok(()),
            Some(c) => Err(self.error(format!("unexpected character after token: {:?}", c), start)),
        }
    }
}

// ============================================================================
// Comments
// ============================================================================

impl<'a> Lexer<'a> {
    /// Lex a line comment: `;;` to end of line.
    fn lex_line_comment(&mut self) -> TokenKind {
        self.cursor.bump();
        self.cursor.bump();
        let text = self.cursor.bump_while(|c| c != '\n' && c != '\r');
        TokenKind::Comment {
            block: false,
            text: text.to_string(),
        }
    }

    /// Lex a block comment `(; ... ;)`, handling nesting.
    fn lex_block_comment(&mut self, start: Mark) -> Result<TokenKind, LexError> {
        // Consume opening "(;"
        self.cursor.bump();
        self.cursor.bump();

        let text_start = self.cursor.mark();
        let mut text_end = self.cursor.mark();
        let mut depth = 1;

        while depth > 0 {
            match (self.cursor.peek(), self.cursor.peek_at(1)) {
                (None, _) => {
                    return Err(self.error("unterminated block comment", start));
                }
                (Some('('), Some(';')) => {
                    self.cursor.bump();
                    self.cursor.bump();
                    depth += 1;
                }
                (Some(';'), Some(')')) => {
                    text_end = self.cursor.mark();
                    self.cursor.bump();
                    self.cursor.bump();
                    depth -= 1;
                }
                _ => {
                    self.cursor.bump();
                }
            }
        }

        let text = self.cursor.text_between(text_start, text_end);
        Ok(TokenKind::Comment {
            block: true,
            text: text.to_string(),
        })
    }
}

// ============================================================================
// Strings, identifiers, numbers, words
// ============================================================================

impl<'a> Lexer<'a> {
    /// Lex a string literal, keeping its contents raw.
    ///
    /// Escapes are scanned only far enough to find the closing quote; they
    /// are resolved later by the string decoder.
    fn lex_string(&mut self, start: Mark) -> Result<TokenKind, LexError> {
        // Consume opening quote
        self.cursor.bump();
        let contents_start = self.cursor.mark();

        loop {
            match self.cursor.peek() {
                None => return Err(self.error("unterminated string literal", start)),
                Some('"') => break,
                Some('\\') => {
                    self.cursor.bump();
                    if self.cursor.bump().is_none() {
                        return Err(self.error("unterminated string literal", start));
                    }
                }
                Some(_) => {
                    self.cursor.bump();
                }
            }
        }

        let raw = self.cursor.text_from(contents_start).to_string();
        self.cursor.bump(); // closing quote
        Ok(TokenKind::Str(raw))
    }

    /// Lex an identifier (starting with `$`).
    fn lex_identifier(&mut self, start: Mark) -> Result<TokenKind, LexError> {
        // Consume the '$'
        self.cursor.bump();

        let name = self.cursor.bump_while(is_idchar);
        if name.is_empty() {
            return Err(self.error("expected identifier after '$'", start));
        }

        Ok(TokenKind::Identifier(name.to_string()))
    }

    /// Lex a number, raw. An optional sign has not yet been consumed.
    ///
    /// The scan is permissive (it accepts any run of number-shaped
    /// characters, including exponent signs); the number decoder rejects
    /// malformed literals when the parser asks for a decode.
    fn lex_number(&mut self, start: Mark) -> TokenKind {
        if matches!(self.cursor.peek(), Some('+' | '-')) {
            self.cursor.bump();
        }

        let mut prev = '\0';
        while let Some(c) = self.cursor.peek() {
            let continues = c.is_ascii_alphanumeric()
                || c == '_'
                || c == '.'
                || c == ':'
                || ((c == '+' || c == '-') && matches!(prev, 'e' | 'E' | 'p' | 'P'));
            if !continues {
                break;
            }
            prev = c;
            self.cursor.bump();
        }

        TokenKind::Number(self.cursor.text_from(start).to_string())
    }

    /// Lex a bare word and classify it: keyword, valtype, special float
    /// (which becomes a number token), or name.
    fn lex_word(&mut self) -> TokenKind {
        let word = self.cursor.bump_while(is_word_char);

        if KEYWORDS.contains(&word) {
            return TokenKind::Keyword(word.to_string());
        }
        if let Some(valtype) = Valtype::from_keyword(word) {
            return TokenKind::Valtype(valtype);
        }
        if word == "inf" || word == "nan" || word.starts_with("nan:") {
            return TokenKind::Number(word.to_string());
        }

        TokenKind::Name(word.to_string())
    }
}

// ============================================================================
// Character classes
// ============================================================================

/// Characters valid in a `$`-identifier.
///
/// The text format's idchar set is permissive; identifiers like `$a.b.c`
/// and `$add/sub` are legal.
fn is_idchar(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '/' | ':' | '<' | '>' | '?' | '@' | '\\'
                | '^' | '_' | '`' | '|' | '~'
        )
}

/// Characters valid in a bare word.
///
/// Narrower than idchar: `.` and `=` terminate a word so that `i32.add`
/// and `offset=4` split into their component tokens.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to tokenise and extract just the token kinds.
    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenise(source)
            .expect("tokenise failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn kw(s: &str) -> TokenKind {
        TokenKind::Keyword(s.to_string())
    }

    fn name(s: &str) -> TokenKind {
        TokenKind::Name(s.to_string())
    }

    fn num(s: &str) -> TokenKind {
        TokenKind::Number(s.to_string())
    }

    // ------------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------------

    #[test]
    fn empty_input() {
        assert_eq!(kinds(""), vec![]);
    }

    #[test]
    fn parens_and_keywords() {
        assert_eq!(
            kinds("(module)"),
            vec![TokenKind::OpenParen, kw("module"), TokenKind::CloseParen]
        );
    }

    #[test]
    fn identifiers() {
        assert_eq!(kinds("$main"), vec![TokenKind::Identifier("main".into())]);
        assert_eq!(kinds("$a.b/c"), vec![TokenKind::Identifier("a.b/c".into())]);
    }

    #[test]
    fn valtype_dot_name() {
        assert_eq!(
            kinds("i32.add"),
            vec![TokenKind::Valtype(Valtype::I32), TokenKind::Dot, name("add")]
        );
        assert_eq!(
            kinds("f64.const"),
            vec![TokenKind::Valtype(Valtype::F64), TokenKind::Dot, name("const")]
        );
    }

    #[test]
    fn plain_mnemonics_are_names() {
        assert_eq!(kinds("get_local"), vec![name("get_local")]);
        assert_eq!(kinds("call_indirect"), vec![name("call_indirect")]);
        assert_eq!(kinds("end"), vec![name("end")]);
    }

    #[test]
    fn named_argument_form() {
        assert_eq!(
            kinds("offset=4 align=2"),
            vec![kw("offset"), TokenKind::Equal, num("4"), name("align"), TokenKind::Equal, num("2")]
        );
    }

    // ------------------------------------------------------------------------
    // Numbers
    // ------------------------------------------------------------------------

    #[test]
    fn numbers_stay_raw() {
        assert_eq!(kinds("42"), vec![num("42")]);
        assert_eq!(kinds("-42"), vec![num("-42")]);
        assert_eq!(kinds("0xff_ff"), vec![num("0xff_ff")]);
        assert_eq!(kinds("1.5e-3"), vec![num("1.5e-3")]);
        assert_eq!(kinds("0x1.8p+1"), vec![num("0x1.8p+1")]);
    }

    #[test]
    fn special_floats_are_number_tokens() {
        assert_eq!(kinds("inf"), vec![num("inf")]);
        assert_eq!(kinds("-inf"), vec![num("-inf")]);
        assert_eq!(kinds("nan"), vec![num("nan")]);
        assert_eq!(kinds("nan:0x123"), vec![num("nan:0x123")]);
        assert_eq!(kinds("-nan:0x123"), vec![num("-nan:0x123")]);
    }

    // ------------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------------

    #[test]
    fn strings_stay_raw() {
        assert_eq!(kinds(r#""hi""#), vec![TokenKind::Str("hi".into())]);
        assert_eq!(kinds(r#""a\tb""#), vec![TokenKind::Str(r"a\tb".into())]);
        assert_eq!(kinds(r#""quote:\"""#), vec![TokenKind::Str(r#"quote:\""#.into())]);
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(Lexer::tokenise("\"unterminated").is_err());
        assert!(Lexer::tokenise("\"trailing\\").is_err());
    }

    #[test]
    fn adjacent_strings_need_whitespace() {
        assert!(Lexer::tokenise(r#""a""b""#).is_err());
    }

    // ------------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------------

    #[test]
    fn line_comments_are_tokens() {
        assert_eq!(
            kinds("(module) ;; trailing"),
            vec![
                TokenKind::OpenParen,
                kw("module"),
                TokenKind::CloseParen,
                TokenKind::Comment {
                    block: false,
                    text: " trailing".into()
                }
            ]
        );
    }

    #[test]
    fn block_comments_nest() {
        assert_eq!(
            kinds("(; outer (; inner ;) still outer ;)"),
            vec![TokenKind::Comment {
                block: true,
                text: " outer (; inner ;) still outer ".into()
            }]
        );
    }

    #[test]
    fn unterminated_block_comment_errors() {
        assert!(Lexer::tokenise("(; never closed").is_err());
    }

    // ------------------------------------------------------------------------
    // Whole forms and spans
    // ------------------------------------------------------------------------

    #[test]
    fn complete_function() {
        assert_eq!(
            kinds("(func $f (param i32) (result i32) (get_local 0))"),
            vec![
                TokenKind::OpenParen,
                kw("func"),
                TokenKind::Identifier("f".into()),
                TokenKind::OpenParen,
                kw("param"),
                TokenKind::Valtype(Valtype::I32),
                TokenKind::CloseParen,
                TokenKind::OpenParen,
                kw("result"),
                TokenKind::Valtype(Valtype::I32),
                TokenKind::CloseParen,
                TokenKind::OpenParen,
                name("get_local"),
                num("0"),
                TokenKind::CloseParen,
                TokenKind::CloseParen,
            ]
        );
    }

    #[test]
    fn spans_track_lines() {
        let tokens = Lexer::tokenise("(module\n  $m)").expect("tokenise failed");
        let id = tokens.iter().find(|t| matches!(t.kind, TokenKind::Identifier(_))).unwrap();
        assert_eq!(id.span.line, 2);
        assert_eq!(id.span.column, 3);
    }

    #[test]
    fn unexpected_character_errors() {
        assert!(Lexer::tokenise("[").is_err());
        assert!(Lexer::tokenise("{}").is_err());
    }
}
