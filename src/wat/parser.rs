//! WAT parser: token stream -> AST.
//!
//! A recursive-descent parser over the token stream produced by the lexer.
//! Each top-level form enters through [`Parser::parse_form`], which
//! dispatches on the first significant token after an opening `(`; forms
//! that match no structural keyword fall through to instruction parsing.
//!
//! # Design
//!
//! 1. **Grammar correspondence**: each parsing function corresponds to one
//!    production of the text format grammar.
//!
//! 2. **Both notations**: inside function bodies the parser accepts folded
//!    instructions `(op arg ...)` and plain instructions `op arg ...`.
//!    Plain operand arity comes from the opcode signature table; unknown
//!    opcodes default their numeric operands to `f64`.
//!
//! 3. **Fatal diagnostics**: every unexpected token raises a [`ParseError`]
//!    whose message begins with a two-line code frame citing the offending
//!    token. There is no error recovery.
//!
//! 4. **Threaded state**: the shorthand-export buffer and the unique-name
//!    generator live on the parser value, never in module-level state; each
//!    `parse()` call owns its own.

use super::codeframe::code_frame;
use super::error::LexError;
use super::lexer::Lexer;
use super::number;
use super::strings::decode_string;
use super::token::{Span, Token, TokenKind};
use crate::ast::builders;
use crate::ast::{
    ByteArray, ExportDescr, ExportType, GlobalType, Identifier, ImportDescr, Index, Limit, Mutability, Node,
    NumberLiteral, Param, Signature, TypeUse, UniqueNameGenerator, Valtype,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Error type
// ============================================================================

/// An error encountered during parsing. Always fatal.
#[derive(Debug, Clone)]
#[must_use]
pub struct ParseError {
    /// The rendered code frame for the offending token (may be empty when
    /// the source text is unavailable for the span).
    pub frame: String,
    /// Human-readable description of the error.
    pub message: String,
    /// Location in source where the error occurred.
    pub span: Span,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span, source: &str) -> Self {
        Self {
            frame: code_frame(source, span),
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.frame.is_empty() {
            writeln!(f, "{}", self.frame)?;
        }
        write!(
            f,
            "{} at line {}, column {}",
            self.message, self.span.line, self.span.column
        )
    }
}

impl std::error::Error for ParseError {}

// ============================================================================
// Opcode signature table
// ============================================================================

/// Operand typing for a plain instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandSig {
    /// A fixed-length list of operand valtypes. Numeric literal operands
    /// are decoded at the listed type.
    Types(&'static [Valtype]),
    /// Any number of operands (used by `local` declarations).
    Vector,
}

type SignatureKey = (Option<Valtype>, String);

/// Operand signatures keyed by `(object, name)`.
///
/// Opcodes absent from this table default their numeric operands to `f64`.
static OPCODE_SIGNATURES: Lazy<HashMap<SignatureKey, OperandSig>> = Lazy::new(|| {
    use Valtype::*;

    let mut table = HashMap::new();

    table.insert((Some(I32), "const".to_string()), OperandSig::Types(&[I32]));
    table.insert((Some(I64), "const".to_string()), OperandSig::Types(&[I64]));
    table.insert((Some(F32), "const".to_string()), OperandSig::Types(&[F32]));
    table.insert((Some(F64), "const".to_string()), OperandSig::Types(&[F64]));

    // Index-taking instructions: one unsigned operand, decoded at i32.
    for op in [
        "get_local",
        "set_local",
        "tee_local",
        "get_global",
        "set_global",
        "br",
        "br_if",
        "call",
    ] {
        table.insert((None, op.to_string()), OperandSig::Types(&[I32]));
    }

    table.insert((None, "local".to_string()), OperandSig::Vector);

    table
});

fn operand_sig(object: Option<Valtype>, id: &str) -> Option<OperandSig> {
    OPCODE_SIGNATURES.get(&(object, id.to_string())).copied()
}

// ============================================================================
// Entry points
// ============================================================================

/// Parse a token stream into a `Program` node.
///
/// `source` is the original text the tokens were lexed from; it is used
/// only for diagnostic code frames.
///
/// Comments are skipped at every boundary inside a form; comments *between*
/// top-level forms survive as `LeadingComment`/`BlockComment` nodes in the
/// program body, in source order.
pub fn parse(tokens: &[Token], source: &str) -> Result<Node, ParseError> {
    let mut parser = Parser::new(tokens, source);
    let mut comments = tokens
        .iter()
        .filter(|t| matches!(t.kind, TokenKind::Comment { .. }))
        .peekable();
    let mut body = Vec::new();

    while parser.current().is_some() {
        // Comments preceding this form become leading nodes.
        let form_start = parser.current_span().start;
        while let Some(token) = comments.peek() {
            if token.span.end > form_start {
                break;
            }
            if let Some(node) = comment_node(token) {
                body.push(node);
            }
            comments.next();
        }

        parser.expect_open()?;
        body.push(parser.parse_form()?);

        // Comments that sat inside the form were part of its surface.
        let consumed = parser.consumed_end();
        while comments.peek().map_or(false, |t| t.span.start < consumed) {
            comments.next();
        }
    }

    for token in comments {
        if let Some(node) = comment_node(token) {
            body.push(node);
        }
    }

    Ok(builders::program(body))
}

fn comment_node(token: &Token) -> Option<Node> {
    match &token.kind {
        TokenKind::Comment { block, text } => {
            let node = if *block {
                builders::block_comment(text.clone())
            } else {
                builders::leading_comment(text.clone())
            };
            Some(node.with_loc(token.span))
        }
        _ => None,
    }
}

/// Lex and parse WAT source in one step.
pub fn parse_str(source: &str) -> Result<Node, ParseError> {
    let tokens = Lexer::tokenise(source).map_err(|e| lex_to_parse_error(e, source))?;
    parse(&tokens, source)
}

fn lex_to_parse_error(e: LexError, source: &str) -> ParseError {
    ParseError::new(e.message, e.span, source)
}

// ============================================================================
// Parser state
// ============================================================================

/// An inline export recorded while parsing a module field, flushed as a
/// synthesised `ModuleExport` once the field has been added.
struct PendingExport {
    export_type: ExportType,
    name: String,
    id: Index,
}

struct Parser<'a> {
    /// Significant tokens; comments are filtered out of the parsing
    /// stream up front, which is the "skip at every natural boundary"
    /// rule in one place. [`parse`] reattaches the top-level ones as
    /// comment nodes.
    tokens: Vec<&'a Token>,
    pos: usize,
    source: &'a str,
    names: UniqueNameGenerator,
    pending_exports: Vec<PendingExport>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], source: &'a str) -> Self {
        Self {
            tokens: tokens
                .iter()
                .filter(|t| !matches!(t.kind, TokenKind::Comment { .. }))
                .collect(),
            pos: 0,
            source,
            names: UniqueNameGenerator::new(),
            pending_exports: Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Token access
    // ------------------------------------------------------------------------

    fn current(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).copied()
    }

    fn lookahead(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let token = self.current();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Byte offset just past the last consumed token.
    fn consumed_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    /// The span of the current token, or a zero span at the end of input.
    fn current_span(&self) -> Span {
        match self.current() {
            Some(t) => t.span,
            None => self
                .tokens
                .last()
                .map(|t| Span::new(t.span.end, t.span.end, t.span.line, t.span.column))
                .unwrap_or(Span::new(0, 0, 1, 1)),
        }
    }

    fn error(&self, message: impl Into<String>, span: Span) -> ParseError {
        ParseError::new(message, span, self.source)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        self.error(message, self.current_span())
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.current() {
            Some(t) => self.error(format!("expected {}, found {}", expected, t.kind.describe()), t.span),
            None => self.error(format!("expected {}, found end of input", expected), self.current_span()),
        }
    }

    fn expect_open(&mut self) -> Result<(), ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::OpenParen,
                ..
            }) => {
                self.bump();
                Ok(())
            }
            _ => Err(self.unexpected("'('")),
        }
    }

    fn expect_close(&mut self) -> Result<(), ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::CloseParen,
                ..
            }) => {
                self.bump();
                Ok(())
            }
            _ => Err(self.unexpected("')'")),
        }
    }

    fn at_close(&self) -> bool {
        matches!(
            self.current(),
            Some(Token {
                kind: TokenKind::CloseParen,
                ..
            })
        )
    }

    fn at_open(&self) -> bool {
        matches!(
            self.current(),
            Some(Token {
                kind: TokenKind::OpenParen,
                ..
            })
        )
    }

    /// Whether the current token opens a list headed by the given keyword.
    fn at_list(&self, keyword: &str) -> bool {
        self.at_open()
            && matches!(self.lookahead(), Some(Token { kind: TokenKind::Keyword(k), .. }) if k == keyword)
    }

    // ------------------------------------------------------------------------
    // Small terminals
    // ------------------------------------------------------------------------

    /// Consume an optional `$`-identifier.
    fn take_identifier(&mut self) -> Option<Identifier> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                ..
            }) => {
                self.bump();
                Some(Identifier::new(name.clone()))
            }
            _ => None,
        }
    }

    /// Consume a required string literal, decoded to text.
    fn expect_string(&mut self) -> Result<String, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Str(raw),
                span,
            }) => {
                let bytes = decode_string(raw, *span).map_err(|e| self.error(e.message, e.span))?;
                self.bump();
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => Err(self.unexpected("string")),
        }
    }

    /// Consume a required string literal, decoded to bytes.
    fn expect_byte_string(&mut self) -> Result<Vec<u8>, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Str(raw),
                span,
            }) => {
                let bytes = decode_string(raw, *span).map_err(|e| self.error(e.message, e.span))?;
                self.bump();
                Ok(bytes)
            }
            _ => Err(self.unexpected("string")),
        }
    }

    /// Consume a required index: a `$`-name or an unsigned literal.
    fn expect_index(&mut self) -> Result<Index, ParseError> {
        if let Some(id) = self.take_identifier() {
            return Ok(Index::Id(id));
        }
        match self.current() {
            Some(Token {
                kind: TokenKind::Number(raw),
                span,
            }) => {
                let value = number::parse32i(raw).map_err(|e| self.error(e.message, *span))?;
                self.bump();
                Ok(Index::Num(value as u32))
            }
            _ => Err(self.unexpected("index")),
        }
    }

    /// Consume an optional unsigned literal (used for memory/table indices).
    fn take_unsigned(&mut self) -> Result<Option<u32>, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Number(raw),
                span,
            }) => {
                let value = number::parse32i(raw).map_err(|e| self.error(e.message, *span))?;
                self.bump();
                Ok(Some(value as u32))
            }
            _ => Ok(None),
        }
    }

    /// Consume a required valtype.
    fn expect_valtype(&mut self) -> Result<Valtype, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Valtype(v),
                ..
            }) => {
                let v = *v;
                self.bump();
                Ok(v)
            }
            _ => Err(self.unexpected("valtype")),
        }
    }

    /// Decode a numeric literal token at the given valtype.
    fn expect_number(&mut self, ty: Valtype) -> Result<NumberLiteral, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Number(raw),
                span,
            }) => {
                let value = number::decode(ty, raw).map_err(|e| self.error(e.message, *span))?;
                self.bump();
                Ok(NumberLiteral::new(value, raw.clone()))
            }
            _ => Err(self.unexpected("number")),
        }
    }

    // ------------------------------------------------------------------------
    // Form dispatch
    // ------------------------------------------------------------------------

    /// Parse one parenthesised form; the `(` has already been consumed.
    /// The produced node is located at its head token.
    fn parse_form(&mut self) -> Result<Node, ParseError> {
        let span = self.current_span();
        self.parse_form_dispatch().map(|node| node.with_loc(span))
    }

    fn parse_form_dispatch(&mut self) -> Result<Node, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Keyword(keyword),
                ..
            }) => match keyword.as_str() {
                "module" => self.parse_module(),
                "func" => self.parse_func(),
                "export" => self.parse_export(),
                "import" => self.parse_import(),
                "memory" => self.parse_memory(),
                "data" => self.parse_data(),
                "table" => self.parse_table(),
                "elem" => self.parse_elem(),
                "global" => self.parse_global(),
                "type" => self.parse_type(),
                "start" => self.parse_start(),
                "block" => self.parse_block(),
                "loop" => self.parse_loop(),
                "if" => self.parse_if(),
                other => Err(self.error_here(format!("unknown section: {}", other))),
            },
            // No structural keyword: a folded instruction.
            _ => self.parse_folded_tail(),
        }
    }

    /// Parse a folded instruction; the `(` has already been consumed.
    fn parse_folded_instr(&mut self) -> Result<Node, ParseError> {
        self.expect_open()?;
        match self.current() {
            Some(Token {
                kind: TokenKind::Keyword(k),
                ..
            }) => match k.as_str() {
                "block" => self.parse_block(),
                "loop" => self.parse_loop(),
                "if" => self.parse_if(),
                other => Err(self.error_here(format!("unexpected keyword in instruction position: {}", other))),
            },
            _ => self.parse_folded_tail(),
        }
    }

    /// The tail of a folded instruction after `(`: `call`, `call_indirect`,
    /// or a plain operation.
    fn parse_folded_tail(&mut self) -> Result<Node, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Name(name),
                ..
            }) if name == "call" => self.parse_call(),
            Some(Token {
                kind: TokenKind::Name(name),
                ..
            }) if name == "call_indirect" => self.parse_call_indirect(),
            Some(Token {
                kind: TokenKind::Name(_) | TokenKind::Valtype(_),
                ..
            }) => {
                let node = self.parse_op(true)?;
                self.expect_close()?;
                Ok(node)
            }
            _ => Err(self.unexpected("instruction")),
        }
    }

    // ------------------------------------------------------------------------
    // Instructions
    // ------------------------------------------------------------------------

    /// Parse a sequence of body instructions (folded or plain) up to `)`.
    fn parse_instr_sequence(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut instrs = Vec::new();
        while !self.at_close() {
            instrs.push(self.parse_body_instr()?);
        }
        Ok(instrs)
    }

    /// Parse one body instruction, folded or plain.
    /// The produced node is located at its first token.
    fn parse_body_instr(&mut self) -> Result<Node, ParseError> {
        let span = self.current_span();
        let node = if self.at_open() {
            self.parse_folded_instr()
        } else {
            self.parse_plain_instr()
        }?;
        Ok(node.with_loc(span))
    }

    /// Parse a plain (non-parenthesised) instruction.
    fn parse_plain_instr(&mut self) -> Result<Node, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Name(name),
                ..
            }) if name == "call" => {
                self.bump();
                let index = self.expect_index()?;
                Ok(builders::call_instruction(index, vec![]))
            }
            Some(Token {
                kind: TokenKind::Name(_) | TokenKind::Valtype(_),
                ..
            }) => self.parse_op(false),
            _ => Err(self.unexpected("instruction")),
        }
    }

    /// Read an operation head: `<name>` or `<valtype> . <name>`.
    fn parse_op_head(&mut self) -> Result<(Option<Valtype>, String), ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Valtype(object),
                ..
            }) => {
                let object = *object;
                self.bump();
                match self.current() {
                    Some(Token {
                        kind: TokenKind::Dot, ..
                    }) => {
                        self.bump();
                    }
                    _ => return Err(self.unexpected("'.' after valtype")),
                }
                match self.current() {
                    Some(Token {
                        kind: TokenKind::Name(name),
                        ..
                    }) => {
                        let name = name.clone();
                        self.bump();
                        Ok((Some(object), name))
                    }
                    _ => Err(self.unexpected("operation name")),
                }
            }
            Some(Token {
                kind: TokenKind::Name(name),
                ..
            }) => {
                let name = name.clone();
                self.bump();
                Ok((None, name))
            }
            _ => Err(self.unexpected("instruction")),
        }
    }

    /// Collect `key=value` named arguments (`offset=4 align=2`).
    fn parse_named_args(&mut self) -> Result<HashMap<String, NumberLiteral>, ParseError> {
        let mut named = HashMap::new();

        loop {
            let key = match self.current() {
                Some(Token {
                    kind: TokenKind::Name(word) | TokenKind::Keyword(word),
                    ..
                }) => word.clone(),
                _ => break,
            };
            if !matches!(
                self.lookahead(),
                Some(Token {
                    kind: TokenKind::Equal,
                    ..
                })
            ) {
                break;
            }
            self.bump(); // key
            self.bump(); // '='
            let value = self.expect_number(Valtype::I32)?;
            named.insert(key, value);
        }

        Ok(named)
    }

    /// Parse one plain operation and its operands.
    ///
    /// In folded form (`folded == true`), nested parenthesised instructions
    /// are accepted as arguments and the operand list runs to the closing
    /// paren (left for the caller). In plain form the operand count comes
    /// from the opcode signature table.
    fn parse_op(&mut self, folded: bool) -> Result<Node, ParseError> {
        let (object, id) = self.parse_op_head()?;
        let named_args = self.parse_named_args()?;
        let sig = operand_sig(object, &id);
        let mut args = Vec::new();

        if folded {
            while !self.at_close() {
                args.push(self.parse_folded_arg(&sig, args.len())?);
            }
        } else {
            match sig {
                Some(OperandSig::Types(types)) => {
                    for ty in types {
                        if !self.at_operand() {
                            break;
                        }
                        args.push(self.parse_plain_arg(Some(*ty))?);
                    }
                }
                Some(OperandSig::Vector) => {
                    while self.at_operand() {
                        args.push(self.parse_plain_arg(None)?);
                    }
                }
                None => {
                    // No signature: numeric operands default to f64.
                    while matches!(
                        self.current(),
                        Some(Token {
                            kind: TokenKind::Number(_),
                            ..
                        })
                    ) {
                        args.push(Node::new(crate::ast::NodeKind::NumberLiteral(
                            self.expect_number(Valtype::F64)?,
                        )));
                    }
                }
            }
        }

        Ok(builders::instr(id, object, args, named_args))
    }

    /// Whether the current token can begin a plain operand.
    fn at_operand(&self) -> bool {
        matches!(
            self.current(),
            Some(Token {
                kind: TokenKind::Number(_) | TokenKind::Identifier(_) | TokenKind::Valtype(_),
                ..
            })
        )
    }

    /// One operand of a plain instruction, decoded at `ty` when numeric.
    fn parse_plain_arg(&mut self, ty: Option<Valtype>) -> Result<Node, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Number(_),
                ..
            }) => {
                let lit = self.expect_number(ty.unwrap_or(Valtype::F64))?;
                Ok(Node::new(crate::ast::NodeKind::NumberLiteral(lit)))
            }
            Some(Token {
                kind: TokenKind::Identifier(name),
                ..
            }) => {
                let id = Identifier::new(name.clone());
                self.bump();
                Ok(builders::identifier(id))
            }
            Some(Token {
                kind: TokenKind::Valtype(v),
                ..
            }) => {
                let v = *v;
                self.bump();
                Ok(builders::valtype_literal(v))
            }
            _ => Err(self.unexpected("operand")),
        }
    }

    /// One argument of a folded instruction. Positional numeric literals
    /// are coerced by the signature table; everything else passes through.
    fn parse_folded_arg(&mut self, sig: &Option<OperandSig>, position: usize) -> Result<Node, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::OpenParen,
                ..
            }) => self.parse_folded_instr(),
            Some(Token {
                kind: TokenKind::Number(_),
                ..
            }) => {
                let ty = match sig {
                    Some(OperandSig::Types(types)) => types.get(position).copied().unwrap_or(Valtype::F64),
                    _ => Valtype::F64,
                };
                let lit = self.expect_number(ty)?;
                Ok(Node::new(crate::ast::NodeKind::NumberLiteral(lit)))
            }
            Some(Token {
                kind: TokenKind::Identifier(name),
                ..
            }) => {
                let id = Identifier::new(name.clone());
                self.bump();
                Ok(builders::identifier(id))
            }
            Some(Token {
                kind: TokenKind::Valtype(v),
                ..
            }) => {
                let v = *v;
                self.bump();
                Ok(builders::valtype_literal(v))
            }
            Some(Token {
                kind: TokenKind::Str(_),
                ..
            }) => {
                let text = self.expect_string()?;
                Ok(builders::string_literal(text))
            }
            _ => Err(self.unexpected("operand")),
        }
    }

    // ------------------------------------------------------------------------
    // Structured instructions
    // ------------------------------------------------------------------------

    /// `(block $label? (result t)? instr*)`
    fn parse_block(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'block'
        let label = self.take_identifier().unwrap_or_else(|| self.names.next("block"));
        let result = self.parse_optional_result()?;
        let instr = self.parse_instr_sequence()?;
        self.expect_close()?;
        Ok(builders::block_instruction(label, result, instr))
    }

    /// `(loop $label? (result t)? instr*)`
    fn parse_loop(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'loop'
        let label = self.take_identifier().unwrap_or_else(|| self.names.next("loop"));
        let result = self.parse_optional_result()?;
        let instr = self.parse_instr_sequence()?;
        self.expect_close()?;
        Ok(builders::loop_instruction(label, result, instr))
    }

    /// `(if $label? (result t)? test* (then instr*) (else instr*)?)`
    ///
    /// Everything before the `(then ...)` clause is the test sequence.
    fn parse_if(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'if'
        let label = self.take_identifier().unwrap_or_else(|| self.names.next("if"));
        let mut result = self.parse_optional_result()?;
        let mut test = Vec::new();
        let mut consequent = Vec::new();
        let mut alternate = Vec::new();
        let mut saw_then = false;

        while !self.at_close() {
            if self.at_list("result") {
                self.expect_open()?;
                self.bump(); // 'result'
                result = Some(self.expect_valtype()?);
                self.expect_close()?;
            } else if self.at_list("then") {
                self.expect_open()?;
                self.bump(); // 'then'
                consequent = self.parse_instr_sequence()?;
                self.expect_close()?;
                saw_then = true;
            } else if self.at_list("else") {
                self.expect_open()?;
                self.bump(); // 'else'
                alternate = self.parse_instr_sequence()?;
                self.expect_close()?;
            } else if saw_then {
                return Err(self.error_here("expected (else ...) or ')' after then clause"));
            } else {
                test.push(self.parse_body_instr()?);
            }
        }
        self.expect_close()?;

        if !saw_then {
            return Err(self.error_here("if requires a (then ...) clause"));
        }

        Ok(builders::if_instruction(label, result, test, consequent, alternate))
    }

    /// An optional `(result t)` clause.
    fn parse_optional_result(&mut self) -> Result<Option<Valtype>, ParseError> {
        if !self.at_list("result") {
            return Ok(None);
        }
        self.expect_open()?;
        self.bump(); // 'result'
        let valtype = self.expect_valtype()?;
        self.expect_close()?;
        Ok(Some(valtype))
    }

    /// `(call index instr*)`
    fn parse_call(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'call'
        let index = self.expect_index()?;
        let mut instr_args = Vec::new();
        while !self.at_close() {
            instr_args.push(self.parse_folded_instr()?);
        }
        self.expect_close()?;
        Ok(builders::call_instruction(index, instr_args))
    }

    /// `(call_indirect (type t)|(param t*)*(result t)? instr*)`
    fn parse_call_indirect(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'call_indirect'

        let mut signature = Signature::default();
        let mut type_ref = None;

        loop {
            if self.at_list("type") {
                self.expect_open()?;
                self.bump();
                type_ref = Some(self.expect_index()?);
                self.expect_close()?;
            } else if self.at_list("param") {
                self.expect_open()?;
                self.bump();
                self.parse_params(&mut signature.params)?;
                self.expect_close()?;
            } else if self.at_list("result") {
                self.expect_open()?;
                self.bump();
                while !self.at_close() {
                    signature.results.push(self.expect_valtype()?);
                }
                self.expect_close()?;
            } else {
                break;
            }
        }

        let mut instr_args = Vec::new();
        while !self.at_close() {
            instr_args.push(self.parse_folded_instr()?);
        }
        self.expect_close()?;

        let signature = match type_ref {
            Some(index) => TypeUse::TypeRef(index),
            None => TypeUse::Signature(signature),
        };
        Ok(builders::call_indirect_instruction(signature, instr_args))
    }

    // ------------------------------------------------------------------------
    // Module and fields
    // ------------------------------------------------------------------------

    /// `(module $id? field*)`, `(module binary "..."*)`, `(module quote "..."*)`
    fn parse_module(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'module'
        let id = self.take_identifier();

        if let Some(Token {
            kind: TokenKind::Keyword(k),
            ..
        }) = self.current()
        {
            if k == "binary" || k == "quote" {
                let variant = k.clone();
                self.bump();
                let mut chunks = Vec::new();
                while !self.at_close() {
                    chunks.push(self.expect_string()?);
                }
                self.expect_close()?;
                return Ok(if variant == "binary" {
                    builders::binary_module(id, chunks)
                } else {
                    builders::quote_module(id, chunks)
                });
            }
        }

        let mut fields = Vec::new();
        while !self.at_close() {
            self.expect_open()?;
            let field = self.parse_form()?;
            fields.push(field);
            // Inline exports buffered while walking the field surface as
            // synthesised ModuleExport fields, right after their owner.
            for pending in self.pending_exports.drain(..) {
                fields.push(builders::module_export(
                    pending.name,
                    ExportDescr {
                        export_type: pending.export_type,
                        id: pending.id,
                    },
                ));
            }
        }
        self.expect_close()?;

        Ok(builders::module(id, fields))
    }

    /// An inline `(export "name")` shorthand: buffer it against the owning
    /// field's identifier.
    fn parse_inline_export(&mut self, export_type: ExportType, owner: &Identifier) -> Result<(), ParseError> {
        self.expect_open()?;
        self.bump(); // 'export'
        let name = self.expect_string()?;
        self.expect_close()?;
        self.pending_exports.push(PendingExport {
            export_type,
            name,
            id: Index::Id(owner.clone()),
        });
        Ok(())
    }

    /// An inline `(import "module" "name")` shorthand.
    fn parse_inline_import(&mut self) -> Result<(String, String), ParseError> {
        self.expect_open()?;
        self.bump(); // 'import'
        let module = self.expect_string()?;
        let name = self.expect_string()?;
        self.expect_close()?;
        Ok((module, name))
    }

    /// `(func $id? (export "n")* (import "m" "n")? (type t)? (param ...)* (result t)* instr*)`
    fn parse_func(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'func'
        let id = self.take_identifier().unwrap_or_else(|| self.names.next("func"));

        let mut signature = Signature::default();
        let mut type_ref = None;
        let mut import_of = None;
        let mut body = Vec::new();

        while !self.at_close() {
            if self.at_list("export") {
                self.parse_inline_export(ExportType::Func, &id)?;
            } else if self.at_list("import") {
                import_of = Some(self.parse_inline_import()?);
            } else if self.at_list("type") {
                self.expect_open()?;
                self.bump();
                type_ref = Some(self.expect_index()?);
                self.expect_close()?;
            } else if self.at_list("param") {
                self.expect_open()?;
                self.bump();
                self.parse_params(&mut signature.params)?;
                self.expect_close()?;
            } else if self.at_list("result") {
                self.expect_open()?;
                self.bump();
                while !self.at_close() {
                    signature.results.push(self.expect_valtype()?);
                }
                self.expect_close()?;
            } else {
                body.push(self.parse_body_instr()?);
            }
        }
        self.expect_close()?;

        if let Some((module, name)) = import_of {
            return Ok(builders::module_import(
                module,
                name,
                builders::func_import_descr(id, signature),
            ));
        }

        let signature = match type_ref {
            Some(index) => TypeUse::TypeRef(index),
            None => TypeUse::Signature(signature),
        };
        Ok(builders::func(id, signature, body))
    }

    /// The contents of one `(param ...)` clause: either `$id valtype` or a
    /// run of anonymous valtypes.
    fn parse_params(&mut self, params: &mut Vec<Param>) -> Result<(), ParseError> {
        if let Some(id) = self.take_identifier() {
            let valtype = self.expect_valtype()?;
            params.push(Param {
                id: Some(id.value),
                valtype,
            });
            return Ok(());
        }
        while !self.at_close() {
            let valtype = self.expect_valtype()?;
            params.push(Param { id: None, valtype });
        }
        Ok(())
    }

    /// `(export "name" (func|global|memory|table index))`
    fn parse_export(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'export'
        let name = self.expect_string()?;

        self.expect_open()?;
        let export_type = self.expect_export_type()?;
        let id = self.expect_index()?;
        self.expect_close()?;
        self.expect_close()?;

        Ok(builders::module_export(name, ExportDescr { export_type, id }))
    }

    fn expect_export_type(&mut self) -> Result<ExportType, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Keyword(k),
                ..
            }) => {
                let export_type = match k.as_str() {
                    "func" => ExportType::Func,
                    "global" => ExportType::Global,
                    "memory" => ExportType::Memory,
                    "table" => ExportType::Table,
                    other => return Err(self.error_here(format!("unknown export kind: {}", other))),
                };
                self.bump();
                Ok(export_type)
            }
            _ => Err(self.unexpected("export kind")),
        }
    }

    /// `(import "module" "name" descr)`
    fn parse_import(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'import'
        let module = self.expect_string()?;
        let name = self.expect_string()?;

        self.expect_open()?;
        let descr = match self.current() {
            Some(Token {
                kind: TokenKind::Keyword(k),
                ..
            }) => match k.as_str() {
                "func" => {
                    self.bump();
                    let id = self.take_identifier().unwrap_or_else(|| self.names.next("func"));
                    let signature = self.parse_import_signature()?;
                    builders::func_import_descr(id, signature)
                }
                "global" => {
                    self.bump();
                    let _id = self.take_identifier();
                    let global_type = self.parse_global_type()?;
                    ImportDescr::Global(global_type)
                }
                "memory" => {
                    self.bump();
                    let _id = self.take_identifier();
                    let limits = self.parse_limits()?;
                    ImportDescr::Memory(limits)
                }
                "table" => {
                    self.bump();
                    let _id = self.take_identifier();
                    let limits = self.parse_limits()?;
                    let element_type = self.expect_element_type()?;
                    ImportDescr::Table { element_type, limits }
                }
                other => return Err(self.error_here(format!("unknown import kind: {}", other))),
            },
            _ => return Err(self.unexpected("import descriptor")),
        };
        self.expect_close()?;
        self.expect_close()?;

        Ok(builders::module_import(module, name, descr))
    }

    /// The `(type t)?`/`(param ...)*`/`(result t)*` clauses of an imported
    /// function. A type reference is resolved to its own signature slot by
    /// instantiation, so only the inline form is captured here.
    fn parse_import_signature(&mut self) -> Result<Signature, ParseError> {
        let mut signature = Signature::default();
        while !self.at_close() {
            if self.at_list("param") {
                self.expect_open()?;
                self.bump();
                self.parse_params(&mut signature.params)?;
                self.expect_close()?;
            } else if self.at_list("result") {
                self.expect_open()?;
                self.bump();
                while !self.at_close() {
                    signature.results.push(self.expect_valtype()?);
                }
                self.expect_close()?;
            } else {
                return Err(self.unexpected("(param ...) or (result ...)"));
            }
        }
        Ok(signature)
    }

    /// `(memory $id? (export "n")* (import "m" "n")? limits|(data "..."*))`
    fn parse_memory(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'memory'
        let id = self.take_identifier().unwrap_or_else(|| self.names.next("memory"));

        let mut import_of = None;
        while self.at_list("export") {
            self.parse_inline_export(ExportType::Memory, &id)?;
        }
        if self.at_list("import") {
            import_of = Some(self.parse_inline_import()?);
        }

        let limits = if self.at_list("data") {
            self.expect_open()?;
            self.bump(); // 'data'
            let mut total = 0u32;
            while !self.at_close() {
                total += self.expect_byte_string()?.len() as u32;
            }
            self.expect_close()?;
            // Inline data sets the minimum to the byte-string length.
            Limit {
                min: total,
                max: None,
            }
        } else {
            self.parse_limits()?
        };
        self.expect_close()?;

        if let Some((module, name)) = import_of {
            return Ok(builders::module_import(module, name, ImportDescr::Memory(limits)));
        }

        Ok(builders::memory(limits, id))
    }

    fn parse_limits(&mut self) -> Result<Limit, ParseError> {
        let min = match self.take_unsigned()? {
            Some(v) => v,
            None => return Err(self.unexpected("limit")),
        };
        let max = self.take_unsigned()?;
        Ok(Limit { min, max })
    }

    /// `(data memidx? offsetexpr "..."*)`
    fn parse_data(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'data'
        let memory_index = self.take_unsigned()?.unwrap_or(0);

        let offset_span = self.current_span();
        let offset = self.parse_offset_single()?;
        if !matches!(offset.kind, crate::ast::NodeKind::Instr { .. }) {
            return Err(self.error("data segment offset must be a plain instruction", offset_span));
        }

        let mut bytes = Vec::new();
        while !self.at_close() {
            bytes.extend(self.expect_byte_string()?);
        }
        self.expect_close()?;

        Ok(builders::data(memory_index, offset, ByteArray { values: bytes }))
    }

    /// An offset expression that must be a single instruction:
    /// `(offset instr)` or a folded instruction directly.
    fn parse_offset_single(&mut self) -> Result<Node, ParseError> {
        if self.at_list("offset") {
            self.expect_open()?;
            self.bump(); // 'offset'
            let instr = self.parse_folded_instr()?;
            self.expect_close()?;
            Ok(instr)
        } else {
            self.parse_folded_instr()
        }
    }

    /// An offset expression that may hold several instructions.
    fn parse_offset_sequence(&mut self) -> Result<Vec<Node>, ParseError> {
        if self.at_list("offset") {
            self.expect_open()?;
            self.bump(); // 'offset'
            let mut instrs = Vec::new();
            while !self.at_close() {
                instrs.push(self.parse_folded_instr()?);
            }
            self.expect_close()?;
            Ok(instrs)
        } else {
            Ok(vec![self.parse_folded_instr()?])
        }
    }

    /// `(table $id? (export "n")* limits? anyfunc|(elem idx*)?)`
    fn parse_table(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'table'
        let name = self.take_identifier().unwrap_or_else(|| self.names.next("table"));

        let mut import_of = None;
        let mut limits = None;
        let mut element_type = String::from("anyfunc");
        let mut elem_indices = Vec::new();

        while !self.at_close() {
            if self.at_list("export") {
                self.parse_inline_export(ExportType::Table, &name)?;
            } else if self.at_list("import") {
                import_of = Some(self.parse_inline_import()?);
            } else if self.at_list("elem") {
                self.expect_open()?;
                self.bump(); // 'elem'
                while !self.at_close() {
                    elem_indices.push(self.expect_index()?);
                }
                self.expect_close()?;
                // Inline element lists pin the table size to the list length.
                let count = elem_indices.len() as u32;
                limits = Some(Limit {
                    min: count,
                    max: Some(count),
                });
            } else if let Some(min) = self.take_unsigned()? {
                let max = self.take_unsigned()?;
                limits = Some(Limit { min, max });
            } else {
                element_type = self.expect_element_type()?;
            }
        }
        self.expect_close()?;

        let limits = limits.unwrap_or(Limit { min: 0, max: None });

        if let Some((module, name_str)) = import_of {
            return Ok(builders::module_import(
                module,
                name_str,
                ImportDescr::Table { element_type, limits },
            ));
        }

        Ok(builders::table(element_type, limits, name, elem_indices))
    }

    fn expect_element_type(&mut self) -> Result<String, ParseError> {
        match self.current() {
            Some(Token {
                kind: TokenKind::Keyword(k),
                ..
            }) if k == "anyfunc" => {
                self.bump();
                Ok("anyfunc".to_string())
            }
            _ => Err(self.unexpected("element type")),
        }
    }

    /// `(elem tableidx? offsetexpr funcidx*)`
    fn parse_elem(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'elem'
        let table_index = self.take_unsigned()?.unwrap_or(0);
        let offset = self.parse_offset_sequence()?;

        let mut funcs = Vec::new();
        while !self.at_close() {
            funcs.push(self.expect_index()?);
        }
        self.expect_close()?;

        Ok(builders::elem(table_index, offset, funcs))
    }

    /// `(global $id? (export "n")* (import "m" "n")? globaltype instr*)`
    fn parse_global(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'global'
        let name = self.take_identifier().unwrap_or_else(|| self.names.next("global"));

        let mut import_of = None;
        while self.at_list("export") {
            self.parse_inline_export(ExportType::Global, &name)?;
        }
        if self.at_list("import") {
            import_of = Some(self.parse_inline_import()?);
        }

        let global_type = self.parse_global_type()?;

        // An inline import carries the global type as its descriptor and
        // stands in for the initialiser.
        let init = if let Some((module, name_str)) = import_of {
            vec![builders::module_import(
                module,
                name_str,
                ImportDescr::Global(global_type),
            )]
        } else {
            self.parse_instr_sequence()?
        };
        self.expect_close()?;

        Ok(builders::global(global_type, init, name))
    }

    /// `valtype` or `(mut valtype)`; a bare valtype is immutable.
    fn parse_global_type(&mut self) -> Result<GlobalType, ParseError> {
        if self.at_list("mut") {
            self.expect_open()?;
            self.bump(); // 'mut'
            let valtype = self.expect_valtype()?;
            self.expect_close()?;
            return Ok(GlobalType {
                valtype,
                mutability: Mutability::Var,
            });
        }
        let valtype = self.expect_valtype()?;
        Ok(GlobalType {
            valtype,
            mutability: Mutability::Const,
        })
    }

    /// `(type $id? (func (param ...)* (result t)*))`
    fn parse_type(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'type'
        let id = self.take_identifier();

        self.expect_open()?;
        match self.current() {
            Some(Token {
                kind: TokenKind::Keyword(k),
                ..
            }) if k == "func" => {
                self.bump();
            }
            _ => return Err(self.unexpected("'func'")),
        }
        let signature = self.parse_import_signature()?;
        self.expect_close()?;
        self.expect_close()?;

        Ok(builders::type_instruction(id, signature))
    }

    /// `(start funcidx)`
    fn parse_start(&mut self) -> Result<Node, ParseError> {
        self.bump(); // 'start'
        let index = self.expect_index()?;
        self.expect_close()?;
        Ok(builders::start(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{NodeKind, NumberValue};

    /// Parse a source string and return the fields of its first module.
    fn module_fields(source: &str) -> Vec<Node> {
        let program = parse_str(source).expect("parse failed");
        match program.first_module().expect("no module").kind.clone() {
            NodeKind::Module { fields, .. } => fields,
            other => panic!("expected Module, got {}", other.name()),
        }
    }

    /// Parse a single-function module and return the function's body.
    fn func_body(source: &str) -> Vec<Node> {
        let fields = module_fields(source);
        for field in fields {
            if let NodeKind::Func { body, .. } = field.kind {
                return body;
            }
        }
        panic!("no Func field");
    }

    // ------------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------------

    #[test]
    fn empty_module() {
        let program = parse_str("(module)").unwrap();
        match &program.kind {
            NodeKind::Program { body } => {
                assert_eq!(body.len(), 1);
                match &body[0].kind {
                    NodeKind::Module { id, fields } => {
                        assert!(id.is_none());
                        assert!(fields.is_empty());
                    }
                    other => panic!("expected Module, got {}", other.name()),
                }
            }
            _ => panic!("expected Program"),
        }
    }

    #[test]
    fn named_module() {
        let program = parse_str("(module $m)").unwrap();
        match &program.first_module().unwrap().kind {
            NodeKind::Module { id, .. } => assert_eq!(id.as_ref().unwrap().value, "m"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn binary_and_quote_modules() {
        let program = parse_str(r#"(module binary "\00asm" "\01\00\00\00")"#).unwrap();
        match &program.kind {
            NodeKind::Program { body } => match &body[0].kind {
                NodeKind::BinaryModule { blob, .. } => assert_eq!(blob.len(), 2),
                other => panic!("expected BinaryModule, got {}", other.name()),
            },
            _ => unreachable!(),
        }

        let program = parse_str(r#"(module quote "(module)")"#).unwrap();
        match &program.kind {
            NodeKind::Program { body } => match &body[0].kind {
                NodeKind::QuoteModule { string, .. } => assert_eq!(string, &vec!["(module)".to_string()]),
                other => panic!("expected QuoteModule, got {}", other.name()),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn multiple_top_level_forms() {
        let program = parse_str("(module) (module)").unwrap();
        match &program.kind {
            NodeKind::Program { body } => assert_eq!(body.len(), 2),
            _ => unreachable!(),
        }
    }

    // ------------------------------------------------------------------------
    // Functions and instructions
    // ------------------------------------------------------------------------

    #[test]
    fn func_signature() {
        let fields = module_fields("(module (func $f (param $x i32) (param i64 f32) (result i32)))");
        match &fields[0].kind {
            NodeKind::Func { id, signature, body } => {
                assert_eq!(id.value, "f");
                assert!(body.is_empty());
                match signature {
                    TypeUse::Signature(sig) => {
                        assert_eq!(sig.params.len(), 3);
                        assert_eq!(sig.params[0].id.as_deref(), Some("x"));
                        assert_eq!(sig.params[0].valtype, Valtype::I32);
                        assert_eq!(sig.params[1].id, None);
                        assert_eq!(sig.params[2].valtype, Valtype::F32);
                        assert_eq!(sig.results, vec![Valtype::I32]);
                    }
                    TypeUse::TypeRef(_) => panic!("expected inline signature"),
                }
            }
            other => panic!("expected Func, got {}", other.name()),
        }
    }

    #[test]
    fn folded_instructions_coerce_literals() {
        let body = func_body("(module (func $f (i32.const 42) (f64.const 1.5)))");
        match &body[0].kind {
            NodeKind::Instr { id, object, args, .. } => {
                assert_eq!(id, "const");
                assert_eq!(*object, Some(Valtype::I32));
                match &args[0].kind {
                    NodeKind::NumberLiteral(lit) => {
                        assert_eq!(lit.value, NumberValue::I32(42));
                        assert_eq!(lit.raw, "42");
                    }
                    other => panic!("expected NumberLiteral, got {}", other.name()),
                }
            }
            other => panic!("expected Instr, got {}", other.name()),
        }
        match &body[1].kind {
            NodeKind::Instr { object, args, .. } => {
                assert_eq!(*object, Some(Valtype::F64));
                assert!(matches!(
                    args[0].kind,
                    NodeKind::NumberLiteral(NumberLiteral {
                        value: NumberValue::F64(v),
                        ..
                    }) if v == 1.5
                ));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn plain_instructions() {
        let body = func_body("(module (func $f get_local 0 get_local 1 i32.add))");
        assert_eq!(body.len(), 3);
        match &body[0].kind {
            NodeKind::Instr { id, object, args, .. } => {
                assert_eq!(id, "get_local");
                assert_eq!(*object, None);
                assert!(matches!(
                    args[0].kind,
                    NodeKind::NumberLiteral(NumberLiteral {
                        value: NumberValue::I32(0),
                        ..
                    })
                ));
            }
            _ => unreachable!(),
        }
        match &body[2].kind {
            NodeKind::Instr { id, object, args, .. } => {
                assert_eq!(id, "add");
                assert_eq!(*object, Some(Valtype::I32));
                assert!(args.is_empty());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn unknown_opcode_operands_default_to_f64() {
        let body = func_body("(module (func $f (strange_op 7)))");
        match &body[0].kind {
            NodeKind::Instr { id, args, .. } => {
                assert_eq!(id, "strange_op");
                assert!(matches!(
                    args[0].kind,
                    NodeKind::NumberLiteral(NumberLiteral {
                        value: NumberValue::F64(v),
                        ..
                    }) if v == 7.0
                ));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn named_arguments_collected() {
        let body = func_body("(module (func $f (i32.load offset=4 align=2)))");
        match &body[0].kind {
            NodeKind::Instr { id, named_args, .. } => {
                assert_eq!(id, "load");
                assert_eq!(named_args["offset"].value, NumberValue::I32(4));
                assert_eq!(named_args["align"].value, NumberValue::I32(2));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn local_declarations_take_a_vector_of_valtypes() {
        let body = func_body("(module (func $f (local i32 i64)))");
        match &body[0].kind {
            NodeKind::Instr { id, args, .. } => {
                assert_eq!(id, "local");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0].kind, NodeKind::ValtypeLiteral(Valtype::I32)));
                assert!(matches!(args[1].kind, NodeKind::ValtypeLiteral(Valtype::I64)));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn nested_folded_instructions() {
        let body = func_body("(module (func $f (i32.add (i32.const 1) (i32.const 2))))");
        match &body[0].kind {
            NodeKind::Instr { id, args, .. } => {
                assert_eq!(id, "add");
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0].kind, NodeKind::Instr { .. }));
                assert!(matches!(args[1].kind, NodeKind::Instr { .. }));
            }
            _ => unreachable!(),
        }
    }

    // ------------------------------------------------------------------------
    // Structured instructions
    // ------------------------------------------------------------------------

    #[test]
    fn block_gets_dedicated_node_and_generated_label() {
        let body = func_body("(module (func $f (block (result i32) (i32.const 1))))");
        match &body[0].kind {
            NodeKind::BlockInstruction { label, result, instr } => {
                assert_eq!(label.value, "block_0");
                assert!(label.is_generated());
                assert_eq!(*result, Some(Valtype::I32));
                assert_eq!(instr.len(), 1);
            }
            other => panic!("expected BlockInstruction, got {}", other.name()),
        }
    }

    #[test]
    fn no_plain_instr_is_ever_a_structured_opcode() {
        let body = func_body(
            "(module (func $f (block (loop (if (i32.const 1) (then (nop)) (else (nop)))))))",
        );
        let mut program = builders::program(vec![builders::func(
            Identifier::new("f"),
            TypeUse::Signature(Signature::default()),
            body,
        )]);
        let mut visitors = crate::ast::Visitors::new().on("Instr", |path| {
            if let NodeKind::Instr { id, .. } = &path.node.kind {
                assert!(!matches!(id.as_str(), "block" | "loop" | "if"));
            }
        });
        crate::ast::traverse(&mut program, &mut visitors);
    }

    #[test]
    fn if_splits_test_then_else() {
        let body = func_body(
            "(module (func $f (if $check (result i32) (get_local 0) (then (i32.const 1)) (else (i32.const 0)))))",
        );
        match &body[0].kind {
            NodeKind::IfInstruction {
                label,
                result,
                test,
                consequent,
                alternate,
            } => {
                assert_eq!(label.value, "check");
                assert_eq!(*result, Some(Valtype::I32));
                assert_eq!(test.len(), 1);
                assert_eq!(consequent.len(), 1);
                assert_eq!(alternate.len(), 1);
            }
            other => panic!("expected IfInstruction, got {}", other.name()),
        }
    }

    #[test]
    fn if_requires_then() {
        assert!(parse_str("(module (func (if (i32.const 1))))").is_err());
    }

    #[test]
    fn loop_node() {
        let body = func_body("(module (func $f (loop $l (nop))))");
        match &body[0].kind {
            NodeKind::LoopInstruction { label, instr, .. } => {
                assert_eq!(label.value, "l");
                assert_eq!(instr.len(), 1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn generated_names_are_unique_within_one_parse() {
        let body = func_body("(module (func $f (block (nop)) (block (nop)) (loop (nop))))");
        let mut labels = Vec::new();
        for node in &body {
            match &node.kind {
                NodeKind::BlockInstruction { label, .. } | NodeKind::LoopInstruction { label, .. } => {
                    labels.push(label.value.clone());
                }
                _ => {}
            }
        }
        assert_eq!(labels, vec!["block_0", "block_1", "loop_0"]);
    }

    #[test]
    fn call_instruction_node() {
        let body = func_body("(module (func $f (call $g (i32.const 1))))");
        match &body[0].kind {
            NodeKind::CallInstruction { index, instr_args } => {
                assert!(matches!(index, Index::Id(id) if id.value == "g"));
                assert_eq!(instr_args.len(), 1);
            }
            other => panic!("expected CallInstruction, got {}", other.name()),
        }
    }

    #[test]
    fn call_indirect_instruction_node() {
        let body = func_body("(module (func $f (call_indirect (param i32) (result i32) (i32.const 0))))");
        match &body[0].kind {
            NodeKind::CallIndirectInstruction { signature, instr_args } => {
                match signature {
                    TypeUse::Signature(sig) => {
                        assert_eq!(sig.params.len(), 1);
                        assert_eq!(sig.results, vec![Valtype::I32]);
                    }
                    TypeUse::TypeRef(_) => panic!("expected inline signature"),
                }
                assert_eq!(instr_args.len(), 1);
            }
            other => panic!("expected CallIndirectInstruction, got {}", other.name()),
        }
    }

    // ------------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------------

    #[test]
    fn full_module_field_order() {
        let fields = module_fields(
            r#"(module
                 (memory $m 1)
                 (func $f (param i32) (result i32) (get_local 0) (i32.load))
                 (export "m" (memory $m))
                 (export "f" (func $f)))"#,
        );
        assert_eq!(fields.len(), 4);

        match &fields[0].kind {
            NodeKind::Memory { limits, id } => {
                assert_eq!(limits.min, 1);
                assert_eq!(limits.max, None);
                assert_eq!(id.value, "m");
            }
            other => panic!("expected Memory, got {}", other.name()),
        }

        assert!(matches!(fields[1].kind, NodeKind::Func { .. }));

        match &fields[2].kind {
            NodeKind::ModuleExport { name, descr } => {
                assert_eq!(name, "m");
                assert_eq!(descr.export_type, ExportType::Memory);
                assert!(matches!(&descr.id, Index::Id(id) if id.value == "m"));
            }
            other => panic!("expected ModuleExport, got {}", other.name()),
        }

        match &fields[3].kind {
            NodeKind::ModuleExport { name, descr } => {
                assert_eq!(name, "f");
                assert_eq!(descr.export_type, ExportType::Func);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn inline_export_is_buffered_then_flushed() {
        let fields = module_fields(r#"(module (func $f (export "foo")))"#);
        assert_eq!(fields.len(), 2);
        assert!(matches!(fields[0].kind, NodeKind::Func { .. }));
        match &fields[1].kind {
            NodeKind::ModuleExport { name, descr } => {
                assert_eq!(name, "foo");
                assert_eq!(descr.export_type, ExportType::Func);
                assert!(matches!(&descr.id, Index::Id(id) if id.value == "f"));
            }
            other => panic!("expected synthesised ModuleExport, got {}", other.name()),
        }
    }

    #[test]
    fn inline_exports_flush_per_field() {
        let fields = module_fields(r#"(module (func $a (export "a")) (func $b (export "b")))"#);
        let kinds: Vec<_> = fields.iter().map(|f| f.kind_name()).collect();
        assert_eq!(kinds, vec!["Func", "ModuleExport", "Func", "ModuleExport"]);
    }

    #[test]
    fn inline_memory_export() {
        let fields = module_fields(r#"(module (memory $m (export "mem") 1))"#);
        assert_eq!(fields.len(), 2);
        match &fields[1].kind {
            NodeKind::ModuleExport { name, descr } => {
                assert_eq!(name, "mem");
                assert_eq!(descr.export_type, ExportType::Memory);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn inline_func_import() {
        let fields = module_fields(r#"(module (func $log (import "console" "log") (param i32)))"#);
        match &fields[0].kind {
            NodeKind::ModuleImport { module, name, descr } => {
                assert_eq!(module, "console");
                assert_eq!(name, "log");
                match descr {
                    ImportDescr::Func(f) => {
                        assert_eq!(f.id.value, "log");
                        assert_eq!(f.signature.params.len(), 1);
                    }
                    _ => panic!("expected func import descriptor"),
                }
            }
            other => panic!("expected ModuleImport, got {}", other.name()),
        }
    }

    #[test]
    fn inline_global_import_lands_in_init() {
        let fields = module_fields(r#"(module (global $g (import "js" "g") (mut i32)))"#);
        match &fields[0].kind {
            NodeKind::Global {
                global_type,
                init,
                name,
            } => {
                assert_eq!(name.value, "g");
                assert_eq!(global_type.valtype, Valtype::I32);
                assert_eq!(global_type.mutability, Mutability::Var);
                assert_eq!(init.len(), 1);
                match &init[0].kind {
                    NodeKind::ModuleImport { module, name, descr } => {
                        assert_eq!(module, "js");
                        assert_eq!(name, "g");
                        assert!(matches!(descr, ImportDescr::Global(gt) if gt.valtype == Valtype::I32));
                    }
                    other => panic!("expected ModuleImport in init, got {}", other.name()),
                }
            }
            other => panic!("expected Global, got {}", other.name()),
        }
    }

    #[test]
    fn explicit_import_field() {
        let fields = module_fields(r#"(module (import "env" "mem" (memory 2 4)))"#);
        match &fields[0].kind {
            NodeKind::ModuleImport { descr, .. } => match descr {
                ImportDescr::Memory(limits) => {
                    assert_eq!(limits.min, 2);
                    assert_eq!(limits.max, Some(4));
                }
                _ => panic!("expected memory import"),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn memory_with_inline_data_sizes_by_byte_length() {
        let fields = module_fields(r#"(module (memory $m (data "hi" "there")))"#);
        match &fields[0].kind {
            NodeKind::Memory { limits, .. } => {
                assert_eq!(limits.min, 7);
                assert_eq!(limits.max, None);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn data_segment() {
        let fields = module_fields(r#"(module (data (i32.const 0) "hi"))"#);
        match &fields[0].kind {
            NodeKind::Data {
                memory_index,
                offset,
                init,
            } => {
                assert_eq!(*memory_index, 0);
                match &offset.kind {
                    NodeKind::Instr { id, object, args, .. } => {
                        assert_eq!(id, "const");
                        assert_eq!(*object, Some(Valtype::I32));
                        assert!(matches!(
                            args[0].kind,
                            NodeKind::NumberLiteral(NumberLiteral {
                                value: NumberValue::I32(0),
                                ..
                            })
                        ));
                    }
                    other => panic!("expected Instr offset, got {}", other.name()),
                }
                assert_eq!(init.values, vec![104, 105]);
            }
            other => panic!("expected Data, got {}", other.name()),
        }
    }

    #[test]
    fn data_segment_with_offset_wrapper_and_escapes() {
        let fields = module_fields(r#"(module (data 0 (offset (i32.const 8)) "\00\ff"))"#);
        match &fields[0].kind {
            NodeKind::Data { init, .. } => assert_eq!(init.values, vec![0x00, 0xFF]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn table_with_inline_elements() {
        let fields = module_fields("(module (table $t (elem $a $b)))");
        match &fields[0].kind {
            NodeKind::Table {
                element_type,
                limits,
                name,
                elem_indices,
            } => {
                assert_eq!(element_type, "anyfunc");
                assert_eq!(name.value, "t");
                assert_eq!(limits.min, 2);
                assert_eq!(limits.max, Some(2));
                assert_eq!(elem_indices.len(), 2);
                assert!(matches!(&elem_indices[0], Index::Id(id) if id.value == "a"));
            }
            other => panic!("expected Table, got {}", other.name()),
        }
    }

    #[test]
    fn table_with_limits_and_elemtype() {
        let fields = module_fields("(module (table $t 1 10 anyfunc))");
        match &fields[0].kind {
            NodeKind::Table { limits, .. } => {
                assert_eq!(limits.min, 1);
                assert_eq!(limits.max, Some(10));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn elem_segment() {
        let fields = module_fields("(module (elem (i32.const 0) $f 1))");
        match &fields[0].kind {
            NodeKind::Elem {
                table_index,
                offset,
                funcs,
            } => {
                assert_eq!(*table_index, 0);
                assert_eq!(offset.len(), 1);
                assert_eq!(funcs.len(), 2);
                assert!(matches!(funcs[1], Index::Num(1)));
            }
            other => panic!("expected Elem, got {}", other.name()),
        }
    }

    #[test]
    fn global_field() {
        let fields = module_fields("(module (global $g (mut i32) (i32.const 7)))");
        match &fields[0].kind {
            NodeKind::Global {
                global_type, init, ..
            } => {
                assert_eq!(global_type.mutability, Mutability::Var);
                assert_eq!(init.len(), 1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn type_and_start_fields() {
        let fields = module_fields("(module (type $t (func (param i32) (result i32))) (start $main))");
        match &fields[0].kind {
            NodeKind::TypeInstruction { id, signature } => {
                assert_eq!(id.as_ref().unwrap().value, "t");
                assert_eq!(signature.params.len(), 1);
                assert_eq!(signature.results, vec![Valtype::I32]);
            }
            other => panic!("expected TypeInstruction, got {}", other.name()),
        }
        match &fields[1].kind {
            NodeKind::Start { index } => assert!(matches!(index, Index::Id(id) if id.value == "main")),
            other => panic!("expected Start, got {}", other.name()),
        }
    }

    #[test]
    fn func_with_type_reference() {
        let fields = module_fields("(module (type $t (func)) (func $f (type $t)))");
        match &fields[1].kind {
            NodeKind::Func { signature, .. } => {
                assert!(matches!(signature, TypeUse::TypeRef(Index::Id(id)) if id.value == "t"));
            }
            _ => unreachable!(),
        }
    }

    // ------------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------------

    #[test]
    fn comments_inside_forms_are_skipped() {
        let fields = module_fields(
            "(module ;; line comment\n (; block comment ;) (func $f (; here too ;) (nop)))",
        );
        assert_eq!(fields.len(), 1);
        assert!(matches!(fields[0].kind, NodeKind::Func { .. }));
    }

    #[test]
    fn top_level_comments_become_nodes() {
        let program = parse_str(";; leading\n(; banner ;)\n(module)\n;; trailing").unwrap();
        match &program.kind {
            NodeKind::Program { body } => {
                let kinds: Vec<_> = body.iter().map(|n| n.kind_name()).collect();
                assert_eq!(kinds, vec!["LeadingComment", "BlockComment", "Module", "LeadingComment"]);
                assert!(matches!(&body[0].kind, NodeKind::LeadingComment(text) if text == " leading"));
                assert!(matches!(&body[1].kind, NodeKind::BlockComment(text) if text == " banner "));
                assert!(matches!(&body[3].kind, NodeKind::LeadingComment(text) if text == " trailing"));
            }
            _ => unreachable!(),
        }
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    #[test]
    fn unknown_section_is_fatal() {
        let err = parse_str("(module (bogus))").unwrap_err();
        assert!(err.message.contains("unknown section"));
    }

    #[test]
    fn error_message_starts_with_code_frame() {
        let err = parse_str("(module\n  (bogus))").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.starts_with("  2 |"), "got: {}", rendered);
        assert!(rendered.contains("^"));
        assert!(rendered.contains("line 2"));
    }

    #[test]
    fn unbalanced_parens_error() {
        assert!(parse_str("(module").is_err());
        assert!(parse_str("(module))").is_err());
    }

    #[test]
    fn malformed_literal_error() {
        let err = parse_str("(module (func (i32.const 12zz)))").unwrap_err();
        assert!(err.message.contains("out of range") || err.message.contains("invalid"));
    }

    #[test]
    fn export_must_name_a_kind() {
        assert!(parse_str(r#"(module (export "x" (qux $f)))"#).is_err());
    }
}
