//! The WebAssembly text format abstract syntax tree.
//!
//! Every syntactic construct the parser recognises is a variant of a single
//! sum type, [`NodeKind`], wrapped in a [`Node`] carrying an optional source
//! span. Structural invariants that the text format imposes (for example,
//! `block`/`loop`/`if` must be dedicated structured-instruction nodes, never
//! plain [`NodeKind::Instr`]) are enforced by the builder functions in
//! [`builders`].
//!
//! # Example
//!
//! ```
//! use wattle::ast::{builders, NodeKind};
//!
//! let module = builders::module(None, vec![]);
//! assert_eq!(module.kind_name(), "Module");
//! assert!(matches!(module.kind, NodeKind::Module { .. }));
//! ```

pub mod builders;
pub mod ident;
pub mod traverse;

pub use ident::UniqueNameGenerator;
pub use traverse::{traverse, NodePath, Visitors};

use crate::wat::token::Span;
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Value types
// ============================================================================

/// One of the four primitive numeric types of WebAssembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Valtype {
    I32,
    I64,
    F32,
    F64,
}

impl Valtype {
    /// Parse a valtype keyword, returning `None` for any other word.
    pub fn from_keyword(word: &str) -> Option<Valtype> {
        match word {
            "i32" => Some(Valtype::I32),
            "i64" => Some(Valtype::I64),
            "f32" => Some(Valtype::F32),
            "f64" => Some(Valtype::F64),
            _ => None,
        }
    }

    /// The keyword spelling of this valtype.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Valtype::I32 => "i32",
            Valtype::I64 => "i64",
            Valtype::F32 => "f32",
            Valtype::F64 => "f64",
        }
    }
}

impl fmt::Display for Valtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Leaf payloads
// ============================================================================

/// A symbolic name (`$foo` in source).
///
/// `raw` holds the original source spelling and is empty for identifiers
/// synthesised by the unique-name generator, so a printer can omit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub value: String,
    pub raw: String,
}

impl Identifier {
    /// An identifier that appeared literally in the source.
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let raw = format!("${}", value);
        Self { value, raw }
    }

    /// Whether this identifier was synthesised rather than written.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.raw.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.value)
    }
}

/// The decoded value of a numeric literal.
///
/// Literals are decoded into the fixed-width representation demanded by the
/// instruction consuming them, not into one generic number type. Integer
/// coercion wraps; see [`crate::wat::number`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl NumberValue {
    /// The valtype this value was decoded as.
    #[must_use]
    pub fn valtype(&self) -> Valtype {
        match self {
            NumberValue::I32(_) => Valtype::I32,
            NumberValue::I64(_) => Valtype::I64,
            NumberValue::F32(_) => Valtype::F32,
            NumberValue::F64(_) => Valtype::F64,
        }
    }

    /// Read this value as an unsigned index, if it is an integer.
    #[must_use]
    pub fn as_index(&self) -> Option<u32> {
        match self {
            NumberValue::I32(v) => Some(*v as u32),
            NumberValue::I64(v) => Some(*v as u32),
            _ => None,
        }
    }
}

/// A numeric literal: its decoded value plus the raw source text.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    pub value: NumberValue,
    pub raw: String,
}

impl NumberLiteral {
    pub fn new(value: NumberValue, raw: impl Into<String>) -> Self {
        Self {
            value,
            raw: raw.into(),
        }
    }
}

/// A memory or table size range, in the unit native to the declaring field
/// (pages for memories, elements for tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub min: u32,
    pub max: Option<u32>,
}

/// Whether a global may be written after instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Const,
    Var,
}

/// The type of a global: its valtype and mutability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub valtype: Valtype,
    pub mutability: Mutability,
}

/// A raw byte sequence, as produced by decoding data-segment strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteArray {
    pub values: Vec<u8>,
}

// ============================================================================
// Indices and signatures
// ============================================================================

/// A reference to a function/global/memory/table/type slot: either a
/// symbolic name or a zero-based position.
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Id(Identifier),
    Num(u32),
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Id(id) => write!(f, "{}", id),
            Index::Num(n) => write!(f, "{}", n),
        }
    }
}

/// One parameter in a function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub id: Option<String>,
    pub valtype: Valtype,
}

/// A function signature: parameter list and result list.
///
/// The dialect this crate targets allows at most one result; the parser
/// still collects a list so malformed input fails late with a clear message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signature {
    pub params: Vec<Param>,
    pub results: Vec<Valtype>,
}

/// A function's type: written inline or referencing a `(type ...)` field.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeUse {
    Signature(Signature),
    TypeRef(Index),
}

// ============================================================================
// Import/export descriptors
// ============================================================================

/// What an import binds: a function, global, memory, or table.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportDescr {
    Func(FuncImportDescr),
    Global(GlobalType),
    Memory(Limit),
    Table { element_type: String, limits: Limit },
}

/// Descriptor for an imported function: its local name and signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncImportDescr {
    pub id: Identifier,
    pub signature: Signature,
}

/// The namespace an export lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportType {
    Func,
    Global,
    Memory,
    Table,
}

impl ExportType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ExportType::Func => "Func",
            ExportType::Global => "Global",
            ExportType::Memory => "Memory",
            ExportType::Table => "Table",
        }
    }
}

/// What an export points at: an export type plus an index into that space.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDescr {
    pub export_type: ExportType,
    pub id: Index,
}

// ============================================================================
// Nodes
// ============================================================================

/// An AST node: a kind plus an optional source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub loc: Option<Span>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind, loc: None }
    }

    /// Attach a source span to this node.
    #[must_use]
    pub fn with_loc(mut self, loc: Span) -> Self {
        self.loc = Some(loc);
        self
    }

    /// The node kind's name, matching the text-format AST vocabulary.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// The first `Module` in a `Program` body, if any.
    ///
    /// Convenience for the common one-module-per-source case.
    #[must_use]
    pub fn first_module(&self) -> Option<&Node> {
        match &self.kind {
            NodeKind::Program { body } => body.iter().find(|n| matches!(n.kind, NodeKind::Module { .. })),
            _ => None,
        }
    }
}

/// Every node kind the parser can produce.
///
/// Structured control flow gets dedicated variants; a plain [`NodeKind::Instr`]
/// never carries `block`, `loop`, or `if` as its id.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Root node: the ordered sequence of top-level forms.
    Program { body: Vec<Node> },

    /// A `(module ...)` form with its ordered fields.
    Module {
        id: Option<Identifier>,
        fields: Vec<Node>,
    },

    /// A `(module binary "..."*)` form carrying opaque byte-string chunks.
    BinaryModule {
        id: Option<Identifier>,
        blob: Vec<String>,
    },

    /// A `(module quote "..."*)` form carrying quoted source chunks.
    QuoteModule {
        id: Option<Identifier>,
        string: Vec<String>,
    },

    /// A function definition.
    Func {
        id: Identifier,
        signature: TypeUse,
        body: Vec<Node>,
    },

    /// A plain instruction: opcode name, optional valtype prefix, positional
    /// arguments, and `key=value` named arguments.
    Instr {
        id: String,
        object: Option<Valtype>,
        args: Vec<Node>,
        named_args: HashMap<String, NumberLiteral>,
    },

    /// A `(block ...)` structured instruction.
    BlockInstruction {
        label: Identifier,
        result: Option<Valtype>,
        instr: Vec<Node>,
    },

    /// A `(loop ...)` structured instruction.
    LoopInstruction {
        label: Identifier,
        result: Option<Valtype>,
        instr: Vec<Node>,
    },

    /// An `(if ...)` structured instruction with test, then, and else arms.
    IfInstruction {
        label: Identifier,
        result: Option<Valtype>,
        test: Vec<Node>,
        consequent: Vec<Node>,
        alternate: Vec<Node>,
    },

    /// A direct call, with nested argument instructions in folded form.
    CallInstruction {
        index: Index,
        instr_args: Vec<Node>,
    },

    /// An indirect call through the table.
    CallIndirectInstruction {
        signature: TypeUse,
        instr_args: Vec<Node>,
    },

    /// A `(type ...)` field binding a name to a signature.
    TypeInstruction {
        id: Option<Identifier>,
        signature: Signature,
    },

    /// An `(import "module" "name" ...)` field.
    ModuleImport {
        module: String,
        name: String,
        descr: ImportDescr,
    },

    /// An `(export "name" ...)` field.
    ModuleExport { name: String, descr: ExportDescr },

    /// A `(memory ...)` field.
    Memory { limits: Limit, id: Identifier },

    /// A `(table ...)` field.
    Table {
        element_type: String,
        limits: Limit,
        name: Identifier,
        elem_indices: Vec<Index>,
    },

    /// A `(global ...)` field with its initialiser instruction sequence.
    Global {
        global_type: GlobalType,
        init: Vec<Node>,
        name: Identifier,
    },

    /// A `(data ...)` segment: target memory, offset expression, and bytes.
    Data {
        memory_index: u32,
        offset: Box<Node>,
        init: ByteArray,
    },

    /// An `(elem ...)` segment: target table, offset expression, functions.
    Elem {
        table_index: u32,
        offset: Vec<Node>,
        funcs: Vec<Index>,
    },

    /// A `(start ...)` field naming the start function.
    Start { index: Index },

    // Leaves -----------------------------------------------------------------
    Identifier(Identifier),
    NumberLiteral(NumberLiteral),
    ValtypeLiteral(Valtype),
    StringLiteral(String),
    LeadingComment(String),
    BlockComment(String),
}

impl NodeKind {
    /// The kind's name, matching the text-format AST vocabulary.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Program { .. } => "Program",
            NodeKind::Module { .. } => "Module",
            NodeKind::BinaryModule { .. } => "BinaryModule",
            NodeKind::QuoteModule { .. } => "QuoteModule",
            NodeKind::Func { .. } => "Func",
            NodeKind::Instr { .. } => "Instr",
            NodeKind::BlockInstruction { .. } => "BlockInstruction",
            NodeKind::LoopInstruction { .. } => "LoopInstruction",
            NodeKind::IfInstruction { .. } => "IfInstruction",
            NodeKind::CallInstruction { .. } => "CallInstruction",
            NodeKind::CallIndirectInstruction { .. } => "CallIndirectInstruction",
            NodeKind::TypeInstruction { .. } => "TypeInstruction",
            NodeKind::ModuleImport { .. } => "ModuleImport",
            NodeKind::ModuleExport { .. } => "ModuleExport",
            NodeKind::Memory { .. } => "Memory",
            NodeKind::Table { .. } => "Table",
            NodeKind::Global { .. } => "Global",
            NodeKind::Data { .. } => "Data",
            NodeKind::Elem { .. } => "Elem",
            NodeKind::Start { .. } => "Start",
            NodeKind::Identifier(_) => "Identifier",
            NodeKind::NumberLiteral(_) => "NumberLiteral",
            NodeKind::ValtypeLiteral(_) => "ValtypeLiteral",
            NodeKind::StringLiteral(_) => "StringLiteral",
            NodeKind::LeadingComment(_) => "LeadingComment",
            NodeKind::BlockComment(_) => "BlockComment",
        }
    }
}
