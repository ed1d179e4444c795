//! Builder functions, one per node kind.
//!
//! Builders are the only sanctioned way to construct nodes: they enforce the
//! structural invariants the parser and any other producer must respect.
//! A violated invariant is a bug in the producer, so builders panic rather
//! than return an error.

use super::{
    ByteArray, ExportDescr, FuncImportDescr, GlobalType, Identifier, ImportDescr, Index, Limit, Node, NodeKind,
    NumberLiteral, NumberValue, Signature, TypeUse, Valtype,
};
use std::collections::HashMap;

/// The root node.
pub fn program(body: Vec<Node>) -> Node {
    Node::new(NodeKind::Program { body })
}

pub fn module(id: Option<Identifier>, fields: Vec<Node>) -> Node {
    Node::new(NodeKind::Module { id, fields })
}

pub fn binary_module(id: Option<Identifier>, blob: Vec<String>) -> Node {
    Node::new(NodeKind::BinaryModule { id, blob })
}

pub fn quote_module(id: Option<Identifier>, string: Vec<String>) -> Node {
    Node::new(NodeKind::QuoteModule { id, string })
}

pub fn func(id: Identifier, signature: TypeUse, body: Vec<Node>) -> Node {
    Node::new(NodeKind::Func { id, signature, body })
}

/// A plain instruction.
///
/// # Panics
///
/// Panics if `id` is `block`, `loop`, or `if`: structured instructions must
/// use their dedicated node kinds.
pub fn instr(
    id: impl Into<String>,
    object: Option<Valtype>,
    args: Vec<Node>,
    named_args: HashMap<String, NumberLiteral>,
) -> Node {
    let id = id.into();
    assert!(
        !matches!(id.as_str(), "block" | "loop" | "if"),
        "structured instruction {:?} must not be a plain Instr",
        id
    );
    Node::new(NodeKind::Instr {
        id,
        object,
        args,
        named_args,
    })
}

/// Shorthand for an argument-less instruction, common in tests.
pub fn bare_instr(id: impl Into<String>, object: Option<Valtype>) -> Node {
    instr(id, object, vec![], HashMap::new())
}

pub fn block_instruction(label: Identifier, result: Option<Valtype>, instr: Vec<Node>) -> Node {
    Node::new(NodeKind::BlockInstruction { label, result, instr })
}

pub fn loop_instruction(label: Identifier, result: Option<Valtype>, instr: Vec<Node>) -> Node {
    Node::new(NodeKind::LoopInstruction { label, result, instr })
}

pub fn if_instruction(
    label: Identifier,
    result: Option<Valtype>,
    test: Vec<Node>,
    consequent: Vec<Node>,
    alternate: Vec<Node>,
) -> Node {
    Node::new(NodeKind::IfInstruction {
        label,
        result,
        test,
        consequent,
        alternate,
    })
}

pub fn call_instruction(index: Index, instr_args: Vec<Node>) -> Node {
    Node::new(NodeKind::CallInstruction { index, instr_args })
}

pub fn call_indirect_instruction(signature: TypeUse, instr_args: Vec<Node>) -> Node {
    Node::new(NodeKind::CallIndirectInstruction { signature, instr_args })
}

pub fn type_instruction(id: Option<Identifier>, signature: Signature) -> Node {
    Node::new(NodeKind::TypeInstruction { id, signature })
}

pub fn module_import(module: impl Into<String>, name: impl Into<String>, descr: ImportDescr) -> Node {
    Node::new(NodeKind::ModuleImport {
        module: module.into(),
        name: name.into(),
        descr,
    })
}

pub fn func_import_descr(id: Identifier, signature: Signature) -> ImportDescr {
    ImportDescr::Func(FuncImportDescr { id, signature })
}

pub fn module_export(name: impl Into<String>, descr: ExportDescr) -> Node {
    Node::new(NodeKind::ModuleExport {
        name: name.into(),
        descr,
    })
}

pub fn memory(limits: Limit, id: Identifier) -> Node {
    Node::new(NodeKind::Memory { limits, id })
}

pub fn table(element_type: impl Into<String>, limits: Limit, name: Identifier, elem_indices: Vec<Index>) -> Node {
    Node::new(NodeKind::Table {
        element_type: element_type.into(),
        limits,
        name,
        elem_indices,
    })
}

pub fn global(global_type: GlobalType, init: Vec<Node>, name: Identifier) -> Node {
    Node::new(NodeKind::Global {
        global_type,
        init,
        name,
    })
}

/// A data segment.
///
/// # Panics
///
/// Panics if `offset` is not an instruction node.
pub fn data(memory_index: u32, offset: Node, init: ByteArray) -> Node {
    assert!(
        matches!(offset.kind, NodeKind::Instr { .. }),
        "data segment offset must be an instruction, got {}",
        offset.kind_name()
    );
    Node::new(NodeKind::Data {
        memory_index,
        offset: Box::new(offset),
        init,
    })
}

pub fn elem(table_index: u32, offset: Vec<Node>, funcs: Vec<Index>) -> Node {
    Node::new(NodeKind::Elem {
        table_index,
        offset,
        funcs,
    })
}

pub fn start(index: Index) -> Node {
    Node::new(NodeKind::Start { index })
}

pub fn identifier(id: Identifier) -> Node {
    Node::new(NodeKind::Identifier(id))
}

pub fn number_literal(value: NumberValue, raw: impl Into<String>) -> Node {
    Node::new(NodeKind::NumberLiteral(NumberLiteral::new(value, raw)))
}

pub fn valtype_literal(valtype: Valtype) -> Node {
    Node::new(NodeKind::ValtypeLiteral(valtype))
}

pub fn string_literal(value: impl Into<String>) -> Node {
    Node::new(NodeKind::StringLiteral(value.into()))
}

pub fn leading_comment(text: impl Into<String>) -> Node {
    Node::new(NodeKind::LeadingComment(text.into()))
}

pub fn block_comment(text: impl Into<String>) -> Node {
    Node::new(NodeKind::BlockComment(text.into()))
}
