//! Module instantiation.
//!
//! [`create_instance`] walks a parsed module's fields and populates the
//! allocator: a function instance per `func` and per function import
//! (host callables are held directly and marked external), a global per
//! `global` (initialisers run in a transient frame), tables and memory per
//! their limits. Definition fields are processed in order; segments,
//! exports, and the start function run afterwards, once every address
//! exists.
//!
//! The returned instance record holds addresses, not references: function
//! instances point back at their module through the allocator, so the
//! function/module cycle never materialises as actual pointers.

use super::allocator::{
    Allocator, FuncAddr, FuncInstance, FuncKind, FuncSignature, GlobalAddr, GlobalInstance, MemAddr, TableAddr,
    TableInstance,
};
use super::executor::{call_function, execute_stack_frame};
use super::frame::StackFrame;
use super::imports::ImportObject;
use super::memory::Memory;
use super::values;
use super::{Outcome, RuntimeError, Value};
use crate::ast::{ExportType, ImportDescr, Index, Node, NodeKind, Signature, TypeUse};
use std::collections::HashMap;
use std::rc::Rc;

/// A runtime module instance: its exports plus per-space address lists.
#[derive(Debug, Clone, Default)]
pub struct ModuleInstance {
    pub exports: Vec<ExportInstance>,
    pub funcaddrs: Vec<FuncAddr>,
    pub globaladdrs: Vec<GlobalAddr>,
    pub tableaddrs: Vec<TableAddr>,
    pub memaddrs: Vec<MemAddr>,
    /// Function name -> position in `funcaddrs`, for symbolic `call`.
    pub func_names: HashMap<String, usize>,
}

impl ModuleInstance {
    /// Look up an export by name.
    #[must_use]
    pub fn export(&self, name: &str) -> Option<&ExportInstance> {
        self.exports.iter().find(|e| e.name == name)
    }
}

/// One exported binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInstance {
    pub name: String,
    pub value: ExternalValue,
}

/// What an export resolves to: a kind and an address in that kind's space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalValue {
    pub kind: ExportType,
    pub addr: usize,
}

/// Call an exported function by name.
pub fn invoke(
    alloc: &mut Allocator,
    instance: &ModuleInstance,
    name: &str,
    args: Vec<Value>,
) -> Result<Outcome, RuntimeError> {
    let export = instance
        .export(name)
        .ok_or_else(|| RuntimeError::UnknownExport(name.to_string()))?;
    match export.value.kind {
        ExportType::Func => call_function(alloc, FuncAddr(export.value.addr), args),
        _ => Err(RuntimeError::UnknownFunction(name.to_string())),
    }
}

// ============================================================================
// Instantiation
// ============================================================================

/// Per-space name tables used while resolving indices during instantiation.
#[derive(Default)]
struct NameTables {
    globals: HashMap<String, usize>,
    memories: HashMap<String, usize>,
    tables: HashMap<String, usize>,
}

/// Instantiate a parsed `Module` node against the given allocator and
/// host imports.
pub fn create_instance(
    alloc: &mut Allocator,
    module: &Node,
    mut externals: ImportObject,
) -> Result<ModuleInstance, RuntimeError> {
    let fields = match &module.kind {
        NodeKind::Module { fields, .. } => fields,
        other => {
            return Err(RuntimeError::InvalidModule(format!(
                "expected a Module node, got {}",
                other.name()
            )))
        }
    };

    let maddr = alloc.next_module_addr();
    let mut instance = ModuleInstance::default();
    let mut names = NameTables::default();

    // Type definitions resolve forward references from (type $t) uses.
    let mut types: Vec<Signature> = Vec::new();
    let mut type_names: HashMap<String, usize> = HashMap::new();
    for field in fields {
        if let NodeKind::TypeInstruction { id, signature } = &field.kind {
            if let Some(id) = id {
                type_names.insert(id.value.clone(), types.len());
            }
            types.push(signature.clone());
        }
    }

    // Deferred work: segments, exports, and start run once every
    // definition has an address.
    let mut deferred_elems: Vec<(TableAddr, u32, Vec<Index>)> = Vec::new();
    let mut data_fields: Vec<&Node> = Vec::new();
    let mut export_fields: Vec<&Node> = Vec::new();
    let mut start_index: Option<&Index> = None;

    for field in fields {
        match &field.kind {
            NodeKind::ModuleImport {
                module: import_module,
                name: import_name,
                descr,
            } => match descr {
                ImportDescr::Func(func) => {
                    let host = externals
                        .take(import_module, import_name)
                        .ok_or_else(|| RuntimeError::UnknownImport {
                            module: import_module.clone(),
                            name: import_name.clone(),
                        })?;
                    let addr = alloc.push_func(FuncInstance {
                        signature: runtime_signature(&func.signature),
                        kind: FuncKind::Host(host),
                        module: None,
                    });
                    instance.func_names.insert(func.id.value.clone(), instance.funcaddrs.len());
                    instance.funcaddrs.push(addr);
                }
                ImportDescr::Global(global_type) => {
                    let addr = alloc.push_global(GlobalInstance {
                        value: values::default_value(global_type.valtype),
                        mutability: global_type.mutability,
                    });
                    instance.globaladdrs.push(addr);
                }
                ImportDescr::Memory(_) => {
                    // The allocator's buffer, supplied by the host, is the
                    // imported memory.
                    instance.memaddrs.push(MemAddr(0));
                }
                ImportDescr::Table { limits, .. } => {
                    let addr = alloc.push_table(TableInstance::new(limits.min, limits.max));
                    instance.tableaddrs.push(addr);
                }
            },

            NodeKind::Func { id, signature, body } => {
                let signature = resolve_type_use(signature, &types, &type_names)?;
                let addr = alloc.push_func(FuncInstance {
                    signature,
                    kind: FuncKind::Wasm {
                        code: Rc::new(body.clone()),
                    },
                    module: Some(maddr),
                });
                instance.func_names.insert(id.value.clone(), instance.funcaddrs.len());
                instance.funcaddrs.push(addr);
            }

            NodeKind::Global {
                global_type,
                init,
                name,
            } => {
                // An inline import in the initialiser slot means the value
                // comes from outside; it starts zeroed.
                let value = if matches!(init.first().map(|n| &n.kind), Some(NodeKind::ModuleImport { .. })) {
                    values::default_value(global_type.valtype)
                } else {
                    let value = eval_constant(alloc, &instance, init)?;
                    if value.valtype() != Some(global_type.valtype) {
                        return Err(RuntimeError::TypeMismatch {
                            expected: global_type.valtype.name().to_string(),
                            actual: value.type_name().to_string(),
                        });
                    }
                    value
                };
                let addr = alloc.push_global(GlobalInstance {
                    value,
                    mutability: global_type.mutability,
                });
                names.globals.insert(name.value.clone(), instance.globaladdrs.len());
                instance.globaladdrs.push(addr);
            }

            NodeKind::Memory { limits, id } => {
                alloc.replace_memory(Memory::new(limits.min, limits.max)?);
                names.memories.insert(id.value.clone(), instance.memaddrs.len());
                instance.memaddrs.push(MemAddr(0));
            }

            NodeKind::Table {
                limits,
                name,
                elem_indices,
                ..
            } => {
                let addr = alloc.push_table(TableInstance::new(limits.min, limits.max));
                names.tables.insert(name.value.clone(), instance.tableaddrs.len());
                instance.tableaddrs.push(addr);
                if !elem_indices.is_empty() {
                    deferred_elems.push((addr, 0, elem_indices.clone()));
                }
            }

            NodeKind::Elem { .. } | NodeKind::Data { .. } => {}
            NodeKind::ModuleExport { .. } => export_fields.push(field),
            NodeKind::Start { index } => start_index = Some(index),
            NodeKind::TypeInstruction { .. } => {}
            NodeKind::LeadingComment(_) | NodeKind::BlockComment(_) => {}

            other => {
                return Err(RuntimeError::InvalidModule(format!(
                    "unexpected module field: {}",
                    other.name()
                )))
            }
        }
    }

    // Element segments, now that functions have addresses.
    for field in fields {
        if let NodeKind::Elem {
            table_index,
            offset,
            funcs,
        } = &field.kind
        {
            let table_addr = *instance
                .tableaddrs
                .get(*table_index as usize)
                .ok_or_else(|| RuntimeError::InvalidModule("element segment references no table".to_string()))?;
            let offset = constant_u32(alloc, &instance, offset)?;
            deferred_elems.push((table_addr, offset, funcs.clone()));
        } else if let NodeKind::Data { .. } = &field.kind {
            data_fields.push(field);
        }
    }

    for (table_addr, offset, indices) in deferred_elems {
        for (i, index) in indices.iter().enumerate() {
            let func_addr = resolve_func(&instance, index)?;
            let table = alloc.table_mut(table_addr)?;
            let slot = offset as usize + i;
            if slot >= table.elements.len() {
                return Err(RuntimeError::TableIndexOutOfBounds(slot as u32));
            }
            table.elements[slot] = Some(func_addr);
        }
    }

    // Data segments.
    for field in data_fields {
        if let NodeKind::Data { offset, init, .. } = &field.kind {
            let offset = constant_u32(alloc, &instance, std::slice::from_ref(offset.as_ref()))?;
            alloc
                .memory_mut()
                .write_bytes(offset, &init.values)
                .map_err(|trap| RuntimeError::Trap(trap.message))?;
        }
    }

    // Exports.
    for field in export_fields {
        if let NodeKind::ModuleExport { name, descr } = &field.kind {
            let value = resolve_export(&instance, &names, &descr.id, descr.export_type)?;
            instance.exports.push(ExportInstance {
                name: name.clone(),
                value,
            });
        }
    }

    // Register the instance, then run the start function against it.
    alloc.push_module(instance.clone());

    if let Some(index) = start_index {
        let addr = resolve_func(&instance, index)?;
        match call_function(alloc, addr, vec![])? {
            Outcome::Trap(trap) => return Err(RuntimeError::Trap(trap.message)),
            Outcome::Done(_) => {}
        }
    }

    Ok(instance)
}

// ============================================================================
// Helpers
// ============================================================================

fn runtime_signature(signature: &Signature) -> FuncSignature {
    FuncSignature {
        params: signature.params.iter().map(|p| p.valtype).collect(),
        results: signature.results.clone(),
    }
}

fn resolve_type_use(
    type_use: &TypeUse,
    types: &[Signature],
    type_names: &HashMap<String, usize>,
) -> Result<FuncSignature, RuntimeError> {
    match type_use {
        TypeUse::Signature(signature) => Ok(runtime_signature(signature)),
        TypeUse::TypeRef(index) => {
            let position = match index {
                Index::Num(n) => *n as usize,
                Index::Id(id) => *type_names
                    .get(&id.value)
                    .ok_or_else(|| RuntimeError::InvalidModule(format!("unknown type: ${}", id.value)))?,
            };
            types
                .get(position)
                .map(runtime_signature)
                .ok_or_else(|| RuntimeError::InvalidModule(format!("unknown type index: {}", position)))
        }
    }
}

fn resolve_func(instance: &ModuleInstance, index: &Index) -> Result<FuncAddr, RuntimeError> {
    let position = match index {
        Index::Num(n) => *n as usize,
        Index::Id(id) => *instance
            .func_names
            .get(&id.value)
            .ok_or_else(|| RuntimeError::UnknownFunction(id.value.clone()))?,
    };
    instance
        .funcaddrs
        .get(position)
        .copied()
        .ok_or_else(|| RuntimeError::UnknownFunction(index.to_string()))
}

fn resolve_export(
    instance: &ModuleInstance,
    names: &NameTables,
    index: &Index,
    kind: ExportType,
) -> Result<ExternalValue, RuntimeError> {
    let position = |table: &HashMap<String, usize>| -> Result<usize, RuntimeError> {
        match index {
            Index::Num(n) => Ok(*n as usize),
            Index::Id(id) => table
                .get(&id.value)
                .copied()
                .ok_or_else(|| RuntimeError::InvalidModule(format!("export references unknown ${}", id.value))),
        }
    };

    let addr = match kind {
        ExportType::Func => resolve_func(instance, index)?.0,
        ExportType::Global => {
            let i = position(&names.globals)?;
            instance
                .globaladdrs
                .get(i)
                .ok_or_else(|| RuntimeError::InvalidModule(format!("export references unknown global {}", i)))?
                .0
        }
        ExportType::Memory => {
            let i = position(&names.memories)?;
            instance
                .memaddrs
                .get(i)
                .ok_or_else(|| RuntimeError::InvalidModule(format!("export references unknown memory {}", i)))?
                .0
        }
        ExportType::Table => {
            let i = position(&names.tables)?;
            instance
                .tableaddrs
                .get(i)
                .ok_or_else(|| RuntimeError::InvalidModule(format!("export references unknown table {}", i)))?
                .0
        }
    };

    Ok(ExternalValue { kind, addr })
}

/// Run an initialiser sequence in a transient frame and take its value.
fn eval_constant(alloc: &mut Allocator, instance: &ModuleInstance, code: &[Node]) -> Result<Value, RuntimeError> {
    let mut frame = StackFrame::for_module(Rc::new(code.to_vec()), vec![], instance.clone());
    match execute_stack_frame(alloc, &mut frame)? {
        Outcome::Done(Some(value)) => Ok(value),
        Outcome::Done(None) => Err(RuntimeError::MissingArgument("initialiser expression".to_string())),
        Outcome::Trap(trap) => Err(RuntimeError::Trap(trap.message)),
    }
}

/// An initialiser that must produce an i32 offset.
fn constant_u32(alloc: &mut Allocator, instance: &ModuleInstance, code: &[Node]) -> Result<u32, RuntimeError> {
    match eval_constant(alloc, instance, code)? {
        Value::I32(v) => Ok(v as u32),
        other => Err(RuntimeError::TypeMismatch {
            expected: "i32".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}
