//! The execution kernel.
//!
//! [`execute_stack_frame`] walks a frame's instruction sequence in order,
//! dispatching each node to its executor. Structured instructions and
//! calls run in child frames sharing the allocator, module, locals, and
//! the label chain; a trap produced anywhere yields immediately and
//! propagates through every parent frame without further execution.
//!
//! # Branching
//!
//! Control flow follows the label-stack model of the execution spec:
//! entering a structured instruction pushes its label, `br`/`br_if`
//! select a target by depth (0 = innermost) or by name against the label
//! chain, and the branch unwinds child frames outward until its target.
//! A branch to a `block` or `if` label exits that construct, carrying the
//! in-flight result value; a branch to a `loop` label restarts the loop
//! body. A branch that escapes the outermost frame ends the function,
//! like `return`.

use super::allocator::{Allocator, FuncAddr, FuncKind, FuncSignature};
use super::frame::StackFrame;
use super::instance::ModuleInstance;
use super::ops;
use super::values;
use super::{Outcome, RuntimeError, Trap, Value};
use crate::ast::{Identifier, Index, Node, NodeKind, Valtype};
use std::rc::Rc;

/// How execution proceeds after one instruction.
pub(crate) enum Flow {
    Continue,
    Return,
    Branch { depth: u32 },
    Trap(Trap),
}

/// How a frame's walk ended, as seen by the enclosing construct.
pub(crate) enum FrameResult {
    /// Ran to completion; the frame's result value, if any.
    Done(Option<Value>),
    /// An early `return` passed through this frame.
    Return(Option<Value>),
    /// A branch is still unwinding: `depth` counts remaining labels,
    /// `value` is the in-flight result.
    Branch { depth: u32, value: Option<Value> },
    Trap(Trap),
}

/// Execute a frame's code to completion or to trap.
///
/// On completion the frame's result is its pending return value, or the
/// value left on top of the stack (if any). A `return` or a branch that
/// escapes this frame ends execution with the carried value.
pub fn execute_stack_frame(alloc: &mut Allocator, frame: &mut StackFrame) -> Result<Outcome, RuntimeError> {
    match run_frame(alloc, frame)? {
        FrameResult::Trap(trap) => Ok(Outcome::Trap(trap)),
        FrameResult::Done(value) | FrameResult::Return(value) | FrameResult::Branch { value, .. } => {
            Ok(Outcome::Done(value))
        }
    }
}

/// The frame walk itself, keeping branch and return states distinct so
/// enclosing constructs can react to them.
pub(crate) fn run_frame(alloc: &mut Allocator, frame: &mut StackFrame) -> Result<FrameResult, RuntimeError> {
    let code = Rc::clone(&frame.code);
    for node in code.iter() {
        match exec_node(alloc, frame, node)? {
            Flow::Continue => {}
            Flow::Return => {
                let value = frame.return_value.take().or_else(|| frame.values.last().cloned());
                return Ok(FrameResult::Return(value));
            }
            Flow::Branch { depth } => {
                return Ok(FrameResult::Branch {
                    depth,
                    value: frame.values.last().cloned(),
                });
            }
            Flow::Trap(trap) => {
                frame.trapped = true;
                return Ok(FrameResult::Trap(trap));
            }
        }
    }

    let result = frame.return_value.take().or_else(|| frame.values.last().cloned());
    Ok(FrameResult::Done(result))
}

/// Run `code` in a child frame sharing the parent's locals, module, and
/// label chain.
///
/// Locals and labels move into the child for the duration, so local
/// writes are visible to the parent afterwards and branch names resolve
/// across frame boundaries.
pub(crate) fn create_and_execute_child_stack_frame(
    alloc: &mut Allocator,
    parent: &mut StackFrame,
    code: &[Node],
) -> Result<FrameResult, RuntimeError> {
    let mut child = StackFrame::for_module(
        Rc::new(code.to_vec()),
        std::mem::take(&mut parent.locals),
        parent.module.clone(),
    );
    child.labels = std::mem::take(&mut parent.labels);
    let outcome = run_frame(alloc, &mut child);
    parent.locals = std::mem::take(&mut child.locals);
    parent.labels = std::mem::take(&mut child.labels);
    outcome
}

// ============================================================================
// Node dispatch
// ============================================================================

pub(crate) fn exec_node(alloc: &mut Allocator, frame: &mut StackFrame, node: &Node) -> Result<Flow, RuntimeError> {
    match &node.kind {
        NodeKind::Instr {
            id,
            object,
            args,
            named_args,
        } => exec_instr(alloc, frame, id, *object, args, named_args),
        NodeKind::BlockInstruction { label, result, instr } => exec_block(alloc, frame, label, *result, instr),
        NodeKind::LoopInstruction { label, result, instr } => exec_loop(alloc, frame, label, *result, instr),
        NodeKind::IfInstruction {
            label,
            result,
            test,
            consequent,
            alternate,
        } => exec_if(alloc, frame, label, *result, test, consequent, alternate),
        NodeKind::CallInstruction { index, instr_args } => exec_call(alloc, frame, index, instr_args),
        NodeKind::CallIndirectInstruction { instr_args, .. } => exec_call_indirect(alloc, frame, instr_args),
        NodeKind::NumberLiteral(lit) => {
            frame.push(values::cast_into_value(lit.value.valtype(), &lit.value));
            Ok(Flow::Continue)
        }
        other => Err(RuntimeError::UnimplementedInstruction(other.name().to_string())),
    }
}

/// Evaluate any instruction-shaped arguments of a folded form into the
/// current frame's stack, in order. Literal arguments are immediates and
/// stay put.
pub(crate) fn eval_instr_args(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    args: &[Node],
) -> Result<Flow, RuntimeError> {
    for arg in args {
        if is_instruction(arg) {
            match exec_node(alloc, frame, arg)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
        }
    }
    Ok(Flow::Continue)
}

fn is_instruction(node: &Node) -> bool {
    matches!(
        node.kind,
        NodeKind::Instr { .. }
            | NodeKind::BlockInstruction { .. }
            | NodeKind::LoopInstruction { .. }
            | NodeKind::IfInstruction { .. }
            | NodeKind::CallInstruction { .. }
            | NodeKind::CallIndirectInstruction { .. }
    )
}

// ============================================================================
// Plain instruction dispatch
// ============================================================================

fn exec_instr(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    id: &str,
    object: Option<Valtype>,
    args: &[Node],
    named_args: &std::collections::HashMap<String, crate::ast::NumberLiteral>,
) -> Result<Flow, RuntimeError> {
    match id {
        "const" => ops::numeric::const_op(frame, object, args),
        "add" | "sub" | "mul" | "div" | "min" | "max" | "copysign" => {
            match eval_instr_args(alloc, frame, args)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
            ops::numeric::binop_op(frame, object, id)
        }
        "get_local" => ops::variable::get_local(frame, args),
        "set_local" => ops::variable::set_local(alloc, frame, args),
        "tee_local" => ops::variable::tee_local(alloc, frame, args),
        "get_global" => ops::variable::get_global(alloc, frame, args),
        "set_global" => ops::variable::set_global(alloc, frame, args),
        "load" => {
            match eval_instr_args(alloc, frame, args)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
            ops::memory::load(alloc, frame, object, named_args)
        }
        "store" => {
            match eval_instr_args(alloc, frame, args)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
            ops::memory::store(alloc, frame, object, named_args)
        }
        "local" => ops::variable::declare_locals(frame, args),
        "br" => {
            match eval_instr_args(alloc, frame, args)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
            let depth = branch_target(frame, args, "br")?;
            Ok(Flow::Branch { depth })
        }
        "br_if" => {
            match eval_instr_args(alloc, frame, args)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
            let depth = branch_target(frame, args, "br_if")?;
            let condition = match frame.pop1_of_type(Valtype::I32)? {
                Value::I32(v) => v,
                _ => 0,
            };
            if condition != 0 {
                Ok(Flow::Branch { depth })
            } else {
                Ok(Flow::Continue)
            }
        }
        "nop" => Ok(Flow::Continue),
        "drop" => {
            match eval_instr_args(alloc, frame, args)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
            frame.pop1()?;
            Ok(Flow::Continue)
        }
        "unreachable" => Ok(Flow::Trap(Trap::new("unreachable"))),
        "return" => {
            match eval_instr_args(alloc, frame, args)? {
                Flow::Continue => {}
                other => return Ok(other),
            }
            frame.return_value = frame.values.last().cloned();
            Ok(Flow::Return)
        }
        // Flat-form terminator; structure is already explicit in the tree.
        "end" => Ok(Flow::Continue),
        other => {
            let full = match object {
                Some(ty) => format!("{}.{}", ty, other),
                None => other.to_string(),
            };
            Err(RuntimeError::UnimplementedInstruction(full))
        }
    }
}

/// Resolve a branch instruction's target to a depth: a numeric literal is
/// the depth itself, a `$`-name is looked up against the label chain
/// (innermost first).
fn branch_target(frame: &StackFrame, args: &[Node], what: &str) -> Result<u32, RuntimeError> {
    match args.first().map(|n| &n.kind) {
        Some(NodeKind::NumberLiteral(lit)) => lit
            .value
            .as_index()
            .ok_or_else(|| RuntimeError::InvalidIndex(what.to_string())),
        Some(NodeKind::Identifier(id)) => frame
            .labels
            .iter()
            .rev()
            .position(|l| matches!(l, Value::Label(name) if *name == id.value))
            .map(|depth| depth as u32)
            .ok_or_else(|| RuntimeError::UnknownLabel(id.value.clone())),
        Some(_) | None => Err(RuntimeError::MissingArgument(what.to_string())),
    }
}

// ============================================================================
// Structured instructions
// ============================================================================

/// `block`: push the label, run the body in a child frame, surface the
/// declared result. A branch targeting this label exits the block with
/// the in-flight value; a deeper branch keeps unwinding.
fn exec_block(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    label: &Identifier,
    result: Option<Valtype>,
    instr: &[Node],
) -> Result<Flow, RuntimeError> {
    frame.labels.push(Value::Label(label.value.clone()));
    let outcome = create_and_execute_child_stack_frame(alloc, frame, instr)?;
    frame.labels.pop();

    match outcome {
        FrameResult::Trap(trap) => Ok(Flow::Trap(trap)),
        FrameResult::Return(value) => {
            frame.return_value = value;
            Ok(Flow::Return)
        }
        FrameResult::Done(value) | FrameResult::Branch { depth: 0, value } => {
            push_block_result(frame, result, value)?;
            Ok(Flow::Continue)
        }
        FrameResult::Branch { depth, value } => {
            // Still unwinding: keep the in-flight value on this frame's
            // stack so the target block can pick it up.
            if let Some(value) = value {
                frame.push(value);
            }
            Ok(Flow::Branch { depth: depth - 1 })
        }
    }
}

/// `loop`: like `block`, except a branch targeting this label restarts
/// the body -- the loop's label sits at its beginning, not its end.
fn exec_loop(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    label: &Identifier,
    result: Option<Valtype>,
    instr: &[Node],
) -> Result<Flow, RuntimeError> {
    loop {
        frame.labels.push(Value::Label(label.value.clone()));
        let outcome = create_and_execute_child_stack_frame(alloc, frame, instr)?;
        frame.labels.pop();

        match outcome {
            FrameResult::Trap(trap) => return Ok(Flow::Trap(trap)),
            FrameResult::Return(value) => {
                frame.return_value = value;
                return Ok(Flow::Return);
            }
            // Branch to the loop header: run the body again.
            FrameResult::Branch { depth: 0, .. } => continue,
            FrameResult::Done(value) => {
                push_block_result(frame, result, value)?;
                return Ok(Flow::Continue);
            }
            FrameResult::Branch { depth, value } => {
                if let Some(value) = value {
                    frame.push(value);
                }
                return Ok(Flow::Branch { depth: depth - 1 });
            }
        }
    }
}

fn exec_if(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    label: &Identifier,
    result: Option<Valtype>,
    test: &[Node],
    consequent: &[Node],
    alternate: &[Node],
) -> Result<Flow, RuntimeError> {
    match eval_instr_args(alloc, frame, test)? {
        Flow::Continue => {}
        other => return Ok(other),
    }

    let condition = match frame.pop1_of_type(Valtype::I32)? {
        Value::I32(v) => v,
        _ => 0,
    };
    let arm = if condition != 0 { consequent } else { alternate };

    // Each arm behaves as a block labelled by the if.
    exec_block(alloc, frame, label, result, arm)
}

/// Push a completed construct's value, enforcing its declared result type.
fn push_block_result(frame: &mut StackFrame, result: Option<Valtype>, value: Option<Value>) -> Result<(), RuntimeError> {
    if let Some(ty) = result {
        let value = value.ok_or_else(|| RuntimeError::TypeMismatch {
            expected: ty.name().to_string(),
            actual: "empty stack".to_string(),
        })?;
        frame.push_result(ty, value)?;
    }
    Ok(())
}

// ============================================================================
// Calls
// ============================================================================

fn resolve_func_addr(frame: &StackFrame, index: &Index) -> Result<FuncAddr, RuntimeError> {
    let position = match index {
        Index::Num(n) => *n as usize,
        Index::Id(id) => *frame
            .module
            .func_names
            .get(&id.value)
            .ok_or_else(|| RuntimeError::UnknownFunction(id.value.clone()))?,
    };
    frame
        .module
        .funcaddrs
        .get(position)
        .copied()
        .ok_or_else(|| RuntimeError::UnknownFunction(index.to_string()))
}

fn exec_call(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    index: &Index,
    instr_args: &[Node],
) -> Result<Flow, RuntimeError> {
    let addr = resolve_func_addr(frame, index)?;
    match eval_instr_args(alloc, frame, instr_args)? {
        Flow::Continue => {}
        other => return Ok(other),
    }
    call_through(alloc, frame, addr)
}

fn exec_call_indirect(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    instr_args: &[Node],
) -> Result<Flow, RuntimeError> {
    match eval_instr_args(alloc, frame, instr_args)? {
        Flow::Continue => {}
        other => return Ok(other),
    }

    let element = match frame.pop1_of_type(Valtype::I32)? {
        Value::I32(v) => v as u32,
        _ => 0,
    };
    let table_addr = match frame.module.tableaddrs.first() {
        Some(addr) => *addr,
        None => return Err(RuntimeError::InvalidModule("module has no table".to_string())),
    };

    let slot = alloc.table(table_addr)?.elements.get(element as usize).copied();
    let addr = match slot {
        None => return Ok(Flow::Trap(Trap::new("undefined element"))),
        Some(None) => return Ok(Flow::Trap(Trap::new(format!("uninitialized element {}", element)))),
        Some(Some(addr)) => addr,
    };

    call_through(alloc, frame, addr)
}

/// Pop the callee's arguments off the current stack, run the call, and
/// push its result.
fn call_through(alloc: &mut Allocator, frame: &mut StackFrame, addr: FuncAddr) -> Result<Flow, RuntimeError> {
    let signature = alloc.func(addr)?.signature.clone();

    let mut args = Vec::with_capacity(signature.params.len());
    for ty in signature.params.iter().rev() {
        args.push(frame.pop1_of_type(*ty)?);
    }
    args.reverse();

    match call_function(alloc, addr, args)? {
        Outcome::Trap(trap) => Ok(Flow::Trap(trap)),
        Outcome::Done(value) => {
            if let Some(ty) = signature.results.first() {
                let value = value.ok_or_else(|| RuntimeError::TypeMismatch {
                    expected: ty.name().to_string(),
                    actual: "empty stack".to_string(),
                })?;
                frame.push_result(*ty, value)?;
            }
            Ok(Flow::Continue)
        }
    }
}

/// Invoke a function instance by address with already-typed arguments.
///
/// Wasm functions run in a fresh frame whose locals are the arguments and
/// whose module is the function's defining module; host functions are
/// called directly.
pub fn call_function(alloc: &mut Allocator, addr: FuncAddr, args: Vec<Value>) -> Result<Outcome, RuntimeError> {
    let (signature, wasm): (FuncSignature, Option<(Rc<Vec<Node>>, Option<super::allocator::ModuleAddr>)>) = {
        let func = alloc.func(addr)?;
        let wasm = match &func.kind {
            FuncKind::Wasm { code } => Some((Rc::clone(code), func.module)),
            FuncKind::Host(_) => None,
        };
        (func.signature.clone(), wasm)
    };

    check_arguments(&signature, &args)?;

    match wasm {
        Some((code, module_addr)) => {
            let module = match module_addr {
                Some(maddr) => alloc.module(maddr)?.clone(),
                None => ModuleInstance::default(),
            };
            let mut child = StackFrame::for_module(code, args, module);
            execute_stack_frame(alloc, &mut child)
        }
        None => {
            let func = alloc.func(addr)?;
            match &func.kind {
                FuncKind::Host(host) => Ok(Outcome::Done(host(&args)?)),
                FuncKind::Wasm { .. } => Err(RuntimeError::InvalidAddress(addr.0)),
            }
        }
    }
}

fn check_arguments(signature: &FuncSignature, args: &[Value]) -> Result<(), RuntimeError> {
    if args.len() != signature.params.len() {
        return Err(RuntimeError::TypeMismatch {
            expected: format!("{} arguments", signature.params.len()),
            actual: format!("{} arguments", args.len()),
        });
    }
    for (arg, ty) in args.iter().zip(&signature.params) {
        if arg.valtype() != Some(*ty) {
            return Err(RuntimeError::TypeMismatch {
                expected: ty.name().to_string(),
                actual: arg.type_name().to_string(),
            });
        }
    }
    Ok(())
}
