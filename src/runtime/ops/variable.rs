//! Variable instruction executors: locals and globals.
//!
//! Local indices must be numeric literals; a symbolic index reaching the
//! executor is a producer bug surfaced as a [`RuntimeError`]. `set_local`
//! and `set_global` take their value either from a folded initialiser
//! argument (evaluated in a child frame) or from the stack. Globals
//! resolve through the originating module's address list and read/write
//! through the allocator.

use crate::ast::{Node, NodeKind};
use crate::runtime::allocator::Allocator;
use crate::runtime::executor::{create_and_execute_child_stack_frame, Flow, FrameResult};
use crate::runtime::frame::StackFrame;
use crate::runtime::values::default_value;
use crate::runtime::{RuntimeError, Value};
use crate::ast::Mutability;

/// Extract the numeric index argument of a variable instruction.
fn index_arg(args: &[Node], what: &str) -> Result<u32, RuntimeError> {
    match args.first().map(|n| &n.kind) {
        Some(NodeKind::NumberLiteral(lit)) => lit
            .value
            .as_index()
            .ok_or_else(|| RuntimeError::InvalidIndex(what.to_string())),
        Some(_) => Err(RuntimeError::InvalidIndex(what.to_string())),
        None => Err(RuntimeError::MissingArgument(what.to_string())),
    }
}

/// The value a set-style instruction assigns: a folded initialiser
/// evaluated in a child frame, or the top of the stack.
fn set_operand(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    args: &[Node],
    what: &str,
) -> Result<Result<Value, Flow>, RuntimeError> {
    if args.len() > 1 {
        match create_and_execute_child_stack_frame(alloc, frame, &args[1..])? {
            FrameResult::Trap(trap) => Ok(Err(Flow::Trap(trap))),
            FrameResult::Done(Some(value)) => Ok(Ok(value)),
            FrameResult::Done(None) => Err(RuntimeError::MissingArgument(what.to_string())),
            // An initialiser is a value expression; a branch or return
            // inside one keeps unwinding past the assignment.
            FrameResult::Branch { depth, value } => {
                if let Some(value) = value {
                    frame.push(value);
                }
                Ok(Err(Flow::Branch { depth }))
            }
            FrameResult::Return(value) => {
                frame.return_value = value;
                Ok(Err(Flow::Return))
            }
        }
    } else {
        Ok(Ok(frame.pop1()?))
    }
}

/// `get_local index`
pub(crate) fn get_local(frame: &mut StackFrame, args: &[Node]) -> Result<Flow, RuntimeError> {
    let index = index_arg(args, "get_local")?;
    let value = frame.get_local_by_index(index)?;
    frame.push(value);
    Ok(Flow::Continue)
}

/// `set_local index init?`
pub(crate) fn set_local(alloc: &mut Allocator, frame: &mut StackFrame, args: &[Node]) -> Result<Flow, RuntimeError> {
    let index = index_arg(args, "set_local")?;
    let value = match set_operand(alloc, frame, args, "set_local")? {
        Ok(value) => value,
        Err(flow) => return Ok(flow),
    };
    frame.set_local_by_index(index, value)?;
    Ok(Flow::Continue)
}

/// `tee_local index init?`: assign, leaving the value on the stack.
pub(crate) fn tee_local(alloc: &mut Allocator, frame: &mut StackFrame, args: &[Node]) -> Result<Flow, RuntimeError> {
    let index = index_arg(args, "tee_local")?;
    let value = match set_operand(alloc, frame, args, "tee_local")? {
        Ok(value) => value,
        Err(flow) => return Ok(flow),
    };
    frame.set_local_by_index(index, value.clone())?;
    frame.push(value);
    Ok(Flow::Continue)
}

/// `get_global index`
pub(crate) fn get_global(alloc: &mut Allocator, frame: &mut StackFrame, args: &[Node]) -> Result<Flow, RuntimeError> {
    let index = index_arg(args, "get_global")?;
    let addr = *frame
        .module
        .globaladdrs
        .get(index as usize)
        .ok_or(RuntimeError::UnknownGlobal(index))?;
    let value = alloc.global(addr)?.value.clone();
    frame.push(value);
    Ok(Flow::Continue)
}

/// `set_global index init?`
pub(crate) fn set_global(alloc: &mut Allocator, frame: &mut StackFrame, args: &[Node]) -> Result<Flow, RuntimeError> {
    let index = index_arg(args, "set_global")?;
    let value = match set_operand(alloc, frame, args, "set_global")? {
        Ok(value) => value,
        Err(flow) => return Ok(flow),
    };
    let addr = *frame
        .module
        .globaladdrs
        .get(index as usize)
        .ok_or(RuntimeError::UnknownGlobal(index))?;

    let global = alloc.global_mut(addr)?;
    if global.mutability == Mutability::Const {
        return Err(RuntimeError::ImmutableGlobal(index));
    }
    global.value = value;
    Ok(Flow::Continue)
}

/// `local t*`: materialise zero-initialised locals.
pub(crate) fn declare_locals(frame: &mut StackFrame, args: &[Node]) -> Result<Flow, RuntimeError> {
    for arg in args {
        match &arg.kind {
            NodeKind::ValtypeLiteral(ty) => frame.locals.push(default_value(*ty)),
            other => {
                return Err(RuntimeError::TypeMismatch {
                    expected: "valtype".to_string(),
                    actual: other.name().to_string(),
                })
            }
        }
    }
    Ok(Flow::Continue)
}
