//! Numeric instruction executors: `t.const` and the binary operators.
//!
//! Dispatch is on the instruction's valtype prefix. `const` takes its
//! operand from the instruction's literal argument, coerced to the
//! declared type; binops pop right-then-left and push the typed result.
//! An unsupported `(type, op)` pair traps, as does integer division by
//! zero.

use crate::ast::{Node, NodeKind, Valtype};
use crate::runtime::executor::Flow;
use crate::runtime::frame::StackFrame;
use crate::runtime::values;
use crate::runtime::RuntimeError;

/// `t.const literal`: push the coerced literal.
pub(crate) fn const_op(frame: &mut StackFrame, object: Option<Valtype>, args: &[Node]) -> Result<Flow, RuntimeError> {
    let ty = object.ok_or_else(|| RuntimeError::MissingObject("const".to_string()))?;

    let literal = match args.first().map(|n| &n.kind) {
        Some(NodeKind::NumberLiteral(lit)) => lit,
        Some(_) => return Err(RuntimeError::InvalidIndex("const".to_string())),
        None => return Err(RuntimeError::MissingArgument("const".to_string())),
    };

    let value = values::cast_into_value(ty, &literal.value);
    frame.push_result(ty, value)?;
    Ok(Flow::Continue)
}

/// `t.add`, `t.sub`, `t.mul`, `t.div`, `t.min`, `t.max`, `t.copysign`.
pub(crate) fn binop_op(frame: &mut StackFrame, object: Option<Valtype>, op: &str) -> Result<Flow, RuntimeError> {
    let ty = object.ok_or_else(|| RuntimeError::MissingObject(op.to_string()))?;

    let (c1, c2) = frame.pop2(ty, ty)?;
    match values::binop(ty, op, &c1, &c2) {
        Ok(value) => {
            frame.push_result(ty, value)?;
            Ok(Flow::Continue)
        }
        Err(trap) => Ok(Flow::Trap(trap)),
    }
}
