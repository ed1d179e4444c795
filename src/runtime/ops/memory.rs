//! Memory instruction executors: `t.load` and `t.store`.
//!
//! The base address comes off the stack as i32; the static `offset=`
//! named argument is added in 64-bit arithmetic so the effective address
//! cannot wrap. The `align=` hint is accepted and ignored, as allowed by
//! the execution spec. Out-of-bounds effective addresses trap.

use crate::ast::{NumberLiteral, Valtype};
use crate::runtime::allocator::Allocator;
use crate::runtime::executor::Flow;
use crate::runtime::frame::StackFrame;
use crate::runtime::{RuntimeError, Trap, Value};
use std::collections::HashMap;

/// Effective address: stack base (as unsigned) plus static offset.
fn effective_address(
    frame: &mut StackFrame,
    named_args: &HashMap<String, NumberLiteral>,
) -> Result<Result<u32, Flow>, RuntimeError> {
    let base = match frame.pop1_of_type(Valtype::I32)? {
        Value::I32(v) => v as u32,
        _ => 0,
    };
    let offset = named_args.get("offset").and_then(|lit| lit.value.as_index()).unwrap_or(0);

    let address = base as u64 + offset as u64;
    if address > u32::MAX as u64 {
        return Ok(Err(Flow::Trap(Trap::new("out of bounds memory access"))));
    }
    Ok(Ok(address as u32))
}

/// `t.load offset=n?`
pub(crate) fn load(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    object: Option<Valtype>,
    named_args: &HashMap<String, NumberLiteral>,
) -> Result<Flow, RuntimeError> {
    let ty = object.ok_or_else(|| RuntimeError::MissingObject("load".to_string()))?;
    let address = match effective_address(frame, named_args)? {
        Ok(address) => address,
        Err(flow) => return Ok(flow),
    };

    let memory = alloc.memory();
    let loaded = match ty {
        Valtype::I32 => memory.read_i32(address).map(Value::I32),
        Valtype::I64 => memory.read_i64(address).map(Value::I64),
        Valtype::F32 => memory.read_f32(address).map(Value::F32),
        Valtype::F64 => memory.read_f64(address).map(Value::F64),
    };

    match loaded {
        Ok(value) => {
            frame.push_result(ty, value)?;
            Ok(Flow::Continue)
        }
        Err(trap) => Ok(Flow::Trap(trap)),
    }
}

/// `t.store offset=n?`
pub(crate) fn store(
    alloc: &mut Allocator,
    frame: &mut StackFrame,
    object: Option<Valtype>,
    named_args: &HashMap<String, NumberLiteral>,
) -> Result<Flow, RuntimeError> {
    let ty = object.ok_or_else(|| RuntimeError::MissingObject("store".to_string()))?;

    // Value on top, address beneath it.
    let value = frame.pop1_of_type(ty)?;
    let address = match effective_address(frame, named_args)? {
        Ok(address) => address,
        Err(flow) => return Ok(flow),
    };

    let memory = alloc.memory_mut();
    let written = match value {
        Value::I32(v) => memory.write_i32(address, v),
        Value::I64(v) => memory.write_i64(address, v),
        Value::F32(v) => memory.write_f32(address, v),
        Value::F64(v) => memory.write_f64(address, v),
        Value::Label(_) => {
            return Err(RuntimeError::TypeMismatch {
                expected: ty.name().to_string(),
                actual: "label".to_string(),
            })
        }
    };

    match written {
        Ok(()) => Ok(Flow::Continue),
        Err(trap) => Ok(Flow::Trap(trap)),
    }
}
