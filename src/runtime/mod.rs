//! WebAssembly runtime implementation.
//!
//! This module provides the execution engine for parsed modules: typed
//! values, the address-indexed allocator, linear memory, stack frames, the
//! instruction interpreter, and module instantiation.
//!
//! Execution is single-threaded and synchronous: [`execute_stack_frame`]
//! runs to completion or to trap. Traps are values, not errors -- they
//! propagate through child frames as an [`Outcome::Trap`] without
//! unwinding. [`RuntimeError`] is the thrown kind, reserved for host-level
//! misuse (missing arguments, unknown addresses, type mismatches).

pub mod allocator;
pub mod executor;
pub mod frame;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod test_utils;
pub mod values;

pub use allocator::{Allocator, FuncAddr, FuncInstance, FuncKind, GlobalAddr, GlobalInstance, HostFunc, MemAddr,
    ModuleAddr, TableAddr, TableInstance};
pub use executor::{call_function, execute_stack_frame};
pub use frame::{create_stack_frame, StackFrame};
pub use imports::ImportObject;
pub use instance::{invoke, ExportInstance, ExternalValue, ModuleInstance};
pub use memory::Memory;
pub use values::Value;

use std::fmt;

/// A WebAssembly-level trap: abnormal termination carried as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trap {
    /// Human-readable reason for the trap.
    pub message: String,
}

impl Trap {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trap: {}", self.message)
    }
}

/// The result of executing a stack frame: a value (or nothing), or a trap.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Execution completed; the frame's result value, if any.
    Done(Option<Value>),
    /// Execution trapped.
    Trap(Trap),
}

impl Outcome {
    /// Sentinel check used by callers receiving a child frame's result.
    #[must_use]
    pub fn is_trapped(&self) -> bool {
        matches!(self, Outcome::Trap(_))
    }
}

/// Host-level runtime errors.
///
/// These indicate misuse of the interpreter (malformed instruction
/// arguments, unknown addresses, bad imports), not WebAssembly-level
/// failures -- those are [`Trap`]s.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("missing argument to {0}")]
    MissingArgument(String),
    #[error("{0} index must be a numeric literal")]
    InvalidIndex(String),
    #[error("unknown local: {0}")]
    UnknownLocal(u32),
    #[error("unknown global: {0}")]
    UnknownGlobal(u32),
    #[error("unknown label: ${0}")]
    UnknownLabel(String),
    #[error("global {0} is immutable")]
    ImmutableGlobal(u32),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("unknown export: {0}")]
    UnknownExport(String),
    #[error("unknown import: {module}.{name}")]
    UnknownImport { module: String, name: String },
    #[error("{0} requires a valtype prefix")]
    MissingObject(String),
    #[error("unimplemented instruction: {0}")]
    UnimplementedInstruction(String),
    #[error("invalid module: {0}")]
    InvalidModule(String),
    #[error("memory error: {0}")]
    MemoryError(String),
    #[error("out of bounds table access: {0}")]
    TableIndexOutOfBounds(u32),
    #[error("invalid address: {0}")]
    InvalidAddress(usize),
    #[error("trap: {0}")]
    Trap(String),
}
