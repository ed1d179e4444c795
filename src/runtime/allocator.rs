//! The allocator: an address-indexed store of runtime instances.
//!
//! Function, global, table, and module instances live in per-kind arenas
//! keyed by opaque addresses. Addresses are handed out monotonically and
//! stay stable for the allocator's lifetime, which is what lets a function
//! instance reference its module (and vice versa) without reference
//! cycles: each side holds an address, not a pointer.
//!
//! The allocator also owns the one linear memory buffer, supplied at
//! construction.

use super::instance::ModuleInstance;
use super::memory::Memory;
use super::values::Value;
use super::RuntimeError;
use crate::ast::{Mutability, Node, Valtype};
use std::fmt;
use std::rc::Rc;

/// Address of a function instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncAddr(pub usize);

/// Address of a global instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalAddr(pub usize);

/// Address of a table instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableAddr(pub usize);

/// Address of a memory instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemAddr(pub usize);

/// Address of a module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleAddr(pub usize);

/// A host function callable from WebAssembly.
pub type HostFunc = Box<dyn Fn(&[Value]) -> Result<Option<Value>, RuntimeError>>;

/// A function's runtime signature, with parameter names erased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuncSignature {
    pub params: Vec<Valtype>,
    pub results: Vec<Valtype>,
}

/// The executable part of a function instance.
pub enum FuncKind {
    /// A function defined by module code.
    Wasm { code: Rc<Vec<Node>> },
    /// An imported host function, holding the callable directly.
    Host(HostFunc),
}

impl fmt::Debug for FuncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncKind::Wasm { code } => f.debug_struct("Wasm").field("instructions", &code.len()).finish(),
            FuncKind::Host(_) => f.debug_struct("Host").finish_non_exhaustive(),
        }
    }
}

/// A function instance.
#[derive(Debug)]
pub struct FuncInstance {
    pub signature: FuncSignature,
    pub kind: FuncKind,
    /// The defining module, by address. Host functions have none.
    pub module: Option<ModuleAddr>,
}

impl FuncInstance {
    /// Whether this is an imported host function.
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.kind, FuncKind::Host(_))
    }
}

/// A global instance.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalInstance {
    pub value: Value,
    pub mutability: Mutability,
}

/// A table instance: function addresses, sized per its limits.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInstance {
    pub elements: Vec<Option<FuncAddr>>,
    pub max: Option<u32>,
}

impl TableInstance {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self {
            elements: vec![None; min as usize],
            max,
        }
    }
}

/// The store shared by every frame of a module tree.
///
/// Hosts running modules in parallel must give each its own allocator;
/// nothing here is synchronised.
#[derive(Debug)]
pub struct Allocator {
    funcs: Vec<FuncInstance>,
    globals: Vec<GlobalInstance>,
    tables: Vec<TableInstance>,
    modules: Vec<ModuleInstance>,
    memory: Memory,
}

impl Allocator {
    /// Create an allocator owning the given linear memory.
    pub fn new(memory: Memory) -> Self {
        Self {
            funcs: Vec::new(),
            globals: Vec::new(),
            tables: Vec::new(),
            modules: Vec::new(),
            memory,
        }
    }

    // ------------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------------

    pub fn push_func(&mut self, instance: FuncInstance) -> FuncAddr {
        let addr = FuncAddr(self.funcs.len());
        self.funcs.push(instance);
        addr
    }

    pub fn func(&self, addr: FuncAddr) -> Result<&FuncInstance, RuntimeError> {
        self.funcs.get(addr.0).ok_or(RuntimeError::InvalidAddress(addr.0))
    }

    // ------------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------------

    pub fn push_global(&mut self, instance: GlobalInstance) -> GlobalAddr {
        let addr = GlobalAddr(self.globals.len());
        self.globals.push(instance);
        addr
    }

    pub fn global(&self, addr: GlobalAddr) -> Result<&GlobalInstance, RuntimeError> {
        self.globals.get(addr.0).ok_or(RuntimeError::InvalidAddress(addr.0))
    }

    pub fn global_mut(&mut self, addr: GlobalAddr) -> Result<&mut GlobalInstance, RuntimeError> {
        self.globals.get_mut(addr.0).ok_or(RuntimeError::InvalidAddress(addr.0))
    }

    // ------------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------------

    pub fn push_table(&mut self, instance: TableInstance) -> TableAddr {
        let addr = TableAddr(self.tables.len());
        self.tables.push(instance);
        addr
    }

    pub fn table(&self, addr: TableAddr) -> Result<&TableInstance, RuntimeError> {
        self.tables.get(addr.0).ok_or(RuntimeError::InvalidAddress(addr.0))
    }

    pub fn table_mut(&mut self, addr: TableAddr) -> Result<&mut TableInstance, RuntimeError> {
        self.tables.get_mut(addr.0).ok_or(RuntimeError::InvalidAddress(addr.0))
    }

    // ------------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------------

    /// The address the next pushed module will receive. Instantiation
    /// reserves this before allocating the module's functions, so function
    /// instances can carry their module address up front.
    pub fn next_module_addr(&self) -> ModuleAddr {
        ModuleAddr(self.modules.len())
    }

    pub fn push_module(&mut self, instance: ModuleInstance) -> ModuleAddr {
        let addr = ModuleAddr(self.modules.len());
        self.modules.push(instance);
        addr
    }

    pub fn module(&self, addr: ModuleAddr) -> Result<&ModuleInstance, RuntimeError> {
        self.modules.get(addr.0).ok_or(RuntimeError::InvalidAddress(addr.0))
    }

    // ------------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------------

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Replace the linear memory buffer, used when a module declares its
    /// own memory with explicit limits.
    pub fn replace_memory(&mut self, memory: Memory) {
        self.memory = memory;
    }
}
