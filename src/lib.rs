//! A WebAssembly text format toolkit: parser, AST, and interpreter.
//!
//! wattle provides the core pipeline for working with WAT/WAST source:
//! lexing, parsing into a typed abstract syntax tree, and executing that
//! tree against a host-supplied linear memory and imports via a
//! stack-frame tree-walking interpreter.
//!
//! # Modules
//!
//! - [`wat`] -- Text format support: lexer, literal decoders, and the
//!   recursive-descent parser producing an [`ast::Node`] tree.
//! - [`ast`] -- The node kinds, builder functions, unique-name generation,
//!   and depth-first traversal.
//! - [`runtime`] -- Typed values, the address-indexed allocator, linear
//!   memory, stack frames, instruction executors, and module instantiation.
//!
//! # Example
//!
//! Parse a WAT module, instantiate it, and call an exported function:
//!
//! ```
//! use wattle::wat;
//! use wattle::runtime::instance::create_instance;
//! use wattle::runtime::{invoke, Allocator, ImportObject, Memory, Outcome, Value};
//!
//! let program = wat::parse_str(r#"
//!     (module
//!         (func (export "add") (param i32 i32) (result i32)
//!             (i32.add (get_local 0) (get_local 1))))
//! "#).unwrap();
//!
//! let module = program.first_module().unwrap();
//! let mut allocator = Allocator::new(Memory::new(1, None).unwrap());
//! let instance = create_instance(&mut allocator, module, ImportObject::new()).unwrap();
//! let outcome = invoke(&mut allocator, &instance, "add", vec![Value::I32(2), Value::I32(3)]).unwrap();
//! assert_eq!(outcome, Outcome::Done(Some(Value::I32(5))));
//! ```
//!
//! # Scope
//!
//! Targets the pre-1.0 text format dialect (`get_local`, `anyfunc`,
//! single-result blocks). Binary encoding/decoding, validation, and the
//! CLI harness are out of scope for this crate.

pub mod ast;
pub mod runtime;
pub mod wat;
