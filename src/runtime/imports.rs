//! Host-supplied imports.
//!
//! An [`ImportObject`] carries the host functions a module's imports bind
//! to, keyed by `(module, name)`. Instantiation consumes the object: each
//! callable moves into the function instance that wraps it.

use super::allocator::HostFunc;
use super::values::Value;
use super::RuntimeError;
use std::collections::HashMap;

/// The set of externals handed to [`super::instance::create_instance`].
#[derive(Default)]
pub struct ImportObject {
    functions: HashMap<(String, String), HostFunc>,
}

impl ImportObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function under `module`.`name`.
    pub fn add_function(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> Result<Option<Value>, RuntimeError> + 'static,
    ) {
        self.functions.insert((module.into(), name.into()), Box::new(function));
    }

    /// Remove and return the callable for `module`.`name`, if registered.
    pub(crate) fn take(&mut self, module: &str, name: &str) -> Option<HostFunc> {
        self.functions.remove(&(module.to_string(), name.to_string()))
    }
}
