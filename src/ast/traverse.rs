//! Depth-first AST traversal with visitor callbacks.
//!
//! Visitors are keyed by node kind name; each callback receives a
//! [`NodePath`] giving mutable access to the node and the ability to remove
//! it from its parent's sequence.
//!
//! # Example
//!
//! ```
//! use wattle::ast::{builders, traverse, NodeKind, Visitors};
//!
//! let mut module = builders::module(None, vec![
//!     builders::bare_instr("nop", None),
//! ]);
//!
//! let mut count = 0;
//! let mut visitors = Visitors::new().on("Instr", |path| {
//!     let _ = &path.node.kind;
//!     path.remove();
//! });
//! traverse(&mut module, &mut visitors);
//!
//! if let NodeKind::Module { fields, .. } = &module.kind {
//!     count = fields.len();
//! }
//! assert_eq!(count, 0);
//! ```

use super::{Node, NodeKind};
use std::collections::HashMap;

/// The view a visitor callback receives: the node plus a removal latch.
pub struct NodePath<'a> {
    pub node: &'a mut Node,
    removed: bool,
}

impl<'a> NodePath<'a> {
    /// Mark this node for removal from its parent's sequence.
    ///
    /// Removal only takes effect for nodes held in a sequence (module
    /// fields, instruction bodies, and so on); marking the root or a
    /// single-slot child is a no-op.
    pub fn remove(&mut self) {
        self.removed = true;
    }
}

type Callback<'v> = Box<dyn FnMut(&mut NodePath) + 'v>;

/// A set of visitor callbacks keyed by node kind name.
#[derive(Default)]
pub struct Visitors<'v> {
    callbacks: HashMap<&'static str, Callback<'v>>,
}

impl<'v> Visitors<'v> {
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    /// Register a callback for the given node kind name (e.g. `"Func"`).
    #[must_use]
    pub fn on(mut self, kind: &'static str, callback: impl FnMut(&mut NodePath) + 'v) -> Self {
        self.callbacks.insert(kind, Box::new(callback));
        self
    }
}

/// Walk the tree depth-first, invoking any registered callback at each node.
///
/// A node marked removed is dropped from its parent's sequence and its
/// children are not visited.
pub fn traverse(root: &mut Node, visitors: &mut Visitors) {
    visit(root, visitors);
}

/// Visit one node. Returns false if the node asked to be removed.
fn visit(node: &mut Node, visitors: &mut Visitors) -> bool {
    let kind_name = node.kind_name();
    if let Some(callback) = visitors.callbacks.get_mut(kind_name) {
        let mut path = NodePath {
            node: &mut *node,
            removed: false,
        };
        callback(&mut path);
        if path.removed {
            return false;
        }
    }

    match &mut node.kind {
        NodeKind::Program { body } => visit_sequence(body, visitors),
        NodeKind::Module { fields, .. } => visit_sequence(fields, visitors),
        NodeKind::Func { body, .. } => visit_sequence(body, visitors),
        NodeKind::Instr { args, .. } => visit_sequence(args, visitors),
        NodeKind::BlockInstruction { instr, .. } | NodeKind::LoopInstruction { instr, .. } => {
            visit_sequence(instr, visitors);
        }
        NodeKind::IfInstruction {
            test,
            consequent,
            alternate,
            ..
        } => {
            visit_sequence(test, visitors);
            visit_sequence(consequent, visitors);
            visit_sequence(alternate, visitors);
        }
        NodeKind::CallInstruction { instr_args, .. } | NodeKind::CallIndirectInstruction { instr_args, .. } => {
            visit_sequence(instr_args, visitors);
        }
        NodeKind::Global { init, .. } => visit_sequence(init, visitors),
        NodeKind::Elem { offset, .. } => visit_sequence(offset, visitors),
        NodeKind::Data { offset, .. } => {
            // Single-slot child: visited, but not removable.
            visit(offset, visitors);
        }
        _ => {}
    }

    true
}

fn visit_sequence(nodes: &mut Vec<Node>, visitors: &mut Visitors) {
    nodes.retain_mut(|child| visit(child, visitors));
}
