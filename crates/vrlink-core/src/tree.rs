//! Hierarchical namespace of typed nodes
//!
//! The tree is an arena: nodes live in slots addressed by generational
//! [`NodeId`]s, and each node stores its parent id and an ordered map of
//! child names to ids. Ids stay valid until the node is removed or the tree
//! is reset; a stale id is detected instead of aliasing a recycled slot.

use indexmap::IndexMap;
use std::ops::Index;
use tracing::trace;

use crate::element::PathElement;
use crate::path::{self, PathError, PATH_SEPARATOR, PATH_SEPARATOR_STR};

/// Handle to a node inside a [`PathTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

/// A single node: name, typed value, parent link and ordered children
#[derive(Debug, Clone)]
pub struct PathNode {
    id: NodeId,
    name: String,
    value: PathElement,
    parent: Option<NodeId>,
    children: IndexMap<String, NodeId>,
}

impl PathNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &PathElement {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut PathElement {
        &mut self.value
    }

    pub fn set_value(&mut self, value: PathElement) {
        self.value = value;
    }

    /// Parent id, `None` for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Child ids in insertion order
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.values().copied()
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<PathNode>,
}

/// The path tree. Owns every node, including the root (`"/"`).
#[derive(Debug, Clone)]
pub struct PathTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    len: usize,
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTree {
    /// Create a tree holding only a `Null` root
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            len: 0,
        };
        tree.root = tree.alloc(String::new(), None);
        tree
    }

    fn alloc(&mut self, name: String, parent: Option<NodeId>) -> NodeId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = NodeId {
            index,
            generation: slot.generation,
        };
        slot.node = Some(PathNode {
            id,
            name,
            value: PathElement::Null,
            parent,
            children: IndexMap::new(),
        });
        self.len += 1;
        id
    }

    fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                self.len -= 1;
            }
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, root included
    pub fn len(&self) -> usize {
        self.len
    }

    /// A tree always holds its root, so it is never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Look up a node, `None` if the id is stale
    pub fn node(&self, id: NodeId) -> Option<&PathNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut PathNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn value(&self, id: NodeId) -> Option<&PathElement> {
        self.node(id).map(PathNode::value)
    }

    /// Replace a node's value. Returns false if the id is stale.
    pub fn set_value(&mut self, id: NodeId, value: PathElement) -> bool {
        match self.node_mut(id) {
            Some(node) => {
                node.value = value;
                true
            }
            None => false,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(PathNode::parent)
    }

    /// Child ids of a node in insertion order (empty for a stale id)
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|node| node.children().collect())
            .unwrap_or_default()
    }

    pub fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.node(id).and_then(|node| node.child(name))
    }

    /// Return the named child, creating it as `Null` if needed.
    /// `None` if `parent` is stale.
    pub fn get_or_create_child(&mut self, parent: NodeId, name: &str) -> Option<NodeId> {
        let existing = self.node(parent)?.child(name);
        if let Some(child) = existing {
            return Some(child);
        }
        let child = self.alloc(name.to_string(), Some(parent));
        if let Some(node) = self.node_mut(parent) {
            node.children.insert(name.to_string(), child);
        }
        trace!(path = %self.full_path(child), "Created path node");
        Some(child)
    }

    fn create_path(&mut self, start: NodeId, components: &[&str]) -> NodeId {
        let mut current = start;
        for component in components {
            // `start` is live and every step returns a live child
            current = match self.get_or_create_child(current, component) {
                Some(child) => child,
                None => return current,
            };
        }
        current
    }

    /// Get the node for an absolute path, creating missing nodes as `Null`.
    ///
    /// The path is validated before anything is created, so a failing call
    /// leaves the tree untouched.
    pub fn get_node_by_path(&mut self, path: &str) -> Result<NodeId, PathError> {
        let components = path::split_absolute(path)?;
        Ok(self.create_path(self.root, &components))
    }

    /// Like [`get_node_by_path`](Self::get_node_by_path), then set the node to
    /// `default` if it is still `Null`.
    pub fn get_node_by_path_or(
        &mut self,
        path: &str,
        default: PathElement,
    ) -> Result<NodeId, PathError> {
        let id = self.get_node_by_path(path)?;
        if let Some(node) = self.node_mut(id) {
            if node.value.is_null() {
                node.value = default;
            }
        }
        Ok(id)
    }

    /// Look up an absolute path without creating anything
    pub fn find_node_by_path(&self, path: &str) -> Option<NodeId> {
        let components = path::split_absolute(path).ok()?;
        let mut current = self.root;
        for component in components {
            current = self.child_by_name(current, component)?;
        }
        Some(current)
    }

    /// Resolve `path` against `base`: absolute paths start at the root,
    /// relative ones at `base`. Missing nodes are created.
    pub fn retrieve_relative(&mut self, base: NodeId, path: &str) -> Result<NodeId, PathError> {
        if path::is_path_absolute(path) {
            return self.get_node_by_path(path);
        }
        let components = path::split_relative(path)?;
        let start = if self.contains(base) { base } else { self.root };
        Ok(self.create_path(start, &components))
    }

    /// Absolute path of a node (`"/"` for the root, empty for a stale id)
    pub fn full_path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut current = self.node(id);
        while let Some(node) = current {
            if node.parent.is_none() {
                break;
            }
            names.push(node.name.as_str());
            current = node.parent.and_then(|parent| self.node(parent));
        }
        if names.is_empty() {
            return if self.contains(id) {
                PATH_SEPARATOR_STR.to_string()
            } else {
                String::new()
            };
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push(PATH_SEPARATOR);
            path.push_str(name);
        }
        path
    }

    /// Node ids below `start` (inclusive) in depth-first pre-order
    pub fn traversal_order(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            order.push(id);
            stack.extend(node.children.values().rev().copied());
        }
        order
    }

    /// Visit every node depth-first, parent before children, children in
    /// insertion order.
    pub fn visit_tree<F>(&mut self, mut visitor: F)
    where
        F: FnMut(&mut PathNode),
    {
        for id in self.traversal_order(self.root) {
            if let Some(node) = self.node_mut(id) {
                visitor(node);
            }
        }
    }

    /// Read-only variant of [`visit_tree`](Self::visit_tree)
    pub fn visit_const_tree<F>(&self, mut visitor: F)
    where
        F: FnMut(&PathNode),
    {
        for id in self.traversal_order(self.root) {
            if let Some(node) = self.node(id) {
                visitor(node);
            }
        }
    }

    /// Remove a node and everything below it. The root cannot be removed.
    pub fn remove_subtree(&mut self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        let Some(parent) = node.parent else {
            return false;
        };
        let name = node.name.clone();
        for doomed in self.traversal_order(id) {
            self.release(doomed);
        }
        if let Some(parent) = self.node_mut(parent) {
            parent.children.shift_remove(&name);
        }
        true
    }

    /// Replace the whole tree with a fresh `Null` root. Every previously
    /// issued id becomes stale.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.len = 0;
        self.root = self.alloc(String::new(), None);
    }
}

impl Index<NodeId> for PathTree {
    type Output = PathNode;

    fn index(&self, id: NodeId) -> &PathNode {
        self.node(id)
            .unwrap_or_else(|| panic!("stale node id {:?}", id))
    }
}
