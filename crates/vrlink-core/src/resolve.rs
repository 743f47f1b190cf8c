//! Resolution of a logical path to the device/interface/sensor producing it
//!
//! Resolution follows aliases (collecting any transforms on the way) until
//! it lands on a sensor or interface node, then walks up the tree to find
//! the owning interface and device.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::alias::ParsedAlias;
use crate::element::PathElement;
use crate::path::PathError;
use crate::transform::GeneralizedTransform;
use crate::tree::{NodeId, PathTree};

/// Maximum number of alias hops followed before resolution gives up
pub const MAX_ALIAS_DEPTH: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invalid path: {0}")]
    Path(#[from] PathError),
    #[error("Sensor has no parent: {0}")]
    SensorMissingParent(String),
    #[error("Sensor has no interface parent: {0}")]
    SensorMissingInterfaceParent(String),
    #[error("Interface has no parent: {0}")]
    InterfaceMissingParent(String),
    #[error("Unexpected {kind} node at {path} while decomposing a source")]
    UnexpectedElement { path: String, kind: &'static str },
    #[error("Alias chain through {path} is deeper than {depth} levels")]
    AliasDepthExceeded { path: String, depth: usize },
}

/// The device, interface and (optionally) sensor a path resolved to, plus
/// the transforms picked up along the alias chain.
///
/// Node ids refer to the tree the source was resolved against; the names
/// are copied so they stay readable after the tree changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginalSource {
    device: Option<NodeId>,
    interface: Option<NodeId>,
    sensor: Option<NodeId>,
    transform: GeneralizedTransform,
    device_name: String,
    server: String,
    device_path: String,
    interface_name: String,
    sensor_name: Option<String>,
    leaf_path: String,
}

impl OriginalSource {
    pub fn is_resolved(&self) -> bool {
        self.device.is_some() && self.interface.is_some()
    }

    pub fn device(&self) -> Option<NodeId> {
        self.device
    }

    pub fn interface(&self) -> Option<NodeId> {
        self.interface
    }

    pub fn sensor(&self) -> Option<NodeId> {
        self.sensor
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Server (host) exporting the device
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Sensor index, if the resolved sensor node has a numeric name
    pub fn sensor_number(&self) -> Option<i32> {
        self.sensor_name.as_deref()?.parse().ok()
    }

    /// Full path of the innermost resolved node (sensor, else interface,
    /// else device)
    pub fn path(&self) -> &str {
        &self.leaf_path
    }

    pub fn has_transform(&self) -> bool {
        !self.transform.is_empty()
    }

    pub fn transform(&self) -> &GeneralizedTransform {
        &self.transform
    }

    /// Accumulated transform with the resolved path as its innermost child
    pub fn transform_json(&self) -> Value {
        self.transform.get(&self.leaf_path)
    }

    pub fn nest_transform(&mut self, transform: &Value) {
        self.transform.nest(transform);
    }

    /// Record `id` and walk up from it. Sensors need an interface above
    /// them, interfaces need a parent below the root.
    fn decompose(&mut self, tree: &PathTree, id: NodeId) -> Result<(), ResolveError> {
        let Some(node) = tree.node(id) else {
            return Ok(());
        };
        let path = tree.full_path(id);
        match node.value() {
            PathElement::Sensor if self.sensor.is_none() => {
                self.sensor = Some(id);
                self.sensor_name = Some(node.name().to_string());
                self.set_leaf_path(path.clone());
                let parent = non_root_parent(tree, id)
                    .ok_or_else(|| ResolveError::SensorMissingParent(path.clone()))?;
                self.decompose(tree, parent)?;
                if self.interface.is_none() {
                    return Err(ResolveError::SensorMissingInterfaceParent(path));
                }
                Ok(())
            }
            PathElement::Interface if self.interface.is_none() => {
                self.interface = Some(id);
                self.interface_name = node.name().to_string();
                self.set_leaf_path(path.clone());
                let parent = non_root_parent(tree, id)
                    .ok_or(ResolveError::InterfaceMissingParent(path))?;
                self.decompose(tree, parent)
            }
            PathElement::Device {
                device_name,
                server,
                ..
            } => {
                self.device = Some(id);
                self.device_name = device_name.clone();
                self.server = server.clone();
                self.device_path = path.clone();
                self.set_leaf_path(path);
                Ok(())
            }
            // Device not registered yet: unresolved, retried on a later tree
            PathElement::Null | PathElement::String { .. } => {
                debug!(path = %path, "No device above interface yet");
                Ok(())
            }
            other => Err(ResolveError::UnexpectedElement {
                path,
                kind: other.type_name(),
            }),
        }
    }

    fn set_leaf_path(&mut self, path: String) {
        if self.leaf_path.is_empty() {
            self.leaf_path = path;
        }
    }
}

fn non_root_parent(tree: &PathTree, id: NodeId) -> Option<NodeId> {
    tree.parent(id).filter(|parent| *parent != tree.root())
}

/// A `Null` node directly below an interface is a sensor
fn infer_sensor_from_parent(tree: &mut PathTree, id: NodeId) {
    let is_null = tree.value(id).is_some_and(PathElement::is_null);
    let parent_is_interface = tree
        .parent(id)
        .and_then(|parent| tree.value(parent))
        .is_some_and(PathElement::is_interface);
    if is_null && parent_is_interface {
        tree.set_value(id, PathElement::Sensor);
    }
}

/// Resolve `path` to its original source.
///
/// Missing nodes along the way are created as `Null`, and a `Null` node
/// under an interface is marked as a sensor. Returns `Ok(None)` when the
/// path does not lead to an interface of a device; structural problems in
/// the tree are errors.
pub fn resolve_tree_node(
    tree: &mut PathTree,
    path: &str,
) -> Result<Option<OriginalSource>, ResolveError> {
    let mut source = OriginalSource::default();
    resolve_into(tree, path, &mut source, 0)?;
    if source.is_resolved() {
        Ok(Some(source))
    } else {
        debug!(path = %path, "Path did not resolve to a source");
        Ok(None)
    }
}

fn resolve_into(
    tree: &mut PathTree,
    path: &str,
    source: &mut OriginalSource,
    depth: usize,
) -> Result<(), ResolveError> {
    let id = tree.get_node_by_path(path)?;
    infer_sensor_from_parent(tree, id);

    let value = tree.value(id).cloned().unwrap_or_default();
    match value {
        PathElement::Alias {
            source: alias_source,
            ..
        } => {
            if depth >= MAX_ALIAS_DEPTH {
                return Err(ResolveError::AliasDepthExceeded {
                    path: path.to_string(),
                    depth: MAX_ALIAS_DEPTH,
                });
            }
            let parsed = ParsedAlias::parse(&alias_source);
            let Some(leaf) = parsed.leaf().map(str::to_owned) else {
                debug!(path = %path, source = %alias_source, "Could not parse alias");
                return Ok(());
            };
            if !parsed.is_simple() {
                source.nest_transform(parsed.alias_value());
            }
            resolve_into(tree, &leaf, source, depth + 1)
        }
        PathElement::Sensor | PathElement::Interface | PathElement::Device { .. } => {
            source.decompose(tree, id)
        }
        other => {
            debug!(path = %path, kind = other.type_name(), "Node is not a source");
            Ok(())
        }
    }
}
