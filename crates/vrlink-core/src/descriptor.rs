//! Device descriptors: populating the tree from a device's JSON description
//!
//! A descriptor announces the interfaces a device exposes and may carry
//! `semantic` names (`"semantic": {"left": "tracker/0"}`) and
//! `automaticAliases` that are installed as automatic-priority aliases.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::alias::{add_alias_from_source_and_relative_dest, AliasError, AliasProcessor};
use crate::element::{AliasPriority, PathElement};
use crate::path::{self, PathError, PATH_SEPARATOR};
use crate::tree::{NodeId, PathTree};

const INTERFACES_KEY: &str = "interfaces";
const SEMANTIC_KEY: &str = "semantic";
const AUTOMATIC_ALIASES_KEY: &str = "automaticAliases";
const TARGET_KEY: &str = "$target";
const DEFAULT_HOST: &str = "localhost";

const EYETRACKER_KEY: &str = "eyetracker";
const LOCATION2D_KEY: &str = "location2D";
const DIRECTION_KEY: &str = "direction";
const TRACKER_KEY: &str = "tracker";
const BUTTON_KEY: &str = "button";
const COUNT_KEY: &str = "count";

/// Split `name@host` into its parts, defaulting the host
fn split_device_name(device_name: &str) -> (&str, &str) {
    let name = device_name
        .strip_prefix(PATH_SEPARATOR)
        .unwrap_or(device_name);
    match name.split_once('@') {
        Some((name, host)) if !host.is_empty() => (name, host),
        Some((name, _)) => (name, DEFAULT_HOST),
        None => (name, DEFAULT_HOST),
    }
}

/// Register a device and its descriptor in the tree.
///
/// Creates the device node at `/<name>` (the `@host` suffix, if any, names
/// the server), an interface node for each key of `interfaces`, and the
/// semantic and automatic aliases. An unparseable descriptor still creates
/// the device node. Returns whether the tree changed.
pub fn process_device_descriptor_for_path_tree(
    tree: &mut PathTree,
    device_name: &str,
    json_descriptor: &str,
) -> Result<bool, PathError> {
    let (name, host) = split_device_name(device_name);
    if name.is_empty() {
        return Err(PathError::InvalidDeviceName(device_name.to_string()));
    }
    let device_path = format!("{}{}", PATH_SEPARATOR, name);
    let device_node = tree
        .get_node_by_path(&device_path)
        .map_err(|_| PathError::InvalidDeviceName(device_name.to_string()))?;

    let descriptor: Option<Value> = match serde_json::from_str(json_descriptor) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(device = %name, error = %e, "Could not parse device descriptor");
            None
        }
    };

    let mut changed = false;
    match tree.value(device_node) {
        Some(PathElement::Null) => {
            tree.set_value(
                device_node,
                PathElement::Device {
                    device_name: name.to_string(),
                    server: host.to_string(),
                    descriptor: descriptor.clone().unwrap_or_default(),
                },
            );
            info!(device = %name, server = %host, "Registered device");
            changed = true;
        }
        Some(PathElement::Device { descriptor: existing, .. }) => {
            if let Some(descriptor) = &descriptor {
                if existing != descriptor {
                    let updated = descriptor.clone();
                    if let Some(PathElement::Device { descriptor, .. }) =
                        tree.node_mut(device_node).map(|node| node.value_mut())
                    {
                        *descriptor = updated;
                    }
                    debug!(device = %name, "Updated device descriptor");
                    changed = true;
                }
            }
        }
        Some(other) => {
            warn!(
                path = %device_path,
                kind = other.type_name(),
                "Device path already holds another node type"
            );
        }
        None => {}
    }

    let Some(descriptor) = descriptor else {
        return Ok(changed);
    };
    changed |= process_interfaces(tree, device_node, &descriptor)?;
    changed |= process_semantic(tree, device_node, &descriptor)?;
    changed |= process_automatic_aliases(tree, device_node, &descriptor)?;
    Ok(changed)
}

fn process_interfaces(
    tree: &mut PathTree,
    device_node: NodeId,
    descriptor: &Value,
) -> Result<bool, PathError> {
    let Some(Value::Object(interfaces)) = descriptor.get(INTERFACES_KEY) else {
        return Ok(false);
    };
    let mut changed = false;
    for iface in interfaces.keys() {
        let node = tree.retrieve_relative(device_node, iface)?;
        if tree.value(node).is_some_and(PathElement::is_null) {
            tree.set_value(node, PathElement::Interface);
            changed = true;
        }
    }
    Ok(changed)
}

fn process_semantic(
    tree: &mut PathTree,
    device_node: NodeId,
    descriptor: &Value,
) -> Result<bool, PathError> {
    let Some(semantic @ Value::Object(_)) = descriptor.get(SEMANTIC_KEY) else {
        return Ok(false);
    };
    semantic_recurse(tree, device_node, semantic, SEMANTIC_KEY)
}

/// Strings are alias sources; objects nest further names, with `$target`
/// naming the source for the object's own path.
fn semantic_recurse(
    tree: &mut PathTree,
    device_node: NodeId,
    level: &Value,
    relative_path: &str,
) -> Result<bool, PathError> {
    match level {
        Value::String(_) => add_semantic_alias(tree, device_node, level, relative_path),
        Value::Object(members) => {
            let mut changed = false;
            if let Some(target) = members.get(TARGET_KEY) {
                changed |= add_semantic_alias(tree, device_node, target, relative_path)?;
            }
            for (name, member) in members {
                if name == TARGET_KEY {
                    continue;
                }
                let child_path = format!("{}{}{}", relative_path, PATH_SEPARATOR, name);
                changed |= semantic_recurse(tree, device_node, member, &child_path)?;
            }
            Ok(changed)
        }
        _ => Ok(false),
    }
}

fn add_semantic_alias(
    tree: &mut PathTree,
    device_node: NodeId,
    source: &Value,
    relative_path: &str,
) -> Result<bool, PathError> {
    debug!(path = %relative_path, "Adding semantic alias");
    add_alias_from_source_and_relative_dest(
        tree,
        device_node,
        &source.to_string(),
        relative_path,
        AliasPriority::Automatic,
    )
}

fn process_automatic_aliases(
    tree: &mut PathTree,
    device_node: NodeId,
    descriptor: &Value,
) -> Result<bool, PathError> {
    let Some(aliases) = descriptor.get(AUTOMATIC_ALIASES_KEY) else {
        return Ok(false);
    };
    let result = AliasProcessor::new()
        .enable_relative_path()
        .enable_relative_source()
        .enable_wildcard()
        .set_default_priority(AliasPriority::Automatic)
        .process(tree, device_node, aliases);
    match result {
        Ok(changed) => Ok(changed),
        Err(AliasError::Path(e)) => Err(e),
        Err(e) => {
            warn!(error = %e, "Could not apply automatic aliases");
            Ok(false)
        }
    }
}

/// Expand composite interfaces into the primitive ones they imply.
///
/// An `eyetracker` interface with a non-zero `count` adds `location2D`,
/// `direction`, `tracker` and `button` interfaces for each of its enabled
/// sub-interfaces. Interfaces already present are kept. Descriptors that do
/// not parse, or have no `interfaces` object, are returned unchanged.
pub fn normalize_device_descriptor(json_descriptor: &str) -> String {
    let Ok(mut descriptor) = serde_json::from_str::<Value>(json_descriptor) else {
        return json_descriptor.to_string();
    };
    let iface_names: Vec<String> = match descriptor.get(INTERFACES_KEY) {
        Some(Value::Object(interfaces)) => interfaces.keys().cloned().collect(),
        _ => return json_descriptor.to_string(),
    };
    for iface_name in iface_names {
        if iface_name.eq_ignore_ascii_case(EYETRACKER_KEY) {
            normalize_eyetracker(&mut descriptor, &iface_name);
        }
    }
    serde_json::to_string_pretty(&descriptor).unwrap_or_else(|_| json_descriptor.to_string())
}

fn count_object(count: i64) -> Value {
    let mut object = Map::new();
    object.insert(COUNT_KEY.to_string(), Value::from(count));
    Value::Object(object)
}

fn normalize_eyetracker(descriptor: &mut Value, iface_name: &str) {
    let Some(Value::Object(interfaces)) = descriptor.get_mut(INTERFACES_KEY) else {
        return;
    };
    let Some(Value::Object(eyetracker)) = interfaces.get(iface_name) else {
        return;
    };
    let count = eyetracker.get(COUNT_KEY).and_then(Value::as_i64).unwrap_or(0);
    if count == 0 {
        return;
    }

    let mut augmented = Map::new();
    for (sub_iface, enabled) in eyetracker {
        if !enabled.as_bool().unwrap_or(false) {
            continue;
        }
        if sub_iface.eq_ignore_ascii_case(LOCATION2D_KEY) {
            augmented.insert(LOCATION2D_KEY.to_string(), count_object(count));
        } else if sub_iface.eq_ignore_ascii_case(DIRECTION_KEY) {
            augmented.insert(DIRECTION_KEY.to_string(), count_object(count));
        } else if sub_iface.eq_ignore_ascii_case(TRACKER_KEY) {
            augmented.insert(
                TRACKER_KEY.to_string(),
                serde_json::json!({
                    "position": true,
                    "orientation": false,
                    "bounded": true,
                    "count": count
                }),
            );
        } else if sub_iface.eq_ignore_ascii_case(BUTTON_KEY) {
            augmented.insert(BUTTON_KEY.to_string(), count_object(count));
        }
    }
    if augmented.is_empty() {
        return;
    }

    // TODO: merge a generated interface with an existing one of the same
    // name instead of keeping the generated one
    for (name, current) in interfaces.iter() {
        if !augmented.get(name).is_some_and(Value::is_object) {
            augmented.insert(name.clone(), current.clone());
        }
    }
    *interfaces = augmented;
}

/// True if `name` can be used as a device name
pub fn is_valid_device_name(name: &str) -> bool {
    let (name, _) = split_device_name(name);
    !name.is_empty() && path::split_relative(name).is_ok()
}
