//! Path tree to/from JSON
//!
//! A tree is dumped as an array of node records in traversal order:
//! `[{"path": "/", "type": "null"}, {"path": "/dev", "type": "device", ...}]`.
//! Applying such an array to an empty tree rebuilds an identical tree, since
//! parents always precede their children.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::element::PathElement;
use crate::path::PathError;
use crate::tree::PathTree;

#[derive(Error, Debug)]
pub enum TreeJsonError {
    #[error("Tree JSON must be an array of node records")]
    NotAnArray,
    #[error("Invalid node record: {0}")]
    InvalidRecord(#[from] serde_json::Error),
    #[error("Invalid node path: {0}")]
    Path(#[from] PathError),
}

/// One serialized node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub path: String,
    #[serde(flatten)]
    pub element: PathElement,
}

/// Dump the tree. `Null` nodes are only emitted when `keep_nulls` is set.
pub fn path_tree_to_json(tree: &PathTree, keep_nulls: bool) -> Value {
    let mut records = Vec::new();
    tree.visit_const_tree(|node| {
        if !keep_nulls && node.value().is_null() {
            return;
        }
        let record = NodeRecord {
            path: tree.full_path(node.id()),
            element: node.value().clone(),
        };
        // A PathElement always serializes to an object
        if let Ok(value) = serde_json::to_value(&record) {
            records.push(value);
        }
    });
    Value::Array(records)
}

/// Apply node records to a tree, creating nodes as needed
pub fn json_to_path_tree(tree: &mut PathTree, json: &Value) -> Result<(), TreeJsonError> {
    let records = json.as_array().ok_or(TreeJsonError::NotAnArray)?;
    let records = records
        .iter()
        .map(|record| NodeRecord::deserialize(record).map_err(TreeJsonError::from))
        .collect::<Result<Vec<_>, _>>()?;
    for record in records {
        let id = tree.get_node_by_path(&record.path)?;
        tree.set_value(id, record.element);
    }
    debug!(nodes = tree.len(), "Applied path tree JSON");
    Ok(())
}

/// Parse a JSON string and apply it with [`json_to_path_tree`]
pub fn json_str_to_path_tree(tree: &mut PathTree, json: &str) -> Result<(), TreeJsonError> {
    let value: Value = serde_json::from_str(json)?;
    json_to_path_tree(tree, &value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::AliasPriority;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_tree() -> PathTree {
        let mut tree = PathTree::new();
        let dev = tree.get_node_by_path("/org_vrlink_Sim/Tracker0").unwrap();
        tree.set_value(
            dev,
            PathElement::Device {
                device_name: "Tracker0".to_string(),
                server: "localhost:3883".to_string(),
                descriptor: json!({"interfaces": {"tracker": {"count": 2}}}),
            },
        );
        let iface = tree.get_node_by_path("/org_vrlink_Sim/Tracker0/tracker").unwrap();
        tree.set_value(iface, PathElement::Interface);
        let sensor = tree.get_node_by_path("/org_vrlink_Sim/Tracker0/tracker/0").unwrap();
        tree.set_value(sensor, PathElement::Sensor);
        let head = tree.get_node_by_path("/me/head").unwrap();
        tree.set_value(
            head,
            PathElement::alias("/org_vrlink_Sim/Tracker0/tracker/0", AliasPriority::Manual),
        );
        let note = tree.get_node_by_path("/display").unwrap();
        tree.set_value(
            note,
            PathElement::String {
                value: "{\"hmd\": true}".to_string(),
            },
        );
        tree
    }

    #[test]
    fn test_dump_skips_nulls() {
        let tree = sample_tree();
        let dump = path_tree_to_json(&tree, false);
        let paths: Vec<&str> = dump
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["path"].as_str().unwrap())
            .collect();
        assert_eq!(
            paths,
            vec![
                "/org_vrlink_Sim/Tracker0",
                "/org_vrlink_Sim/Tracker0/tracker",
                "/org_vrlink_Sim/Tracker0/tracker/0",
                "/me/head",
                "/display"
            ]
        );
        assert_eq!(dump[0]["type"], "device");
        assert_eq!(dump[0]["server"], "localhost:3883");
        assert_eq!(dump[3]["priority"], 255);
    }

    #[test]
    fn test_round_trip_with_nulls() {
        let tree = sample_tree();
        let dump = path_tree_to_json(&tree, true);
        let mut rebuilt = PathTree::new();
        json_to_path_tree(&mut rebuilt, &dump).unwrap();
        assert_eq!(path_tree_to_json(&rebuilt, true), dump);
        assert_eq!(rebuilt.len(), tree.len());
    }

    #[test]
    fn test_round_trip_without_nulls_is_idempotent() {
        let tree = sample_tree();
        let dump = path_tree_to_json(&tree, false);
        let mut rebuilt = PathTree::new();
        json_to_path_tree(&mut rebuilt, &dump).unwrap();
        assert_eq!(path_tree_to_json(&rebuilt, false), dump);
    }

    #[test]
    fn test_invalid_input() {
        let mut tree = PathTree::new();
        assert!(matches!(
            json_to_path_tree(&mut tree, &json!({"path": "/"})),
            Err(TreeJsonError::NotAnArray)
        ));
        assert!(matches!(
            json_to_path_tree(&mut tree, &json!([{"path": "/a", "type": "bogus"}])),
            Err(TreeJsonError::InvalidRecord(_))
        ));
        assert!(matches!(
            json_to_path_tree(&mut tree, &json!([{"path": "a", "type": "null"}])),
            Err(TreeJsonError::Path(_))
        ));
        assert_eq!(tree.len(), 1);
    }

    fn element_strategy() -> impl Strategy<Value = PathElement> {
        prop_oneof![
            Just(PathElement::Null),
            Just(PathElement::Interface),
            Just(PathElement::Sensor),
            Just(PathElement::Plugin),
            "[a-z]{1,8}".prop_map(|name| PathElement::device(name, "localhost")),
            ("/[a-z]{1,6}/[0-9]", any::<bool>()).prop_map(|(source, manual)| {
                let priority = if manual {
                    AliasPriority::Manual
                } else {
                    AliasPriority::Automatic
                };
                PathElement::alias(source, priority)
            }),
            "[ -~]{0,12}".prop_map(|value| PathElement::String { value }),
        ]
    }

    proptest! {
        #[test]
        fn test_round_trip_property(
            nodes in prop::collection::vec(
                (prop::collection::vec("[a-d]", 1..4), element_strategy()),
                0..24,
            ),
            keep_nulls in any::<bool>(),
        ) {
            let mut tree = PathTree::new();
            for (components, element) in nodes {
                let path = format!("/{}", components.join("/"));
                let id = tree.get_node_by_path(&path).unwrap();
                tree.set_value(id, element);
            }
            let dump = path_tree_to_json(&tree, keep_nulls);
            let mut rebuilt = PathTree::new();
            json_to_path_tree(&mut rebuilt, &dump).unwrap();
            prop_assert_eq!(path_tree_to_json(&rebuilt, keep_nulls), dump);
        }
    }
}
