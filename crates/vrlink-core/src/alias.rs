//! Alias parsing and installation
//!
//! An alias source is either a plain path or a transform object whose
//! innermost `child` is the path. Aliases are installed into the tree with a
//! priority: a source never displaces one of higher priority, and equal
//! priorities are last-writer-wins.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::element::{AliasPriority, PathElement};
use crate::path::{self, PathError, PATH_SEPARATOR};
use crate::transform::CHILD_KEY;
use crate::tree::{NodeId, PathTree};

/// Key overriding the priority of every alias in the same object
pub const PRIORITY_KEY: &str = "$priority";
/// Key of a route's source, also stripped from the top of an alias source
pub const SOURCE_KEY: &str = "source";
/// Key of a route's destination path
pub const DESTINATION_KEY: &str = "destination";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AliasError {
    #[error("Invalid alias path: {0}")]
    Path(#[from] PathError),
    #[error("Relative alias path not permitted: {0}")]
    RelativePathNotPermitted(String),
}

/// An alias source after parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAlias {
    value: Value,
    simple: bool,
}

impl ParsedAlias {
    /// Parse a source string. Strings that are not JSON are taken as a
    /// literal path.
    pub fn parse(source: &str) -> Self {
        match serde_json::from_str::<Value>(source) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Self {
                value: Value::String(source.to_string()),
                simple: true,
            },
        }
    }

    /// Parse an already-decoded JSON source
    pub fn from_value(source: &Value) -> Self {
        match source {
            Value::String(_) => Self {
                value: source.clone(),
                simple: true,
            },
            Value::Object(object) => {
                if let Some(inner) = object.get(SOURCE_KEY) {
                    return Self::from_value(inner);
                }
                let mut value = source.clone();
                let leaf = leaf_mut(&mut value);
                if !leaf.is_string() {
                    match path_from_old_route_source(leaf) {
                        Some(path) => *leaf = Value::String(path),
                        None => {
                            debug!(leaf = %leaf, "Unhandled transform leaf");
                            return Self::invalid();
                        }
                    }
                }
                Self {
                    value,
                    simple: false,
                }
            }
            _ => Self::invalid(),
        }
    }

    fn invalid() -> Self {
        Self {
            value: Value::Null,
            simple: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.value.is_null()
    }

    /// True if the source is a bare path with no transform
    pub fn is_simple(&self) -> bool {
        self.simple
    }

    /// The path at the innermost level
    pub fn leaf(&self) -> Option<&str> {
        let mut current = &self.value;
        while let Some(child) = current.get(CHILD_KEY) {
            current = child;
        }
        current.as_str()
    }

    /// Replace the innermost path, keeping any transform levels
    pub fn set_leaf(&mut self, leaf: &str) {
        if self.is_valid() {
            *leaf_mut(&mut self.value) = Value::String(leaf.to_string());
        }
    }

    /// Source as stored in an alias element: the bare path, or compact JSON
    pub fn alias(&self) -> String {
        match &self.value {
            Value::String(path) => path.clone(),
            other => other.to_string(),
        }
    }

    pub fn alias_value(&self) -> &Value {
        &self.value
    }
}

fn leaf_mut(value: &mut Value) -> &mut Value {
    if value.get(CHILD_KEY).is_some() {
        return leaf_mut(&mut value[CHILD_KEY]);
    }
    value
}

/// Legacy `{"tracker": "/dev", "sensor": 0}` leaf to `/dev/tracker/0`
fn path_from_old_route_source(leaf: &Value) -> Option<String> {
    let tracker = leaf.get("tracker")?.as_str()?;
    let mut path = String::new();
    if !path::is_path_absolute(tracker) {
        path.push(PATH_SEPARATOR);
    }
    path.push_str(tracker);
    path.push_str("/tracker");
    if let Some(sensor) = leaf.get("sensor").and_then(Value::as_i64) {
        path.push(PATH_SEPARATOR);
        path.push_str(&sensor.to_string());
    }
    Some(path)
}

/// `{path: source}`, or `Null` if the path is empty or the source is null
pub fn create_json_alias(path: &str, source: &Value) -> Value {
    if path.is_empty() || source.is_null() {
        return Value::Null;
    }
    let mut object = Map::new();
    object.insert(path.to_string(), source.clone());
    Value::Object(object)
}

/// Turn a legacy `{"destination", "source"}` route into an alias object.
/// Anything else is returned unchanged.
pub fn convert_route_to_alias(value: &Value) -> Value {
    match (value.get(DESTINATION_KEY), value.get(SOURCE_KEY)) {
        (Some(destination), Some(source)) if value.is_object() => {
            create_json_alias(destination.as_str().unwrap_or_default(), source)
        }
        _ => value.clone(),
    }
}

/// Set `$priority` on an alias object. Non-objects are returned unchanged.
pub fn apply_priority_to_alias(alias: &Value, priority: AliasPriority) -> Value {
    let mut result = alias.clone();
    if let Value::Object(object) = &mut result {
        object.insert(PRIORITY_KEY.to_string(), Value::from(priority.value()));
    }
    result
}

/// Install an alias at `dest` (relative to `base` unless absolute).
///
/// A relative source leaf is made absolute against `base`. Returns whether
/// the tree changed. Device, plugin, interface, sensor and string nodes are
/// never replaced by an alias.
pub fn add_alias_from_source_and_relative_dest(
    tree: &mut PathTree,
    base: NodeId,
    source: &str,
    dest: &str,
    priority: AliasPriority,
) -> Result<bool, PathError> {
    let mut parsed = ParsedAlias::parse(source);
    let Some(leaf) = parsed.leaf().map(str::to_owned) else {
        debug!(dest = %dest, source = %source, "Ignoring alias with an invalid source");
        return Ok(false);
    };
    if !path::is_path_absolute(&leaf) {
        let absolute = path::join_path(&tree.full_path(base), &leaf);
        parsed.set_leaf(&absolute);
    }
    let normalized = parsed.alias();

    let node = tree.retrieve_relative(base, dest)?;
    let install = match tree.value(node) {
        Some(PathElement::Null) => true,
        Some(PathElement::Alias {
            source: existing_source,
            priority: existing_priority,
        }) => {
            if priority < *existing_priority {
                debug!(
                    path = %tree.full_path(node),
                    existing = ?existing_priority,
                    requested = ?priority,
                    "Keeping higher-priority alias"
                );
                false
            } else {
                *existing_source != normalized || *existing_priority != priority
            }
        }
        Some(other) => {
            warn!(
                path = %tree.full_path(node),
                kind = other.type_name(),
                "Refusing to replace node with an alias"
            );
            false
        }
        None => false,
    };
    if install {
        debug!(path = %tree.full_path(node), source = %normalized, "Installed alias");
        tree.set_value(node, PathElement::alias(normalized, priority));
    }
    Ok(install)
}

/// Switches controlling what [`AliasProcessor`] accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AliasProcessorOptions {
    pub permit_relative_path: bool,
    pub permit_relative_source: bool,
    pub permit_wildcard: bool,
    pub default_priority: AliasPriority,
}

/// Applies alias description objects to a tree.
///
/// ```ignore
/// let changed = AliasProcessor::new()
///     .enable_relative_path()
///     .enable_wildcard()
///     .process(&mut tree, device_node, &aliases)?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AliasProcessor {
    options: AliasProcessorOptions,
}

impl AliasProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_relative_path(mut self) -> Self {
        self.options.permit_relative_path = true;
        self
    }

    pub fn enable_relative_source(mut self) -> Self {
        self.options.permit_relative_source = true;
        self
    }

    pub fn enable_wildcard(mut self) -> Self {
        self.options.permit_wildcard = true;
        self
    }

    pub fn set_default_priority(mut self, priority: AliasPriority) -> Self {
        self.options.default_priority = priority;
        self
    }

    pub fn options(&self) -> AliasProcessorOptions {
        self.options
    }

    /// Process an alias object or an array of them, relative to `base`.
    ///
    /// Destination paths are checked before anything is installed: a
    /// forbidden relative destination fails the whole call with the tree
    /// untouched. Returns whether the tree changed.
    pub fn process(
        &self,
        tree: &mut PathTree,
        base: NodeId,
        value: &Value,
    ) -> Result<bool, AliasError> {
        let objects: Vec<Value> = match value {
            Value::Array(items) => items
                .iter()
                .filter(|item| item.is_object())
                .map(convert_route_to_alias)
                .collect(),
            Value::Object(_) => vec![convert_route_to_alias(value)],
            _ => Vec::new(),
        };

        let mut entries = Vec::new();
        for object in &objects {
            let Value::Object(map) = object else {
                continue;
            };
            let priority = map
                .get(PRIORITY_KEY)
                .and_then(Value::as_u64)
                .map(|p| AliasPriority::from(p.min(u8::MAX as u64) as u8))
                .unwrap_or(self.options.default_priority);
            for (dest, source) in map {
                if dest == PRIORITY_KEY {
                    continue;
                }
                if !self.options.permit_relative_path && !path::is_path_absolute(dest) {
                    return Err(AliasError::RelativePathNotPermitted(dest.clone()));
                }
                path::split_relative(dest)?;
                entries.push((dest.as_str(), source, priority));
            }
        }

        let mut changed = false;
        for (dest, source, priority) in entries {
            changed |= self.process_entry(tree, base, dest, source, priority)?;
        }
        Ok(changed)
    }

    fn process_entry(
        &self,
        tree: &mut PathTree,
        base: NodeId,
        dest: &str,
        source: &Value,
        priority: AliasPriority,
    ) -> Result<bool, AliasError> {
        let mut parsed = ParsedAlias::from_value(source);
        let Some(leaf) = parsed.leaf().map(str::to_owned) else {
            debug!(dest = %dest, "Skipping alias with an unusable source");
            return Ok(false);
        };
        if !self.options.permit_relative_source && !path::is_path_absolute(&leaf) {
            debug!(dest = %dest, leaf = %leaf, "Skipping non-permitted relative source");
            return Ok(false);
        }

        let Some(stem) = path::strip_wildcard(&leaf) else {
            return Ok(add_alias_from_source_and_relative_dest(
                tree,
                base,
                &parsed.alias(),
                dest,
                priority,
            )?);
        };
        if !self.options.permit_wildcard {
            debug!(dest = %dest, leaf = %leaf, "Skipping non-permitted wildcard source");
            return Ok(false);
        }

        // "/*" mirrors the whole tree
        let stem = if stem.is_empty() {
            path::PATH_SEPARATOR_STR
        } else {
            stem
        };
        let start = tree.retrieve_relative(base, stem)?;
        let start_path = tree.full_path(start);
        let targets: Vec<(String, String)> = tree
            .traversal_order(start)
            .into_iter()
            .filter(|id| tree.value(*id).is_some_and(|v| !v.is_null()))
            .map(|id| {
                let full = tree.full_path(id);
                let relative = full[start_path.len()..]
                    .trim_start_matches(PATH_SEPARATOR)
                    .to_string();
                (relative, full)
            })
            .collect();

        let mut changed = false;
        for (relative, full) in targets {
            let target_dest = if relative.is_empty() {
                dest.to_string()
            } else {
                path::join_path(dest, &relative)
            };
            parsed.set_leaf(&full);
            changed |= add_alias_from_source_and_relative_dest(
                tree,
                base,
                &parsed.alias(),
                &target_dest,
                priority,
            )?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alias_at(tree: &PathTree, path: &str) -> Option<(String, AliasPriority)> {
        let id = tree.find_node_by_path(path)?;
        tree.value(id)?
            .as_alias()
            .map(|(source, priority)| (source.to_string(), priority))
    }

    #[test]
    fn test_parse_simple() {
        let alias = ParsedAlias::parse("/dev/tracker/0");
        assert!(alias.is_valid());
        assert!(alias.is_simple());
        assert_eq!(alias.leaf(), Some("/dev/tracker/0"));
        assert_eq!(alias.alias(), "/dev/tracker/0");

        let quoted = ParsedAlias::parse("\"/dev/tracker/1\"");
        assert!(quoted.is_simple());
        assert_eq!(quoted.leaf(), Some("/dev/tracker/1"));
    }

    #[test]
    fn test_parse_strips_source_level() {
        let alias = ParsedAlias::parse(r#"{"source": "/dev/button/2"}"#);
        assert!(alias.is_simple());
        assert_eq!(alias.leaf(), Some("/dev/button/2"));
    }

    #[test]
    fn test_parse_transform() {
        let mut alias = ParsedAlias::parse(
            r#"{"rotate": {"axis": "x", "degrees": 180}, "child": "/dev/tracker/0"}"#,
        );
        assert!(alias.is_valid());
        assert!(!alias.is_simple());
        assert_eq!(alias.leaf(), Some("/dev/tracker/0"));

        alias.set_leaf("/other/tracker/3");
        assert_eq!(alias.leaf(), Some("/other/tracker/3"));
        assert_eq!(alias.alias_value()["rotate"]["degrees"], 180);
        assert!(alias.alias().starts_with('{'));
    }

    #[test]
    fn test_parse_legacy_tracker_leaf() {
        let alias = ParsedAlias::from_value(&json!({
            "translate": [0, 0, 1],
            "child": {"tracker": "org_vrlink_Sim/Tracker", "sensor": 2}
        }));
        assert!(alias.is_valid());
        assert_eq!(alias.leaf(), Some("/org_vrlink_Sim/Tracker/tracker/2"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(!ParsedAlias::from_value(&json!({"child": {"bogus": 1}})).is_valid());
        assert!(!ParsedAlias::from_value(&json!(42)).is_valid());
        assert_eq!(ParsedAlias::from_value(&json!(42)).leaf(), None);
    }

    #[test]
    fn test_route_helpers() {
        let route = json!({"destination": "/me/head", "source": "/dev/tracker/0"});
        assert_eq!(
            convert_route_to_alias(&route),
            json!({"/me/head": "/dev/tracker/0"})
        );
        let plain = json!({"/me/head": "/dev/tracker/0"});
        assert_eq!(convert_route_to_alias(&plain), plain);
        assert_eq!(create_json_alias("", &json!("/x")), Value::Null);
        assert_eq!(
            apply_priority_to_alias(&plain, AliasPriority::Manual)[PRIORITY_KEY],
            255
        );
        assert_eq!(apply_priority_to_alias(&json!("x"), AliasPriority::Manual), json!("x"));
    }

    #[test]
    fn test_manual_beats_automatic() {
        let mut tree = PathTree::new();
        let root = tree.root();
        assert!(add_alias_from_source_and_relative_dest(
            &mut tree, root, "/a", "/me/head", AliasPriority::Manual
        )
        .unwrap());
        assert!(!add_alias_from_source_and_relative_dest(
            &mut tree, root, "/b", "/me/head", AliasPriority::Automatic
        )
        .unwrap());
        assert_eq!(
            alias_at(&tree, "/me/head"),
            Some(("/a".to_string(), AliasPriority::Manual))
        );
    }

    #[test]
    fn test_manual_overwrites_automatic() {
        let mut tree = PathTree::new();
        let root = tree.root();
        add_alias_from_source_and_relative_dest(
            &mut tree, root, "/a", "/me/head", AliasPriority::Automatic,
        )
        .unwrap();
        assert!(add_alias_from_source_and_relative_dest(
            &mut tree, root, "/b", "/me/head", AliasPriority::Manual
        )
        .unwrap());
        assert_eq!(
            alias_at(&tree, "/me/head"),
            Some(("/b".to_string(), AliasPriority::Manual))
        );
    }

    #[test]
    fn test_equal_priority_last_writer_wins() {
        let mut tree = PathTree::new();
        let root = tree.root();
        add_alias_from_source_and_relative_dest(
            &mut tree, root, "/a", "/x", AliasPriority::Automatic,
        )
        .unwrap();
        assert!(add_alias_from_source_and_relative_dest(
            &mut tree, root, "/b", "/x", AliasPriority::Automatic
        )
        .unwrap());
        // Re-adding the same alias is not a change
        assert!(!add_alias_from_source_and_relative_dest(
            &mut tree, root, "/b", "/x", AliasPriority::Automatic
        )
        .unwrap());
        assert_eq!(alias_at(&tree, "/x").unwrap().0, "/b");
    }

    #[test]
    fn test_relative_source_is_made_absolute() {
        let mut tree = PathTree::new();
        let dev = tree.get_node_by_path("/dev").unwrap();
        add_alias_from_source_and_relative_dest(
            &mut tree, dev, "tracker/0", "semantic/left", AliasPriority::Automatic,
        )
        .unwrap();
        assert_eq!(alias_at(&tree, "/dev/semantic/left").unwrap().0, "/dev/tracker/0");
    }

    #[test]
    fn test_alias_does_not_replace_device() {
        let mut tree = PathTree::new();
        let root = tree.root();
        let dev = tree.get_node_by_path("/dev").unwrap();
        tree.set_value(dev, PathElement::device("dev", "localhost"));
        assert!(!add_alias_from_source_and_relative_dest(
            &mut tree, root, "/x", "/dev", AliasPriority::Manual
        )
        .unwrap());
        assert_eq!(tree[dev].value().type_name(), "device");
    }

    #[test]
    fn test_processor_array_and_priority_key() {
        let mut tree = PathTree::new();
        let root = tree.root();
        let aliases = json!([
            {"/me/head": "/dev/tracker/0"},
            {"$priority": 255, "/me/hands/left": "/dev/tracker/1"},
            {"destination": "/me/hands/right", "source": "/dev/tracker/2"},
            "not an object"
        ]);
        assert!(AliasProcessor::new().process(&mut tree, root, &aliases).unwrap());
        assert_eq!(
            alias_at(&tree, "/me/head"),
            Some(("/dev/tracker/0".to_string(), AliasPriority::Automatic))
        );
        assert_eq!(
            alias_at(&tree, "/me/hands/left"),
            Some(("/dev/tracker/1".to_string(), AliasPriority::Manual))
        );
        assert_eq!(alias_at(&tree, "/me/hands/right").unwrap().0, "/dev/tracker/2");
    }

    #[test]
    fn test_processor_default_priority() {
        let mut tree = PathTree::new();
        let root = tree.root();
        AliasProcessor::new()
            .set_default_priority(AliasPriority::Manual)
            .process(&mut tree, root, &json!({"/a": "/b"}))
            .unwrap();
        assert_eq!(alias_at(&tree, "/a").unwrap().1, AliasPriority::Manual);
    }

    #[test]
    fn test_processor_rejects_relative_path_without_mutation() {
        let mut tree = PathTree::new();
        let root = tree.root();
        let aliases = json!({"/ok": "/dev/tracker/0", "relative": "/dev/tracker/1"});
        let result = AliasProcessor::new().process(&mut tree, root, &aliases);
        assert_eq!(
            result,
            Err(AliasError::RelativePathNotPermitted("relative".to_string()))
        );
        assert_eq!(tree.len(), 1);

        let dev = tree.get_node_by_path("/dev").unwrap();
        assert!(AliasProcessor::new()
            .enable_relative_path()
            .process(&mut tree, dev, &aliases)
            .unwrap());
        assert!(alias_at(&tree, "/dev/relative").is_some());
    }

    #[test]
    fn test_processor_skips_relative_source() {
        let mut tree = PathTree::new();
        let root = tree.root();
        let aliases = json!({"/a": "tracker/0"});
        assert!(!AliasProcessor::new().process(&mut tree, root, &aliases).unwrap());
        assert!(AliasProcessor::new()
            .enable_relative_source()
            .process(&mut tree, root, &aliases)
            .unwrap());
        assert_eq!(alias_at(&tree, "/a").unwrap().0, "/tracker/0");
    }

    #[test]
    fn test_processor_wildcard() {
        let mut tree = PathTree::new();
        let root = tree.root();
        for sensor in ["0", "1"] {
            let id = tree
                .get_node_by_path(&format!("/dev/tracker/{}", sensor))
                .unwrap();
            tree.set_value(id, PathElement::Sensor);
        }
        let iface = tree.find_node_by_path("/dev/tracker").unwrap();
        tree.set_value(iface, PathElement::Interface);

        let aliases = json!({"/mirror": "/dev/tracker/*"});
        assert!(!AliasProcessor::new().process(&mut tree, root, &aliases).unwrap());
        assert!(alias_at(&tree, "/mirror/0").is_none());

        assert!(AliasProcessor::new()
            .enable_wildcard()
            .process(&mut tree, root, &aliases)
            .unwrap());
        assert_eq!(alias_at(&tree, "/mirror").unwrap().0, "/dev/tracker");
        assert_eq!(alias_at(&tree, "/mirror/0").unwrap().0, "/dev/tracker/0");
        assert_eq!(alias_at(&tree, "/mirror/1").unwrap().0, "/dev/tracker/1");
    }

    #[test]
    fn test_processor_root_wildcard() {
        let mut tree = PathTree::new();
        let root = tree.root();
        let iface = tree.get_node_by_path("/dev/tracker").unwrap();
        tree.set_value(iface, PathElement::Interface);

        let aliases = json!([
            {"/first": "/dev/tracker/0"},
            {"/all": "/*"}
        ]);
        assert!(AliasProcessor::new()
            .enable_wildcard()
            .process(&mut tree, root, &aliases)
            .unwrap());
        assert_eq!(alias_at(&tree, "/first").unwrap().0, "/dev/tracker/0");
        assert_eq!(alias_at(&tree, "/all/dev/tracker").unwrap().0, "/dev/tracker");
        assert_eq!(alias_at(&tree, "/all/first").unwrap().0, "/first");
    }

    #[test]
    fn test_processor_wildcard_with_transform() {
        let mut tree = PathTree::new();
        let root = tree.root();
        let id = tree.get_node_by_path("/dev/tracker/0").unwrap();
        tree.set_value(id, PathElement::Sensor);

        let aliases = json!({"/flipped": {"rotate": {"axis": "z", "degrees": 180}, "child": "/dev/tracker/*"}});
        AliasProcessor::new()
            .enable_wildcard()
            .process(&mut tree, root, &aliases)
            .unwrap();
        let (source, _) = alias_at(&tree, "/flipped/0").unwrap();
        let parsed = ParsedAlias::parse(&source);
        assert!(!parsed.is_simple());
        assert_eq!(parsed.leaf(), Some("/dev/tracker/0"));
    }
}
