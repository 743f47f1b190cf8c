//! Accumulated transform levels collected while following aliases

use serde_json::{Map, Value};

/// Key linking a transform level to the next (inner) one
pub const CHILD_KEY: &str = "child";

/// An ordered stack of transform levels, outermost first.
///
/// Each level is a JSON object with its `child` link removed; the chain is
/// rebuilt by [`get`](Self::get) around a new leaf.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneralizedTransform {
    levels: Vec<Map<String, Value>>,
}

impl GeneralizedTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a nested transform object
    pub fn from_json(transform: &Value) -> Self {
        let mut result = Self::new();
        result.nest(transform);
        result
    }

    /// Append the levels of `transform` as innermost levels. Every object
    /// along the `child` chain that links to a further child becomes one
    /// level; non-objects are ignored.
    pub fn nest(&mut self, transform: &Value) {
        let mut current = transform;
        while let Value::Object(object) = current {
            let Some(child) = object.get(CHILD_KEY) else {
                break;
            };
            let mut level = object.clone();
            level.remove(CHILD_KEY);
            self.levels.push(level);
            current = child;
        }
    }

    /// Insert `transform` as a single outermost level
    pub fn wrap(&mut self, transform: &Value) {
        if let Value::Object(object) = transform {
            let mut level = object.clone();
            level.remove(CHILD_KEY);
            self.levels.insert(0, level);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn levels(&self) -> &[Map<String, Value>] {
        &self.levels
    }

    /// Recompose the nested transform around `leaf`. With no levels, the
    /// leaf itself is returned; an empty leaf leaves the innermost level
    /// without a `child`.
    pub fn get(&self, leaf: &str) -> Value {
        let mut current = if leaf.is_empty() {
            Value::Null
        } else {
            Value::String(leaf.to_string())
        };
        for level in self.levels.iter().rev() {
            let mut object = level.clone();
            if !current.is_null() {
                object.insert(CHILD_KEY.to_string(), current);
            }
            current = Value::Object(object);
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nest_strips_child_links() {
        let transform = GeneralizedTransform::from_json(&json!({
            "rotate": {"axis": "y", "degrees": 90},
            "child": {
                "translate": [0.0, 0.1, 0.0],
                "child": "/dev/tracker/0"
            }
        }));
        assert_eq!(transform.levels().len(), 2);
        assert!(transform.levels()[0].contains_key("rotate"));
        assert!(!transform.levels()[0].contains_key("child"));
        assert!(transform.levels()[1].contains_key("translate"));
    }

    #[test]
    fn test_recompose_with_new_leaf() {
        let original = json!({
            "rotate": {"axis": "y", "degrees": 90},
            "child": {"translate": [0.0, 0.1, 0.0], "child": "/old"}
        });
        let transform = GeneralizedTransform::from_json(&original);
        let rebuilt = transform.get("/new");
        assert_eq!(rebuilt["child"]["child"], "/new");
        assert_eq!(rebuilt["rotate"], original["rotate"]);
    }

    #[test]
    fn test_nest_then_wrap_order() {
        let mut transform = GeneralizedTransform::new();
        transform.nest(&json!({"a": 1, "child": "/x"}));
        transform.nest(&json!({"b": 2, "child": "/y"}));
        transform.nest(&json!({"ignored": true}));
        transform.wrap(&json!({"outer": true}));
        let keys: Vec<&str> = transform
            .levels()
            .iter()
            .map(|l| l.keys().next().unwrap().as_str())
            .collect();
        assert_eq!(keys, vec!["outer", "a", "b"]);
    }

    #[test]
    fn test_empty_transform_returns_leaf() {
        let transform = GeneralizedTransform::new();
        assert!(transform.is_empty());
        assert_eq!(transform.get("/leaf"), json!("/leaf"));
    }
}
