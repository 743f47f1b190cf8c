//! Typed values stored at each node of the path tree

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority attached to an alias. A higher priority wins when two sources
/// compete for the same destination path.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "u8", into = "u8")]
pub enum AliasPriority {
    /// Installed by a device descriptor or another automatic mechanism
    #[default]
    Automatic,
    /// Installed explicitly by configuration or a client request
    Manual,
}

impl AliasPriority {
    /// Numeric value carried in JSON (`$priority`) and tree dumps
    pub const fn value(self) -> u8 {
        match self {
            AliasPriority::Automatic => 127,
            AliasPriority::Manual => 255,
        }
    }
}

impl From<u8> for AliasPriority {
    fn from(value: u8) -> Self {
        if value < 128 {
            AliasPriority::Automatic
        } else {
            AliasPriority::Manual
        }
    }
}

impl From<AliasPriority> for u8 {
    fn from(priority: AliasPriority) -> Self {
        priority.value()
    }
}

/// The value held by a [`PathNode`](crate::tree::PathNode).
///
/// Serialized with an internal `type` tag so that a node dump reads as
/// `{"path": "/dev", "type": "device", "device_name": ...}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PathElement {
    /// Placeholder for intermediate nodes with no meaning of their own
    #[default]
    Null,
    /// A plugin that registered devices below this node
    Plugin,
    /// A device exported by a server
    Device {
        device_name: String,
        server: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        descriptor: Value,
    },
    /// An interface (tracker, button, analog, ...) of its parent device
    Interface,
    /// A numbered sensor of its parent interface
    Sensor,
    /// Indirection to another path, possibly through a transform
    Alias {
        source: String,
        #[serde(default)]
        priority: AliasPriority,
    },
    /// Arbitrary string payload
    String {
        #[serde(rename = "string")]
        value: String,
    },
}

impl PathElement {
    /// Create a device element with an empty descriptor
    pub fn device(device_name: impl Into<String>, server: impl Into<String>) -> Self {
        PathElement::Device {
            device_name: device_name.into(),
            server: server.into(),
            descriptor: Value::Null,
        }
    }

    /// Create an alias element
    pub fn alias(source: impl Into<String>, priority: AliasPriority) -> Self {
        PathElement::Alias {
            source: source.into(),
            priority,
        }
    }

    /// Stable name of the element kind, as used in tree dumps
    pub fn type_name(&self) -> &'static str {
        match self {
            PathElement::Null => "null",
            PathElement::Plugin => "plugin",
            PathElement::Device { .. } => "device",
            PathElement::Interface => "interface",
            PathElement::Sensor => "sensor",
            PathElement::Alias { .. } => "alias",
            PathElement::String { .. } => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PathElement::Null)
    }

    pub fn is_alias(&self) -> bool {
        matches!(self, PathElement::Alias { .. })
    }

    pub fn is_interface(&self) -> bool {
        matches!(self, PathElement::Interface)
    }

    /// Source and priority if this element is an alias
    pub fn as_alias(&self) -> Option<(&str, AliasPriority)> {
        match self {
            PathElement::Alias { source, priority } => Some((source.as_str(), *priority)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(AliasPriority::Manual > AliasPriority::Automatic);
        assert_eq!(AliasPriority::from(255), AliasPriority::Manual);
        assert_eq!(AliasPriority::from(0), AliasPriority::Automatic);
        assert_eq!(AliasPriority::from(AliasPriority::Automatic.value()), AliasPriority::Automatic);
    }

    #[test]
    fn test_element_serialization_tags() {
        let alias = PathElement::alias("/dev/tracker/0", AliasPriority::Manual);
        let json = serde_json::to_value(&alias).unwrap();
        assert_eq!(json["type"], "alias");
        assert_eq!(json["source"], "/dev/tracker/0");
        assert_eq!(json["priority"], 255);

        let text = PathElement::String {
            value: "hello".to_string(),
        };
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["string"], "hello");

        let back: PathElement = serde_json::from_value(json).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn test_device_without_descriptor() {
        let json = serde_json::json!({
            "type": "device",
            "device_name": "Tracker0",
            "server": "localhost"
        });
        let element: PathElement = serde_json::from_value(json).unwrap();
        assert_eq!(element, PathElement::device("Tracker0", "localhost"));
        assert_eq!(element.type_name(), "device");
    }
}
