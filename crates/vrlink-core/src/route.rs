//! Ordered set of routing directives, one per destination

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::alias::{DESTINATION_KEY, SOURCE_KEY};

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Invalid JSON routing directive: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Routing directives must be a JSON array")]
    NotAnArray,
}

/// Routing directives (`{"destination": ..., "source": ...}` objects),
/// parsed once and kept in insertion order. Adding a directive whose
/// destination already exists replaces it in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteContainer {
    directives: Vec<Value>,
}

fn destination_of(directive: &Value) -> &str {
    directive
        .get(DESTINATION_KEY)
        .and_then(Value::as_str)
        .unwrap_or_default()
}

impl RouteContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON array of directives
    pub fn from_json_array(routes: &str) -> Result<Self, RouteError> {
        let value: Value = serde_json::from_str(routes)?;
        let Value::Array(items) = value else {
            return Err(RouteError::NotAnArray);
        };
        let mut container = Self::new();
        for item in items {
            container.add_route_value(item);
        }
        Ok(container)
    }

    /// Add a directive given as JSON text. Returns true if it was appended,
    /// false if it replaced the directive for the same destination.
    pub fn add_route(&mut self, directive: &str) -> Result<bool, RouteError> {
        let value: Value = serde_json::from_str(directive)?;
        Ok(self.add_route_value(value))
    }

    /// Add an already-parsed directive, same semantics as
    /// [`add_route`](Self::add_route)
    pub fn add_route_value(&mut self, directive: Value) -> bool {
        let destination = destination_of(&directive).to_string();
        match self
            .directives
            .iter_mut()
            .find(|existing| destination_of(existing) == destination)
        {
            Some(existing) => {
                debug!(destination = %destination, "Replacing route");
                *existing = directive;
                false
            }
            None => {
                debug!(destination = %destination, "Adding route");
                self.directives.push(directive);
                true
            }
        }
    }

    /// All directives as a JSON array, pretty-printed if `styled`
    pub fn get_routes(&self, styled: bool) -> String {
        let routes = Value::Array(self.directives.clone());
        if styled {
            serde_json::to_string_pretty(&routes).unwrap_or_default()
        } else {
            routes.to_string()
        }
    }

    pub fn get_route_for_destination(&self, destination: &str) -> Option<&Value> {
        self.directives
            .iter()
            .find(|directive| destination_of(directive) == destination)
    }

    /// Source of the directive routing to `destination`
    pub fn get_source(&self, destination: &str) -> Option<&Value> {
        self.get_route_for_destination(destination)
            .and_then(|directive| directive.get(SOURCE_KEY))
    }

    pub fn get_source_at(&self, index: usize) -> Option<&Value> {
        self.directives
            .get(index)
            .and_then(|directive| directive.get(SOURCE_KEY))
    }

    pub fn get_destination_at(&self, index: usize) -> Option<&str> {
        self.directives.get(index).map(destination_of)
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.directives.iter()
    }
}
