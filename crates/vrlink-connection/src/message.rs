//! Message type registry

use indexmap::IndexSet;
use tracing::debug;

/// Session-local id of a registered message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(u32);

impl MessageType {
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Interns message identifier strings; ids are handed out in registration
/// order and never reused for the life of the registry.
#[derive(Debug, Default, Clone)]
pub struct MessageTypeRegistry {
    names: IndexSet<String>,
}

impl MessageTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, returning the existing id if already known
    pub fn register(&mut self, name: &str) -> MessageType {
        if let Some(index) = self.names.get_index_of(name) {
            return MessageType(index as u32);
        }
        let (index, _) = self.names.insert_full(name.to_string());
        debug!(message_type = %name, id = index, "Registered message type");
        MessageType(index as u32)
    }

    pub fn lookup(&self, name: &str) -> Option<MessageType> {
        self.names
            .get_index_of(name)
            .map(|index| MessageType(index as u32))
    }

    pub fn name(&self, message_type: MessageType) -> Option<&str> {
        self.names
            .get_index(message_type.0 as usize)
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = MessageTypeRegistry::new();
        let pose = registry.register("vrlink.tracker.pose");
        let button = registry.register("vrlink.button");
        assert_ne!(pose, button);
        assert_eq!(registry.register("vrlink.tracker.pose"), pose);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.name(button), Some("vrlink.button"));
        assert_eq!(registry.lookup("vrlink.analog"), None);
    }
}
