//! Messages sent by the server's system device

use vrlink_core::{Message, MessageVisitor, WireError};

/// Name of the device that carries tree and route updates
pub const SYSTEM_DEVICE_NAME: &str = "vrlink/system";

pub const TREE_UPDATE_MESSAGE: &str = "vrlink.system.tree_update";
pub const ROUTES_UPDATE_MESSAGE: &str = "vrlink.system.routes_update";

/// The complete path tree as a JSON array of node records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeUpdate {
    pub json: String,
}

impl Message for TreeUpdate {
    fn process_message<V: MessageVisitor>(&mut self, visitor: &mut V) -> Result<(), WireError> {
        visitor.visit(&mut self.json)
    }
}

/// The route directives as a JSON array
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutesUpdate {
    pub json: String,
}

impl Message for RoutesUpdate {
    fn process_message<V: MessageVisitor>(&mut self, visitor: &mut V) -> Result<(), WireError> {
        visitor.visit(&mut self.json)
    }
}
