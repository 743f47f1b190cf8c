//! Server: authoritative path tree, routes and their broadcast

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};
use vrlink_connection::{Connection, DeviceToken, MessageType, SyncSender};
use vrlink_core::alias::add_alias_from_source_and_relative_dest;
use vrlink_core::wire::to_bytes;
use vrlink_core::{
    normalize_device_descriptor, path_tree_to_json, process_device_descriptor_for_path_tree,
    resolve_tree_node, AliasPriority, AliasProcessor, OriginalSource, PathElement, PathTree,
    RouteContainer, RouteError,
};

use crate::error::ServerError;
use crate::messages::{
    RoutesUpdate, TreeUpdate, ROUTES_UPDATE_MESSAGE, SYSTEM_DEVICE_NAME, TREE_UPDATE_MESSAGE,
};

/// Latest encoded tree and routes, shared with the system device
#[derive(Default)]
struct Broadcast {
    tree: Vec<u8>,
    routes: Vec<u8>,
    pending: bool,
    peer_joined: bool,
}

pub struct Server {
    connection: Connection,
    tree: PathTree,
    routes: RouteContainer,
    broadcast: Arc<Mutex<Broadcast>>,
    tree_dirty: bool,
    // Kept alive so the system device stays bound
    _system: DeviceToken,
}

impl Server {
    /// Set up the system device on `connection`. The connection must be
    /// processed on the thread calling this.
    pub fn new(mut connection: Connection) -> Self {
        let tree_type = connection.register_message_type(TREE_UPDATE_MESSAGE);
        let routes_type = connection.register_message_type(ROUTES_UPDATE_MESSAGE);
        let broadcast = Arc::new(Mutex::new(Broadcast::default()));

        let joined = Arc::clone(&broadcast);
        connection.register_connection_handler(move || {
            joined.lock().peer_joined = true;
        });

        let outgoing = Arc::clone(&broadcast);
        let system = DeviceToken::create_sync_device(
            SYSTEM_DEVICE_NAME,
            &mut connection,
            move |sender: &SyncSender| -> anyhow::Result<()> {
                send_broadcast(&outgoing, sender, tree_type, routes_type)
            },
        );

        Self {
            connection,
            tree: PathTree::new(),
            routes: RouteContainer::new(),
            broadcast,
            tree_dirty: true,
            _system: system,
        }
    }

    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    /// Mutable access to the tree; the tree is re-broadcast on the next
    /// update.
    pub fn tree_mut(&mut self) -> &mut PathTree {
        self.tree_dirty = true;
        &mut self.tree
    }

    pub fn routes(&self) -> &RouteContainer {
        &self.routes
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn tree_json(&self, keep_nulls: bool) -> Value {
        path_tree_to_json(&self.tree, keep_nulls)
    }

    /// Install a single alias from `source` at `path`
    pub fn add_alias(
        &mut self,
        path: &str,
        source: &str,
        priority: AliasPriority,
    ) -> Result<bool, ServerError> {
        let root = self.tree.root();
        let changed =
            add_alias_from_source_and_relative_dest(&mut self.tree, root, source, path, priority)?;
        self.mark_changed(changed);
        Ok(changed)
    }

    /// Install an alias object (or array of them) relative to the root
    pub fn add_aliases(
        &mut self,
        aliases: &Value,
        priority: AliasPriority,
    ) -> Result<bool, ServerError> {
        let root = self.tree.root();
        let changed = AliasProcessor::new()
            .set_default_priority(priority)
            .process(&mut self.tree, root, aliases)?;
        self.mark_changed(changed);
        Ok(changed)
    }

    /// Record a `{"destination", "source"}` directive and install it as a
    /// manual alias
    pub fn add_route(&mut self, directive: &str) -> Result<bool, ServerError> {
        let value: Value = serde_json::from_str(directive).map_err(RouteError::from)?;
        let root = self.tree.root();
        let changed = AliasProcessor::new()
            .set_default_priority(AliasPriority::Manual)
            .process(&mut self.tree, root, &value)?;
        let appended = self.routes.add_route_value(value);
        // Replacing a route in place still changes the route list
        self.tree_dirty = true;
        debug!(appended = appended, changed = changed, "Added route");
        Ok(changed || appended)
    }

    /// Register a device from its descriptor. The descriptor is normalized
    /// first, and descriptor handlers fire afterwards.
    pub fn register_device(&mut self, name: &str, descriptor: &str) -> Result<bool, ServerError> {
        let normalized = normalize_device_descriptor(descriptor);
        let changed = process_device_descriptor_for_path_tree(&mut self.tree, name, &normalized)?;
        self.mark_changed(changed);
        if changed {
            info!(device = %name, "Device registered");
            self.connection.trigger_descriptor_handlers();
        }
        Ok(changed)
    }

    /// Resolve `path` against the server tree. Sensors inferred on the way
    /// are broadcast on the next update.
    pub fn resolve(&mut self, path: &str) -> Result<Option<OriginalSource>, ServerError> {
        let sensors = sensor_count(&self.tree);
        let source = resolve_tree_node(&mut self.tree, path);
        self.mark_changed(sensor_count(&self.tree) != sensors);
        Ok(source?)
    }

    /// Broadcast pending changes, then process the connection once
    pub fn update(&mut self) {
        if self.tree_dirty {
            self.tree_dirty = false;
            self.refresh_broadcast();
        }
        self.connection.process();
    }

    fn mark_changed(&mut self, changed: bool) {
        self.tree_dirty |= changed;
    }

    fn refresh_broadcast(&mut self) {
        let mut tree = TreeUpdate {
            json: path_tree_to_json(&self.tree, false).to_string(),
        };
        let mut routes = RoutesUpdate {
            json: self.routes.get_routes(false),
        };
        match (to_bytes(&mut tree), to_bytes(&mut routes)) {
            (Ok(tree), Ok(routes)) => {
                let mut broadcast = self.broadcast.lock();
                broadcast.tree = tree;
                broadcast.routes = routes;
                broadcast.pending = true;
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "Could not encode tree update");
            }
        }
    }
}

fn sensor_count(tree: &PathTree) -> usize {
    let mut count = 0;
    tree.visit_const_tree(|node| {
        if matches!(node.value(), PathElement::Sensor) {
            count += 1;
        }
    });
    count
}

fn send_broadcast(
    broadcast: &Mutex<Broadcast>,
    sender: &SyncSender,
    tree_type: MessageType,
    routes_type: MessageType,
) -> anyhow::Result<()> {
    let mut broadcast = broadcast.lock();
    if !(broadcast.pending || broadcast.peer_joined) || broadcast.tree.is_empty() {
        return Ok(());
    }
    sender.send_data(tree_type, &broadcast.tree)?;
    sender.send_data(routes_type, &broadcast.routes)?;
    debug!(bytes = broadcast.tree.len(), "Broadcast path tree");
    broadcast.pending = false;
    broadcast.peer_joined = false;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Server {
        let (connection, _) = Connection::create_loopback_pair();
        Server::new(connection)
    }

    #[test]
    fn test_manual_alias_beats_automatic() {
        let mut server = server();
        assert!(server
            .add_alias("/me/head", "/a/tracker/0", AliasPriority::Manual)
            .unwrap());
        assert!(!server
            .add_alias("/me/head", "/b/tracker/0", AliasPriority::Automatic)
            .unwrap());
        assert!(server
            .add_alias("/me/head", "/c/tracker/0", AliasPriority::Manual)
            .unwrap());
    }

    #[test]
    fn test_add_route_replaces_in_place() {
        let mut server = server();
        server
            .add_route(r#"{"destination": "/me/head", "source": "/a/tracker/0"}"#)
            .unwrap();
        server
            .add_route(r#"{"destination": "/me/hand", "source": "/a/tracker/1"}"#)
            .unwrap();
        assert!(server
            .add_route(r#"{"destination": "/me/head", "source": "/b/tracker/0"}"#)
            .unwrap());
        assert_eq!(server.routes().len(), 2);
        assert_eq!(server.routes().get_destination_at(0), Some("/me/head"));
        let head = server.tree().find_node_by_path("/me/head").unwrap();
        assert_eq!(
            server.tree().value(head).and_then(|v| v.as_alias()).map(|(s, _)| s.to_string()),
            Some("/b/tracker/0".to_string())
        );
        assert!(server.add_route("not json").is_err());
    }

    #[test]
    fn test_register_device_and_resolve() {
        let mut server = server();
        server
            .add_alias("/me/head", "/cam0/tracker/0", AliasPriority::Manual)
            .unwrap();
        assert!(server.resolve("/me/head").unwrap().is_none());
        assert!(server
            .register_device("cam0", r#"{"interfaces": {"tracker": {"count": 1}}}"#)
            .unwrap());
        let source = server.resolve("/me/head").unwrap().unwrap();
        assert_eq!(source.device_name(), "cam0");
        assert_eq!(source.sensor_number(), Some(0));
        let device = server.tree().find_node_by_path("/cam0").unwrap();
        assert!(matches!(
            server.tree().value(device),
            Some(PathElement::Device { .. })
        ));
    }

    #[test]
    fn test_descriptor_handlers_fire_on_register() {
        let mut server = server();
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        server
            .connection_mut()
            .register_descriptor_handler(move || *counter.lock() += 1);
        server.register_device("cam0", "{}").unwrap();
        assert_eq!(*fired.lock(), 1);
        assert!(!server.register_device("cam0", "{}").unwrap());
        assert_eq!(*fired.lock(), 1);
        server
            .register_device("cam0", r#"{"interfaces": {"tracker": {}}}"#)
            .unwrap();
        assert_eq!(*fired.lock(), 2);
    }

    #[test]
    fn test_resolve_marks_inferred_sensor_for_broadcast() {
        let mut server = server();
        server
            .register_device("cam0", r#"{"interfaces": {"tracker": {"count": 1}}}"#)
            .unwrap();
        server.update();
        assert!(!server.tree_dirty);

        assert!(server.resolve("/nowhere").unwrap().is_none());
        assert!(!server.tree_dirty);

        server.resolve("/cam0/tracker/0").unwrap().unwrap();
        assert!(server.tree_dirty);
        server.update();
        server.resolve("/cam0/tracker/0").unwrap().unwrap();
        assert!(!server.tree_dirty);
    }

    #[test]
    fn test_invalid_device_name() {
        let mut server = server();
        assert!(matches!(
            server.register_device("", "{}"),
            Err(ServerError::Path(_))
        ));
    }
}
