//! Client side: a replica of the server's tree and the interfaces resolved
//! against it

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use vrlink_connection::{Connection, ConnectionDevicePtr, InboundMessage};
use vrlink_core::wire::from_bytes;
use vrlink_core::{
    json_str_to_path_tree, resolve_tree_node, OriginalSource, PathTree, ResolveError,
    RouteContainer,
};

use crate::error::ServerError;
use crate::messages::{
    RoutesUpdate, TreeUpdate, ROUTES_UPDATE_MESSAGE, SYSTEM_DEVICE_NAME, TREE_UPDATE_MESSAGE,
};

#[derive(Default)]
struct Replica {
    tree: PathTree,
    routes: RouteContainer,
    /// Bumped on every accepted tree update
    generation: u64,
}

/// Index of an interface opened with [`ClientContext::get_interface`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHandle(usize);

struct ClientInterface {
    path: String,
    source: Option<OriginalSource>,
}

pub struct ClientContext {
    connection: Connection,
    replica: Arc<Mutex<Replica>>,
    interfaces: Vec<ClientInterface>,
    resolved_generation: u64,
    _system: ConnectionDevicePtr,
}

impl ClientContext {
    pub fn new(mut connection: Connection) -> Self {
        let tree_type = connection.register_message_type(TREE_UPDATE_MESSAGE);
        let routes_type = connection.register_message_type(ROUTES_UPDATE_MESSAGE);
        let replica = Arc::new(Mutex::new(Replica::default()));
        let system = connection.create_connection_device(SYSTEM_DEVICE_NAME);

        let tree_replica = Arc::clone(&replica);
        system.register_message_handler(tree_type, move |message: &InboundMessage| {
            apply_tree_update(&tree_replica, message);
        });
        let routes_replica = Arc::clone(&replica);
        system.register_message_handler(routes_type, move |message: &InboundMessage| {
            apply_routes_update(&routes_replica, message);
        });

        Self {
            connection,
            replica,
            interfaces: Vec::new(),
            resolved_generation: 0,
            _system: system,
        }
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Process the connection; if a new tree arrived, re-resolve every open
    /// interface.
    pub fn update(&mut self) {
        self.connection.process();
        let generation = self.replica.lock().generation;
        if generation != self.resolved_generation {
            self.resolved_generation = generation;
            self.resolve_interfaces();
        }
    }

    /// Resolve `path` against the current replica
    pub fn resolve(&self, path: &str) -> Result<Option<OriginalSource>, ResolveError> {
        resolve_tree_node(&mut self.replica.lock().tree, path)
    }

    pub fn routes(&self) -> RouteContainer {
        self.replica.lock().routes.clone()
    }

    /// Number of tree updates received so far
    pub fn tree_generation(&self) -> u64 {
        self.replica.lock().generation
    }

    pub fn with_tree<R>(&self, f: impl FnOnce(&PathTree) -> R) -> R {
        f(&self.replica.lock().tree)
    }

    /// Open an interface on `path`. It is resolved now and again whenever
    /// the tree changes. Only a malformed path is an error.
    pub fn get_interface(&mut self, path: &str) -> Result<InterfaceHandle, ServerError> {
        let source = match self.resolve(path) {
            Ok(source) => source,
            Err(ResolveError::Path(err)) => return Err(ResolveError::Path(err).into()),
            Err(err) => {
                warn!(path = %path, error = %err, "Interface resolution failed");
                None
            }
        };
        self.interfaces.push(ClientInterface {
            path: path.to_string(),
            source,
        });
        Ok(InterfaceHandle(self.interfaces.len() - 1))
    }

    /// Where the interface's reports come from, once resolvable
    pub fn interface_source(
        &self,
        handle: InterfaceHandle,
    ) -> Result<Option<&OriginalSource>, ServerError> {
        self.interfaces
            .get(handle.0)
            .map(|interface| interface.source.as_ref())
            .ok_or(ServerError::UnknownInterface(handle.0))
    }

    fn resolve_interfaces(&mut self) {
        let mut replica = self.replica.lock();
        for interface in &mut self.interfaces {
            interface.source = match resolve_tree_node(&mut replica.tree, &interface.path) {
                Ok(source) => source,
                Err(err) => {
                    warn!(path = %interface.path, error = %err, "Interface resolution failed");
                    None
                }
            };
            if interface.source.is_none() {
                debug!(path = %interface.path, "Interface not yet resolvable");
            }
        }
    }
}

fn apply_tree_update(replica: &Mutex<Replica>, message: &InboundMessage) {
    let update = match from_bytes::<TreeUpdate>(&message.payload) {
        Ok(update) => update,
        Err(err) => {
            warn!(error = %err, "Dropping malformed tree update");
            return;
        }
    };
    let mut tree = PathTree::new();
    if let Err(err) = json_str_to_path_tree(&mut tree, &update.json) {
        warn!(error = %err, "Dropping invalid tree update");
        return;
    }
    let mut replica = replica.lock();
    replica.tree = tree;
    replica.generation += 1;
    debug!(nodes = replica.tree.len(), generation = replica.generation, "Path tree replaced");
}

fn apply_routes_update(replica: &Mutex<Replica>, message: &InboundMessage) {
    let update = match from_bytes::<RoutesUpdate>(&message.payload) {
        Ok(update) => update,
        Err(err) => {
            warn!(error = %err, "Dropping malformed routes update");
            return;
        }
    };
    match RouteContainer::from_json_array(&update.json) {
        Ok(routes) => replica.lock().routes = routes,
        Err(err) => warn!(error = %err, "Dropping invalid routes update"),
    }
}
