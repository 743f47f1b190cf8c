//! VRLink Core - Path tree, aliasing, and wire encoding
//!
//! This crate provides the foundational types shared by servers and clients:
//! - Path tree of typed elements addressed by slash-separated paths
//! - Alias, route, and device descriptor processing that populates the tree
//! - Resolution of any path back to its originating device/interface/sensor
//! - Bit-exact network serialization of report messages

pub mod alias;
pub mod descriptor;
pub mod element;
pub mod path;
pub mod resolve;
pub mod route;
pub mod transform;
pub mod tree;
pub mod tree_json;
pub mod wire;

pub use alias::{AliasError, AliasProcessor, AliasProcessorOptions, ParsedAlias};
pub use descriptor::{
    is_valid_device_name, normalize_device_descriptor, process_device_descriptor_for_path_tree,
};
pub use element::{AliasPriority, PathElement};
pub use path::PathError;
pub use resolve::{resolve_tree_node, OriginalSource, ResolveError, MAX_ALIAS_DEPTH};
pub use route::{RouteContainer, RouteError};
pub use transform::GeneralizedTransform;
pub use tree::{NodeId, PathNode, PathTree};
pub use tree_json::{json_str_to_path_tree, json_to_path_tree, path_tree_to_json, TreeJsonError};
pub use wire::{Buffer, BufferReader, Message, MessageVisitor, WireError, WireValue};
