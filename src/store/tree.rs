//! Path-indexed node tree

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::{normalize_path, split_path, validate_path, Node, StoreError, StoreResult, ROOT_PATH};
use crate::protocol::Stat;

/// The single source of truth for the namespace.
///
/// Not internally synchronized: it is owned by one dispatcher and every
/// mutation happens through `&mut self`.
#[derive(Debug)]
pub struct NodeStore {
    /// All nodes keyed by normalized path
    nodes: HashMap<String, Node>,
}

impl NodeStore {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_PATH.to_string(), Node::new(ROOT_PATH, Vec::new()));
        Self { nodes }
    }

    /// Number of nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, path: &str) -> Option<&Node> {
        self.nodes.get(normalize_path(path))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(normalize_path(path))
    }

    pub fn stat(&self, path: &str) -> StoreResult<Stat> {
        self.lookup(path).map(Node::stat)
    }

    pub fn get_data(&self, path: &str) -> StoreResult<(Vec<u8>, Stat)> {
        let node = self.lookup(path)?;
        tracing::debug!("get_data {} read {} bytes", node.path(), node.data().len());
        Ok((node.data().to_vec(), node.stat()))
    }

    pub fn set_data(&mut self, path: &str, data: Vec<u8>) -> StoreResult<Stat> {
        let path = normalize_path(path);
        let node = self.nodes.get_mut(path).ok_or_else(|| {
            tracing::debug!("Can't set_data: {} is missing", path);
            StoreError::NoNode(path.to_string())
        })?;

        let stat = node.set_data(data);
        tracing::debug!("set_data {} -> version {}", path, stat.version);
        Ok(stat)
    }

    /// Create a node under an existing parent
    pub fn create(&mut self, path: &str, data: Vec<u8>) -> StoreResult<()> {
        let path = normalize_path(path);
        validate_path(path)?;

        if self.nodes.contains_key(path) {
            return Err(StoreError::NodeExists(path.to_string()));
        }

        // Register with the parent first; a node is never stored unlisted.
        let (parent_path, name) = split_path(path);
        let parent = self.nodes.get_mut(parent_path).ok_or_else(|| {
            tracing::debug!("Can't create {} because parent {} is missing", path, parent_path);
            StoreError::NoNode(parent_path.to_string())
        })?;
        parent.add_child(name);

        match self.nodes.entry(path.to_string()) {
            Entry::Occupied(_) => return Err(StoreError::NodeExists(path.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Node::new(path, data));
            }
        }

        tracing::debug!("Created {}", path);
        Ok(())
    }

    fn lookup(&self, path: &str) -> StoreResult<&Node> {
        let path = normalize_path(path);
        self.nodes
            .get(path)
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}
