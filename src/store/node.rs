//! A single node in the namespace

use std::collections::BTreeSet;

use crate::protocol::Stat;

/// One entry in the namespace
#[derive(Debug, Clone)]
pub struct Node {
    /// Absolute path, fixed at creation
    path: String,
    data: Vec<u8>,
    stat: Stat,
    /// Names of immediate children
    children: BTreeSet<String>,
}

impl Node {
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Self {
        let stat = Stat {
            data_length: data.len() as u64,
            ..Default::default()
        };

        Self {
            path: path.into(),
            data,
            stat,
            children: BTreeSet::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn stat(&self) -> Stat {
        self.stat
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    /// Replace the data and bump the version
    pub fn set_data(&mut self, data: Vec<u8>) -> Stat {
        self.stat.data_length = data.len() as u64;
        self.stat.version += 1;
        self.data = data;
        self.stat
    }

    /// Register a child name. Returns false if it was already present.
    pub fn add_child(&mut self, name: impl Into<String>) -> bool {
        let added = self.children.insert(name.into());
        if added {
            self.stat.cversion += 1;
            self.stat.num_children = self.children.len() as u64;
        }
        added
    }
}
