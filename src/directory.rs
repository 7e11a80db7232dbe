use std::collections::HashMap;

use async_trait::async_trait;
use dimse::{AeDirectory, RemoteNode};

/// AE title directory backed by the `[ae_titles]` configuration table
#[derive(Debug, Clone, Default)]
pub struct StaticAeDirectory {
    nodes: HashMap<String, RemoteNode>,
}

impl StaticAeDirectory {
    pub fn new(nodes: HashMap<String, RemoteNode>) -> Self {
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[async_trait]
impl AeDirectory for StaticAeDirectory {
    async fn resolve(&self, ae_title: &str) -> Option<RemoteNode> {
        // AE titles are space padded on the wire
        self.nodes.get(ae_title.trim()).cloned()
    }
}
