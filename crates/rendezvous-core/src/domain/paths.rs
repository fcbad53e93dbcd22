//! Store path layout for one node.
//!
//! ```text
//! nodes/<name>/tasks.dat              queue blob
//! nodes/<name>/lock.owner             producer (coordinator) lock
//! nodes/<name>/lock.peer              consumer (worker) lock
//! nodes/<name>/status.json            NodeStatus
//! nodes/<name>/results/<result-id>.json
//! ```

use crate::domain::errors::{Error, Result};
use crate::domain::ids::ResultId;

/// Root prefix for every node entry.
pub const NODES_PREFIX: &str = "nodes/";

/// File name of the queue blob.
pub const QUEUE_BLOB: &str = "tasks.dat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePaths {
    name: String,
    base: String,
}

impl NodePaths {
    /// Builds the layout for `name`, rejecting names that would escape the
    /// node's prefix.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_node_name(&name)?;
        let base = format!("{NODES_PREFIX}{name}");
        Ok(Self { name, base })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> String {
        format!("{}/{QUEUE_BLOB}", self.base)
    }

    pub fn owner_lock(&self) -> String {
        format!("{}/lock.owner", self.base)
    }

    pub fn peer_lock(&self) -> String {
        format!("{}/lock.peer", self.base)
    }

    pub fn status(&self) -> String {
        format!("{}/status.json", self.base)
    }

    pub fn results_prefix(&self) -> String {
        format!("{}/results/", self.base)
    }

    pub fn result(&self, id: ResultId) -> String {
        format!("{}{id}.json", self.results_prefix())
    }
}

fn validate_node_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > u8::MAX as usize {
        return Err(Error::Config(format!(
            "node name must be 1..=255 bytes, got {}",
            name.len()
        )));
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok || name == "." || name == ".." {
        return Err(Error::Config(format!("invalid node name {name:?}")));
    }
    Ok(())
}
