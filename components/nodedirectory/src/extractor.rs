use crate::BlockNodeEndpoint;
use blockstream_core::{debug, info};
use serde::Deserialize;
use std::{fs, path::Path, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed reading block node config {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("malformed block node config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("block node at index {index} has an empty address")]
    EmptyAddress { index: usize },

    #[error("block node {0} has port 0")]
    InvalidPort(String),

    #[error("block node {0} has priority 0, priorities start at 1")]
    InvalidPriority(String),

    #[error("block item batch size must be positive")]
    InvalidBatchSize,

    #[error("node reselection interval must be at least one second")]
    InvalidReselectionInterval,
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    nodes: Vec<BlockNodeEndpoint>,
    max_simultaneous_connections: usize,
    /// Seconds
    node_reselection_interval: u64,
    block_item_batch_size: usize,
}

/// Validated, priority ordered block node catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNodeCatalog {
    nodes: Vec<BlockNodeEndpoint>,
    max_simultaneous_connections: usize,
    node_reselection_interval: Duration,
    block_item_batch_size: usize,
}

impl BlockNodeCatalog {
    pub fn new(
        mut nodes: Vec<BlockNodeEndpoint>,
        max_simultaneous_connections: usize,
        node_reselection_interval: Duration,
        block_item_batch_size: usize,
    ) -> ConfigResult<Self> {
        for (index, node) in nodes.iter().enumerate() {
            if node.address.trim().is_empty() {
                return Err(ConfigError::EmptyAddress { index });
            }
            if node.port == 0 {
                return Err(ConfigError::InvalidPort(node.address.clone()));
            }
            if node.priority == 0 {
                return Err(ConfigError::InvalidPriority(node.to_string()));
            }
        }
        if block_item_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if node_reselection_interval < Duration::from_secs(1) {
            return Err(ConfigError::InvalidReselectionInterval);
        }
        // Stable, so equal priorities keep their configured order
        nodes.sort_by_key(|node| node.priority);
        Ok(Self { nodes, max_simultaneous_connections, node_reselection_interval, block_item_batch_size })
    }

    pub fn all_nodes(&self) -> &[BlockNodeEndpoint] {
        &self.nodes
    }

    pub fn preferred_nodes(&self) -> impl Iterator<Item = &BlockNodeEndpoint> {
        self.nodes.iter().filter(|node| node.is_preferred())
    }

    pub fn non_preferred_nodes(&self) -> impl Iterator<Item = &BlockNodeEndpoint> {
        self.nodes.iter().filter(|node| !node.is_preferred())
    }

    pub fn max_simultaneous_connections(&self) -> usize {
        self.max_simultaneous_connections
    }

    pub fn node_reselection_interval(&self) -> Duration {
        self.node_reselection_interval
    }

    pub fn block_item_batch_size(&self) -> usize {
        self.block_item_batch_size
    }
}

/// Reads the block node catalog from its JSON descriptor.
///
/// ```json
/// {
///   "nodes": [{ "priority": 1, "address": "block-node-0", "port": 8080 }],
///   "maxSimultaneousConnections": 1,
///   "nodeReselectionInterval": 3600,
///   "blockItemBatchSize": 256
/// }
/// ```
pub struct BlockNodeConfigExtractor;

impl BlockNodeConfigExtractor {
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<BlockNodeCatalog> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        let catalog = Self::from_json(&json)?;
        info!(
            "Loaded {} block nodes ({} preferred) from {}",
            catalog.all_nodes().len(),
            catalog.preferred_nodes().count(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> ConfigResult<BlockNodeCatalog> {
        let raw: RawConfig = serde_json::from_str(json)?;
        debug!("Parsed block node config with {} nodes", raw.nodes.len());
        BlockNodeCatalog::new(
            raw.nodes,
            raw.max_simultaneous_connections,
            Duration::from_secs(raw.node_reselection_interval),
            raw.block_item_batch_size,
        )
    }
}
