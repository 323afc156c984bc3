use blockstream_nodedirectory::BlockNodeCatalog;
use std::time::Duration;

/// Shortest accepted node reselection interval
pub const MIN_NODE_RESELECTION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionManagerConfig {
    /// Upper bound on concurrently active non-preferred connections
    pub max_simultaneous_connections: usize,
    /// Raised to [`MIN_NODE_RESELECTION_INTERVAL`] by the manager if shorter
    pub node_reselection_interval: Duration,
    /// Maximum number of block items per request
    pub block_item_batch_size: usize,
    /// Polling period of [`wait_for_connection`](crate::ConnectionManager::wait_for_connection)
    pub wait_poll_interval: Duration,
    /// Bounded wait for pending distributions on shutdown
    pub shutdown_timeout: Duration,
    /// Bounded wait for room in a connection's outgoing stream
    pub send_timeout: Duration,
}

impl ConnectionManagerConfig {
    pub fn from_catalog(catalog: &BlockNodeCatalog) -> Self {
        Self {
            max_simultaneous_connections: catalog.max_simultaneous_connections(),
            node_reselection_interval: catalog.node_reselection_interval(),
            block_item_batch_size: catalog.block_item_batch_size(),
            ..Default::default()
        }
    }
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_connections: 1,
            node_reselection_interval: Duration::from_secs(3600),
            block_item_batch_size: 256,
            wait_poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
        }
    }
}
