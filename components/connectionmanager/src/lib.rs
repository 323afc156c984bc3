//! Keeps the publisher connected to a bounded, priority tiered set of block nodes and fans closed
//! blocks out to every active connection.
//!
//! Preferred (priority 1) block nodes are always connected when reachable. All other nodes compete
//! for `max_simultaneous_connections` slots and are reshuffled on every reselection tick.

mod config;
mod connection;
mod connector;
mod errors;
mod manager;

#[cfg(test)]
mod mock;

pub use config::{ConnectionManagerConfig, MIN_NODE_RESELECTION_INTERVAL};
pub use connection::{Connection, ConnectionEvent, ConnectionId, ConnectionState};
pub use connector::{BlockNodeConnector, BlockStream, GrpcBlockNodeConnector};
pub use errors::{ConnectionError, SendError};
pub use manager::ConnectionManager;
