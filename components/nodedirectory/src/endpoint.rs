use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Priority of the preferred (tier-1) block nodes. Every other priority is non-preferred.
pub const PREFERRED_PRIORITY: u32 = 1;

/// A block node address. Two endpoints are the same node iff address, port and priority all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockNodeEndpoint {
    pub address: String,
    pub port: u16,
    pub priority: u32,
}

impl BlockNodeEndpoint {
    pub fn new(address: impl Into<String>, port: u16, priority: u32) -> Self {
        Self { address: address.into(), port, priority }
    }

    pub fn is_preferred(&self) -> bool {
        self.priority == PREFERRED_PRIORITY
    }

    /// `http://address:port`, as expected by the gRPC transport
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl Display for BlockNodeEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
