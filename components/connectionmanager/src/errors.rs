use thiserror::Error;

/// Failure to open a stream to a block node. The endpoint stays eligible for the next selection pass.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("{0}")]
    TonicError(#[from] tonic::transport::Error),

    #[error("{0}")]
    TonicStatus(#[from] tonic::Status),

    #[error("block node {0} refused the connection")]
    Refused(String),
}

/// Failure to hand one batch to one connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("timed out sending to block node {0}")]
    Timeout(String),

    #[error("outgoing stream to block node {0} is closed")]
    ChannelClosed(String),
}
