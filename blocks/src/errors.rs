use blockstream_merkle::HasherError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriterError {
    #[error("block number must not be negative, got {0}")]
    NegativeBlockNumber(i64),

    #[error("no block is open")]
    NoOpenBlock,

    #[error("block {0} is still open")]
    BlockAlreadyOpen(u64),

    #[error(transparent)]
    Hasher(#[from] HasherError),
}

pub type WriterResult<T> = std::result::Result<T, WriterError>;
