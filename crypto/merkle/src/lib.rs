//! Streaming merkle root computation over the ordered leaf hashes of a block.
//!
//! Leaves are fed one at a time, in item emission order. The tree is implicitly padded to the next
//! power of two with empty leaves, so an odd trailing node at level `k` is paired with
//! [`empty_subtree_hash(k)`](blockstream_hashes::empty_subtree_hash). The root only depends on the
//! leaf sequence, never on how the combination work was scheduled.

mod concurrent;
mod naive;

pub use concurrent::{ConcurrentStreamingTreeHasher, DEFAULT_CHUNK_SIZE};
pub use naive::{NaiveStreamingTreeHasher, TreeStatus};

use blockstream_hashes::{Hash, MAX_LEAVES};
use futures_util::future::BoxFuture;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HasherError {
    #[error("root hash was already requested, the hasher accepts no more input")]
    Finalized,

    #[error("tree cannot hold more than {MAX_LEAVES} leaves")]
    TooManyLeaves,

    #[error("chunk size must be a positive even number, got {0}")]
    InvalidChunkSize(usize),

    #[error("status with {num_leaves} leaves must carry {expected} rightmost hashes, got {actual}")]
    InvalidStatus { num_leaves: u64, expected: usize, actual: usize },

    #[error("hashing was abandoned before the root was computed")]
    Cancelled,
}

pub type HasherResult<T> = std::result::Result<T, HasherError>;

pub trait StreamingTreeHasher {
    /// Appends the next leaf hash. Fails once [`root_hash`](Self::root_hash) was called.
    fn add_leaf(&mut self, leaf: Hash) -> HasherResult<()>;

    /// Requests the root of all leaves added so far. May be called exactly once.
    fn root_hash(&mut self) -> BoxFuture<'static, HasherResult<Hash>>;

    fn num_leaves(&self) -> u64;

    fn add_leaves(&mut self, leaves: impl IntoIterator<Item = Hash>) -> HasherResult<()>
    where
        Self: Sized,
    {
        leaves.into_iter().try_for_each(|leaf| self.add_leaf(leaf))
    }
}

fn tree_depth(num_leaves: u64) -> usize {
    num_leaves.next_power_of_two().trailing_zeros() as usize
}

fn check_capacity(num_leaves: u64) -> HasherResult<()> {
    if num_leaves >= MAX_LEAVES { Err(HasherError::TooManyLeaves) } else { Ok(()) }
}
