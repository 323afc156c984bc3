use crate::{HasherError, HasherResult, StreamingTreeHasher, check_capacity, tree_depth};
use blockstream_hashes::{Hash, combine, empty_subtree_hash};
use futures_util::{
    FutureExt,
    future::{self, BoxFuture},
};

/// Resumable snapshot of a partially built tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeStatus {
    pub num_leaves: u64,
    /// Roots of the perfect subtrees covering all leaves so far, leftmost (largest) first
    pub rightmost_hashes: Vec<Hash>,
}

/// Single-threaded streaming tree hasher keeping only the roots of the completed perfect subtrees.
///
/// Memory is logarithmic in the number of leaves and the whole state can be captured with
/// [`status`](Self::status) and later resumed with [`from_status`](Self::from_status).
#[derive(Debug, Default)]
pub struct NaiveStreamingTreeHasher {
    num_leaves: u64,
    peaks: Vec<Hash>,
    finalized: bool,
}

impl NaiveStreamingTreeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_status(status: TreeStatus) -> HasherResult<Self> {
        let expected = status.num_leaves.count_ones() as usize;
        if status.rightmost_hashes.len() != expected {
            return Err(HasherError::InvalidStatus {
                num_leaves: status.num_leaves,
                expected,
                actual: status.rightmost_hashes.len(),
            });
        }
        Ok(Self { num_leaves: status.num_leaves, peaks: status.rightmost_hashes, finalized: false })
    }

    pub fn status(&self) -> TreeStatus {
        TreeStatus { num_leaves: self.num_leaves, rightmost_hashes: self.peaks.clone() }
    }

    fn compute_root(&self) -> Hash {
        if self.num_leaves == 0 {
            return empty_subtree_hash(0);
        }
        let mut peaks = self.peaks.iter().rev().copied();
        let mut partial: Option<Hash> = None;
        for level in 0..tree_depth(self.num_leaves) {
            if (self.num_leaves >> level) & 1 == 1 {
                let Some(peak) = peaks.next() else { break };
                partial = Some(combine(peak, partial.unwrap_or_else(|| empty_subtree_hash(level))));
            } else if let Some(hash) = partial {
                partial = Some(combine(hash, empty_subtree_hash(level)));
            }
        }
        // A power of two number of leaves forms a single perfect tree
        partial.or_else(|| peaks.next()).unwrap_or_else(|| empty_subtree_hash(0))
    }
}

impl StreamingTreeHasher for NaiveStreamingTreeHasher {
    fn add_leaf(&mut self, leaf: Hash) -> HasherResult<()> {
        if self.finalized {
            return Err(HasherError::Finalized);
        }
        check_capacity(self.num_leaves)?;
        self.peaks.push(leaf);
        let mut completed = self.num_leaves;
        while completed & 1 == 1 {
            let (Some(right), Some(left)) = (self.peaks.pop(), self.peaks.pop()) else { break };
            self.peaks.push(combine(left, right));
            completed >>= 1;
        }
        self.num_leaves += 1;
        Ok(())
    }

    fn root_hash(&mut self) -> BoxFuture<'static, HasherResult<Hash>> {
        if self.finalized {
            return future::ready(Err(HasherError::Finalized)).boxed();
        }
        self.finalized = true;
        future::ready(Ok(self.compute_root())).boxed()
    }

    fn num_leaves(&self) -> u64 {
        self.num_leaves
    }
}
