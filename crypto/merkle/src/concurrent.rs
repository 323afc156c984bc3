use crate::{HasherError, HasherResult, StreamingTreeHasher, check_capacity, tree_depth};
use blockstream_hashes::{Hash, combine, empty_subtree_hash};
use futures_util::{
    FutureExt,
    future::{self, BoxFuture},
};
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::{collections::BTreeMap, mem, sync::Arc};
use tokio::sync::oneshot;

pub const DEFAULT_CHUNK_SIZE: usize = 128;

/// Streaming tree hasher combining full chunks of every level on a shared worker pool.
///
/// Each tree level has a single combiner. Once a combiner buffers `chunk_size` hashes it hands the
/// chunk to the pool, which pairs them left to right and delivers the parents to the next level.
/// Parent chunks are tagged with a per-level sequence number and absorbed by the next level strictly
/// in that order, so concurrent completion never reorders the tree.
pub struct ConcurrentStreamingTreeHasher {
    shared: Arc<Shared>,
    num_leaves: u64,
    finalized: bool,
}

struct Shared {
    pool: Arc<ThreadPool>,
    chunk_size: usize,
    state: Mutex<TreeState>,
}

#[derive(Default)]
struct TreeState {
    levels: Vec<Combiner>,
    finalization: Option<Finalization>,
}

struct Finalization {
    depth: usize,
    /// Lowest level not yet drained
    next_level: usize,
    root_sender: Option<oneshot::Sender<Hash>>,
}

#[derive(Default)]
struct Combiner {
    pending: Vec<Hash>,
    /// Sequence number of the next chunk this level emits upwards
    next_emitted: u64,
    /// Sequence number of the next chunk this level absorbs from below
    next_absorbed: u64,
    out_of_order: BTreeMap<u64, Vec<Hash>>,
    /// Chunks of the level below still being combined on the pool
    in_flight: usize,
}

impl Combiner {
    fn is_settled(&self) -> bool {
        self.in_flight == 0 && self.out_of_order.is_empty()
    }
}

impl ConcurrentStreamingTreeHasher {
    pub fn new(pool: Arc<ThreadPool>, chunk_size: usize) -> HasherResult<Self> {
        if chunk_size == 0 || chunk_size % 2 != 0 {
            return Err(HasherError::InvalidChunkSize(chunk_size));
        }
        let shared = Arc::new(Shared { pool, chunk_size, state: Mutex::new(TreeState::default()) });
        Ok(Self { shared, num_leaves: 0, finalized: false })
    }

    pub fn with_default_chunk_size(pool: Arc<ThreadPool>) -> Self {
        let shared = Arc::new(Shared { pool, chunk_size: DEFAULT_CHUNK_SIZE, state: Mutex::new(TreeState::default()) });
        Self { shared, num_leaves: 0, finalized: false }
    }

    pub fn chunk_size(&self) -> usize {
        self.shared.chunk_size
    }
}

impl StreamingTreeHasher for ConcurrentStreamingTreeHasher {
    fn add_leaf(&mut self, leaf: Hash) -> HasherResult<()> {
        if self.finalized {
            return Err(HasherError::Finalized);
        }
        check_capacity(self.num_leaves)?;
        self.num_leaves += 1;
        self.shared.push_leaf(leaf);
        Ok(())
    }

    fn root_hash(&mut self) -> BoxFuture<'static, HasherResult<Hash>> {
        if self.finalized {
            return future::ready(Err(HasherError::Finalized)).boxed();
        }
        self.finalized = true;
        if self.num_leaves == 0 {
            return future::ready(Ok(empty_subtree_hash(0))).boxed();
        }

        let (sender, receiver) = oneshot::channel();
        let depth = tree_depth(self.num_leaves);
        {
            let mut state = self.shared.state.lock();
            state.ensure_level(depth);
            state.finalization = Some(Finalization { depth, next_level: 0, root_sender: Some(sender) });
            self.shared.advance_finalization(&mut state);
        }
        receiver.map(|res| res.map_err(|_| HasherError::Cancelled)).boxed()
    }

    fn num_leaves(&self) -> u64 {
        self.num_leaves
    }
}

impl TreeState {
    fn ensure_level(&mut self, level: usize) {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Combiner::default);
        }
    }
}

impl Shared {
    fn push_leaf(self: &Arc<Self>, leaf: Hash) {
        let mut state = self.state.lock();
        state.ensure_level(0);
        state.levels[0].pending.push(leaf);
        if state.levels[0].pending.len() >= self.chunk_size {
            self.schedule_chunk(&mut state, 0);
        }
    }

    /// Hands the parents combined from chunk `seq` of the level below to the combiner at `level`
    fn absorb_locked(self: &Arc<Self>, state: &mut TreeState, level: usize, seq: u64, parents: Vec<Hash>) {
        state.ensure_level(level);
        let combiner = &mut state.levels[level];
        combiner.out_of_order.insert(seq, parents);
        while let Some(parents) = combiner.out_of_order.remove(&combiner.next_absorbed) {
            combiner.pending.extend(parents);
            combiner.next_absorbed += 1;
        }
        while state.levels[level].pending.len() >= self.chunk_size {
            self.schedule_chunk(state, level);
        }
    }

    fn schedule_chunk(self: &Arc<Self>, state: &mut TreeState, level: usize) {
        state.ensure_level(level + 1);
        let combiner = &mut state.levels[level];
        let chunk = combiner.pending.drain(..self.chunk_size).collect::<Vec<_>>();
        let seq = combiner.next_emitted;
        combiner.next_emitted += 1;
        state.levels[level + 1].in_flight += 1;

        let shared = self.clone();
        self.pool.spawn(move || {
            let parents = combine_pairs(&chunk, level);
            let mut state = shared.state.lock();
            state.levels[level + 1].in_flight -= 1;
            shared.absorb_locked(&mut state, level + 1, seq, parents);
            shared.advance_finalization(&mut state);
        });
    }

    /// Drains levels bottom-up once no more input can reach them, resolving the root at the top.
    ///
    /// A level is drained only after every chunk of the level below was absorbed, so its remainder is
    /// final and can be combined inline (it is shorter than a chunk).
    fn advance_finalization(self: &Arc<Self>, state: &mut TreeState) {
        loop {
            let Some(finalization) = state.finalization.as_ref() else { return };
            let (level, depth) = (finalization.next_level, finalization.depth);
            if !state.levels[level].is_settled() {
                return;
            }

            if level == depth {
                let root = state.levels[level].pending.first().copied();
                debug_assert_eq!(state.levels[level].pending.len(), 1);
                let sender = state.finalization.take().and_then(|mut finalization| finalization.root_sender.take());
                if let (Some(root), Some(sender)) = (root, sender) {
                    let _ = sender.send(root);
                }
                return;
            }

            let combiner = &mut state.levels[level];
            let mut remainder = mem::take(&mut combiner.pending);
            if !remainder.is_empty() {
                if remainder.len() % 2 == 1 {
                    remainder.push(empty_subtree_hash(level));
                }
                let seq = combiner.next_emitted;
                combiner.next_emitted += 1;
                let parents = combine_pairs(&remainder, level);
                self.absorb_locked(state, level + 1, seq, parents);
            }
            if let Some(finalization) = state.finalization.as_mut() {
                finalization.next_level += 1;
            }
        }
    }
}

fn combine_pairs(hashes: &[Hash], level: usize) -> Vec<Hash> {
    debug_assert!(hashes.len() % 2 == 0, "level {level} combines an odd number of hashes");
    hashes.chunks_exact(2).map(|pair| combine(pair[0], pair[1])).collect()
}
