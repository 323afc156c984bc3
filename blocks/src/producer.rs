use crate::{BlockItemWriter, WriterError, WriterResult};
use blockstream_hashes::{Hash, ZERO_HASH, block_root_hash, hash_leaf};
use blockstream_merkle::{ConcurrentStreamingTreeHasher, HasherResult, StreamingTreeHasher};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use rayon::ThreadPool;
use std::sync::Arc;

/// Feeds every item both to a [`BlockItemWriter`] and, as a leaf hash, to a per block tree hasher.
///
/// Closing a block hands it to the writer immediately and returns the pending root, so hashing and
/// distribution proceed side by side. [`close_chained_block`](Self::close_chained_block) additionally
/// links each block to its predecessor through [`block_root_hash`].
pub struct BlockStreamProducer<W: BlockItemWriter> {
    writer: W,
    pool: Arc<ThreadPool>,
    hasher: Option<ConcurrentStreamingTreeHasher>,
    previous_block_hash: Hash,
}

impl<W: BlockItemWriter> BlockStreamProducer<W> {
    pub fn new(writer: W, pool: Arc<ThreadPool>) -> Self {
        Self { writer, pool, hasher: None, previous_block_hash: ZERO_HASH }
    }

    /// Resumes a stream whose last block hashed to `previous_block_hash`
    pub fn with_previous_block_hash(mut self, previous_block_hash: Hash) -> Self {
        self.previous_block_hash = previous_block_hash;
        self
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn previous_block_hash(&self) -> Hash {
        self.previous_block_hash
    }

    pub fn open_block(&mut self, block_number: i64) -> WriterResult<()> {
        self.writer.open_block(block_number)?;
        self.hasher = Some(ConcurrentStreamingTreeHasher::with_default_chunk_size(self.pool.clone()));
        Ok(())
    }

    pub fn write_item(&mut self, item: Bytes) -> WriterResult<()> {
        let hasher = self.hasher.as_mut().ok_or(WriterError::NoOpenBlock)?;
        hasher.add_leaf(hash_leaf(&item))?;
        self.writer.write_item(item)
    }

    pub fn write_items(&mut self, items: impl IntoIterator<Item = Bytes>) -> WriterResult<()> {
        items.into_iter().try_for_each(|item| self.write_item(item))
    }

    /// Closes the block and returns the future resolving to its root hash
    pub fn close_block(&mut self) -> WriterResult<BoxFuture<'static, HasherResult<Hash>>> {
        let mut hasher = self.hasher.take().ok_or(WriterError::NoOpenBlock)?;
        self.writer.close_block()?;
        Ok(hasher.root_hash())
    }

    /// Closes the block and returns its block hash, which becomes the previous block hash of the next one.
    ///
    /// Written items form the input root. The output root and the start-of-block state root come
    /// from the execution side.
    pub async fn close_chained_block(&mut self, output_root: Hash, start_of_block_state_root: Hash) -> WriterResult<Hash> {
        let input_root = self.close_block()?.await?;
        let block_hash = block_root_hash(self.previous_block_hash, input_root, output_root, start_of_block_state_root);
        self.previous_block_hash = block_hash;
        Ok(block_hash)
    }
}
