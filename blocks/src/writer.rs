use crate::{BlockDistributor, BlockState, WriterError, WriterResult};
use blockstream_core::{debug, trace};
use bytes::Bytes;
use std::sync::Arc;

/// Per item and per block boundary called by the execution pipeline
pub trait BlockItemWriter {
    /// Starts assembling block `block_number`. The previous block must have been closed.
    fn open_block(&mut self, block_number: i64) -> WriterResult<()>;

    /// Appends one serialized item to the open block
    fn write_item(&mut self, item: Bytes) -> WriterResult<()>;

    /// Appends the items in order, stopping at the first failure
    fn write_items(&mut self, items: impl IntoIterator<Item = Bytes>) -> WriterResult<()>
    where
        Self: Sized,
    {
        items.into_iter().try_for_each(|item| self.write_item(item))
    }

    /// Hands the open block off for distribution and returns without awaiting delivery
    fn close_block(&mut self) -> WriterResult<()>;
}

/// Writer feeding closed blocks to a [`BlockDistributor`], typically the connection manager
pub struct GrpcBlockItemWriter<D: BlockDistributor> {
    distributor: D,
    current: Option<BlockState>,
}

impl<D: BlockDistributor> GrpcBlockItemWriter<D> {
    pub fn new(distributor: D) -> Self {
        Self { distributor, current: None }
    }

    pub fn current_block_number(&self) -> Option<u64> {
        self.current.as_ref().map(|block| block.block_number)
    }

    pub fn distributor(&self) -> &D {
        &self.distributor
    }
}

impl<D: BlockDistributor> BlockItemWriter for GrpcBlockItemWriter<D> {
    fn open_block(&mut self, block_number: i64) -> WriterResult<()> {
        let block_number = u64::try_from(block_number).map_err(|_| WriterError::NegativeBlockNumber(block_number))?;
        if let Some(open) = &self.current {
            return Err(WriterError::BlockAlreadyOpen(open.block_number));
        }
        trace!("Opening block {block_number}");
        self.current = Some(BlockState::new(block_number));
        Ok(())
    }

    fn write_item(&mut self, item: Bytes) -> WriterResult<()> {
        self.current.as_mut().ok_or(WriterError::NoOpenBlock)?.push(item);
        Ok(())
    }

    fn close_block(&mut self) -> WriterResult<()> {
        let block = self.current.take().ok_or(WriterError::NoOpenBlock)?;
        debug!("Closing block {} with {} items", block.block_number, block.len());
        self.distributor.distribute(Arc::new(block));
        Ok(())
    }
}
