use bytes::Bytes;
use std::sync::Arc;

/// Serialized items of one block, in emission order.
///
/// Owned and appended to by the writer while the block is open, then frozen behind an [`Arc`] and
/// shared read-only by every connection distributing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockState {
    pub block_number: u64,
    pub items: Vec<Bytes>,
}

impl BlockState {
    pub fn new(block_number: u64) -> Self {
        Self { block_number, items: Vec::new() }
    }

    pub fn push(&mut self, item: Bytes) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Splits the items into ordered batches of at most `batch_size` items. An empty block yields a
    /// single empty batch so that it is still announced downstream.
    pub fn batches(&self, batch_size: usize) -> Vec<&[Bytes]> {
        if self.items.is_empty() {
            return vec![&[]];
        }
        self.items.chunks(batch_size.max(1)).collect()
    }
}

/// Receiver of closed blocks. Must return immediately, delivery happens asynchronously.
pub trait BlockDistributor: Send + Sync {
    fn distribute(&self, block: Arc<BlockState>);
}

impl<T: BlockDistributor + ?Sized> BlockDistributor for Arc<T> {
    fn distribute(&self, block: Arc<BlockState>) {
        (**self).distribute(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches() {
        let mut block = BlockState::new(3);
        assert_eq!(block.batches(2), vec![&[] as &[Bytes]]);

        (0..5u8).for_each(|i| block.push(Bytes::from(vec![i])));
        let sizes = block.batches(2).iter().map(|batch| batch.len()).collect::<Vec<_>>();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(block.batches(256).len(), 1);

        let flattened = block.batches(3).concat();
        assert_eq!(flattened, block.items);
    }
}
