//! Assembly of block items and their hand-off to distribution.
//!
//! The execution pipeline drives a [`BlockItemWriter`]: `open_block`, any number of `write_item`,
//! then `close_block`. Closing freezes the assembled [`BlockState`] and hands it to a
//! [`BlockDistributor`] without waiting for any remote delivery.

mod block;
mod errors;
mod producer;
mod writer;

pub use block::{BlockDistributor, BlockState};
pub use errors::{WriterError, WriterResult};
pub use producer::BlockStreamProducer;
pub use writer::{BlockItemWriter, GrpcBlockItemWriter};
