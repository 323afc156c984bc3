//! Wire protocol spoken between a block stream publisher and block nodes.

// The rpc keeps its wire name `publishBlockStream`, which names the generated stream type
#[allow(non_camel_case_types)]
pub mod pb {
    tonic::include_proto!("com.hedera.hapi.block");
}

use bytes::Bytes;
use pb::{
    Acknowledgement, BlockAcknowledgement, BlockItemSet, EndOfStream, ItemAcknowledgement, PublishStreamRequest,
    PublishStreamResponse, PublishStreamResponseCode, acknowledgement::Acknowledgements, publish_stream_response::Response,
};

impl PublishStreamRequest {
    /// A request carrying one ordered batch of serialized block items
    pub fn from_items(items: &[Bytes]) -> Self {
        Self { block_items: Some(BlockItemSet { block_items: items.to_vec() }) }
    }

    pub fn item_count(&self) -> usize {
        self.block_items.as_ref().map_or(0, |set| set.block_items.len())
    }
}

impl PublishStreamResponse {
    pub fn block_ack(block_number: u64, block_root_hash: Bytes, block_already_exists: bool) -> Self {
        Self::acknowledgement(Acknowledgements::BlockAck(BlockAcknowledgement { block_number, block_root_hash, block_already_exists }))
    }

    pub fn item_ack(items_hash: Bytes) -> Self {
        Self::acknowledgement(Acknowledgements::ItemAck(ItemAcknowledgement { items_hash }))
    }

    pub fn end_of_stream(status: PublishStreamResponseCode, block_number: u64) -> Self {
        Self { response: Some(Response::Status(EndOfStream { status: status as i32, block_number })) }
    }

    fn acknowledgement(ack: Acknowledgements) -> Self {
        Self { response: Some(Response::Acknowledgement(Acknowledgement { acknowledgements: Some(ack) })) }
    }
}

impl EndOfStream {
    /// Decoded status code, unknown values map to [`PublishStreamResponseCode::StreamItemsUnknown`]
    pub fn code(&self) -> PublishStreamResponseCode {
        PublishStreamResponseCode::try_from(self.status).unwrap_or(PublishStreamResponseCode::StreamItemsUnknown)
    }
}
