use crate::ConnectionError;
use async_trait::async_trait;
use blockstream_core::trace;
use blockstream_nodedirectory::BlockNodeEndpoint;
use blockstream_wire::pb::{PublishStreamRequest, PublishStreamResponse, block_stream_service_client::BlockStreamServiceClient};
use futures_util::{StreamExt, stream::BoxStream};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Both halves of an open publish stream
pub struct BlockStream {
    pub outgoing: mpsc::Sender<PublishStreamRequest>,
    pub incoming: BoxStream<'static, Result<PublishStreamResponse, tonic::Status>>,
}

/// Opens publish streams to block nodes
#[async_trait]
pub trait BlockNodeConnector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &BlockNodeEndpoint) -> Result<BlockStream, ConnectionError>;
}

/// Connects over gRPC with the `publishBlockStream` bidirectional call
#[derive(Debug, Clone)]
pub struct GrpcBlockNodeConnector {
    connect_timeout: Duration,
    keep_alive: Duration,
    outgoing_channel_size: usize,
}

impl GrpcBlockNodeConnector {
    pub fn new(connect_timeout: Duration, keep_alive: Duration, outgoing_channel_size: usize) -> Self {
        Self { connect_timeout, keep_alive, outgoing_channel_size }
    }
}

impl Default for GrpcBlockNodeConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10), 256)
    }
}

#[async_trait]
impl BlockNodeConnector for GrpcBlockNodeConnector {
    async fn connect(&self, endpoint: &BlockNodeEndpoint) -> Result<BlockStream, ConnectionError> {
        trace!("Opening gRPC channel to block node {endpoint}");
        let channel = tonic::transport::Endpoint::new(endpoint.uri())?
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(Some(self.keep_alive))
            .connect()
            .await?;
        let mut client = BlockStreamServiceClient::new(channel);

        let (outgoing, outgoing_receiver) = mpsc::channel(self.outgoing_channel_size);
        let incoming = client.publish_block_stream(ReceiverStream::new(outgoing_receiver)).await?.into_inner();
        Ok(BlockStream { outgoing, incoming: incoming.boxed() })
    }
}
