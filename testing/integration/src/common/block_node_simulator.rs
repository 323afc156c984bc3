use blockstream_core::{debug, info, warn};
use blockstream_hashes::hash_leaf;
use blockstream_nodedirectory::BlockNodeEndpoint;
use blockstream_wire::pb::{
    PublishStreamRequest, PublishStreamResponse, PublishStreamResponseCode,
    block_stream_service_server::{BlockStreamService, BlockStreamServiceServer},
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
};
use tokio_stream::{
    StreamExt,
    wrappers::{ReceiverStream, TcpListenerStream},
};
use tonic::{Request, Response, Status, Streaming, transport::Server};

type ResponseSender = mpsc::Sender<Result<PublishStreamResponse, Status>>;

#[derive(Default)]
struct SimulatorState {
    /// Every request received, across all streams, in arrival order
    received: Mutex<Vec<PublishStreamRequest>>,
    /// Response halves of the open streams
    streams: Mutex<Vec<ResponseSender>>,
}

struct SimulatorService {
    state: Arc<SimulatorState>,
}

#[tonic::async_trait]
impl BlockStreamService for SimulatorService {
    #[allow(non_camel_case_types)]
    type publishBlockStreamStream = ReceiverStream<Result<PublishStreamResponse, Status>>;

    async fn publish_block_stream(
        &self,
        request: Request<Streaming<PublishStreamRequest>>,
    ) -> Result<Response<Self::publishBlockStreamStream>, Status> {
        let mut incoming = request.into_inner();
        let (responses, response_receiver) = mpsc::channel(128);
        // The state keeps the only strong sender so that `end_streams` can complete the stream
        let weak_responses = responses.downgrade();
        self.state.streams.lock().push(responses);

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(message) = incoming.next().await {
                match message {
                    Ok(request) => {
                        let items = request.block_items.as_ref().map(|set| set.block_items.concat()).unwrap_or_default();
                        let items_hash = Bytes::copy_from_slice(hash_leaf(&items).as_bytes());
                        state.received.lock().push(request);
                        let Some(responses) = weak_responses.upgrade() else { break };
                        if responses.send(Ok(PublishStreamResponse::item_ack(items_hash))).await.is_err() {
                            break;
                        }
                    }
                    Err(status) => {
                        warn!("Block node simulator: publisher stream failed: {status}");
                        break;
                    }
                }
            }
            debug!("Block node simulator: publisher stream ended");
        });

        Ok(Response::new(ReceiverStream::new(response_receiver)))
    }
}

/// In-process block node serving `publishBlockStream` on a random local port
pub struct BlockNodeSimulator {
    address: SocketAddr,
    state: Arc<SimulatorState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl BlockNodeSimulator {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let state = Arc::new(SimulatorState::default());
        let (shutdown, shutdown_receiver) = oneshot::channel::<()>();

        let service = BlockStreamServiceServer::new(SimulatorService { state: state.clone() });
        tokio::spawn(async move {
            let res = Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = shutdown_receiver.await;
                })
                .await;
            if let Err(err) = res {
                warn!("Block node simulator: server error: {err}");
            }
        });
        info!("Block node simulator listening on {address}");
        Self { address, state, shutdown: Some(shutdown) }
    }

    pub fn endpoint(&self, priority: u32) -> BlockNodeEndpoint {
        BlockNodeEndpoint::new(self.address.ip().to_string(), self.address.port(), priority)
    }

    pub fn received(&self) -> Vec<PublishStreamRequest> {
        self.state.received.lock().clone()
    }

    /// All received block items, flattened in arrival order
    pub fn received_items(&self) -> Vec<Bytes> {
        self.received().into_iter().filter_map(|request| request.block_items).flat_map(|set| set.block_items).collect()
    }

    /// Sends an end-of-stream status on every open stream and completes them
    pub async fn end_streams(&self, code: PublishStreamResponseCode, block_number: u64) {
        let streams = std::mem::take(&mut *self.state.streams.lock());
        for stream in streams {
            let _ = stream.send(Ok(PublishStreamResponse::end_of_stream(code, block_number))).await;
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for BlockNodeSimulator {
    fn drop(&mut self) {
        self.shutdown()
    }
}
