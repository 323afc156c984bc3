use crate::{BlockNodeConnector, BlockStream, ConnectionError};
use async_trait::async_trait;
use blockstream_nodedirectory::BlockNodeEndpoint;
use blockstream_wire::pb::{PublishStreamRequest, PublishStreamResponse};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::{
    Semaphore,
    mpsc::{self, UnboundedSender, unbounded_channel},
};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Block node side of an in-memory stream
pub(crate) struct MockRemote {
    pub requests: mpsc::Receiver<PublishStreamRequest>,
    pub responses: UnboundedSender<Result<PublishStreamResponse, tonic::Status>>,
}

pub(crate) fn mock_stream(outgoing_channel_size: usize) -> (BlockStream, MockRemote) {
    let (outgoing, requests) = mpsc::channel(outgoing_channel_size);
    let (responses, incoming) = unbounded_channel();
    (BlockStream { outgoing, incoming: UnboundedReceiverStream::new(incoming).boxed() }, MockRemote { requests, responses })
}

/// Connector handing out in-memory streams, with per endpoint refusal and an optional gate
/// holding every attempt until released
#[derive(Default)]
pub(crate) struct MockConnector {
    refused: Mutex<HashSet<BlockNodeEndpoint>>,
    remotes: Mutex<HashMap<BlockNodeEndpoint, MockRemote>>,
    attempts: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockConnector {
    pub fn refuse(&self, endpoint: &BlockNodeEndpoint) {
        self.refused.lock().insert(endpoint.clone());
    }

    pub fn accept(&self, endpoint: &BlockNodeEndpoint) {
        self.refused.lock().remove(endpoint);
    }

    /// Remote half of the latest stream opened to `endpoint`
    pub fn take_remote(&self, endpoint: &BlockNodeEndpoint) -> Option<MockRemote> {
        self.remotes.lock().remove(endpoint)
    }

    /// Blocks subsequent connect attempts until [`release`](Self::release)
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockNodeConnector for MockConnector {
    async fn connect(&self, endpoint: &BlockNodeEndpoint) -> Result<BlockStream, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // Closing the semaphore wakes every held attempt
            let _ = gate.acquire().await;
        }
        if self.refused.lock().contains(endpoint) {
            return Err(ConnectionError::Refused(endpoint.to_string()));
        }
        let (stream, remote) = mock_stream(64);
        self.remotes.lock().insert(endpoint.clone(), remote);
        Ok(stream)
    }
}
