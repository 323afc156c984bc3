use crate::{BlockStream, SendError};
use blockstream_core::{debug, info, trace, warn};
use blockstream_nodedirectory::BlockNodeEndpoint;
use blockstream_wire::pb::{
    PublishStreamRequest, PublishStreamResponse, PublishStreamResponseCode, acknowledgement::Acknowledgements,
    publish_stream_response::Response,
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
    time::Duration,
};
use tokio::{
    select,
    sync::{
        mpsc::{Sender as MpscSender, UnboundedSender},
        oneshot::{Sender as OneshotSender, channel as oneshot_channel},
    },
    time::timeout,
};
use uuid::Uuid;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closed,
}

/// Notification sent to the owning manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The remote failed or completed the stream
    Closed { endpoint: BlockNodeEndpoint, id: ConnectionId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Local,
    RemoteError,
    RemoteCompleted,
}

struct ConnectionMutableState {
    state: ConnectionState,
    /// Dropped on close, which completes the client half of the stream
    outgoing: Option<MpscSender<PublishStreamRequest>>,
    /// Signals the receive loop to exit
    shutdown_signal: Option<OneshotSender<()>>,
}

/// One publish stream to one block node.
///
/// Active from construction until closed locally, failed remotely or completed remotely. All three
/// paths go through [`Connection::transition_to_closed`].
pub struct Connection {
    id: ConnectionId,
    endpoint: BlockNodeEndpoint,
    send_timeout: Duration,
    event_sender: UnboundedSender<ConnectionEvent>,
    mutable_state: Mutex<ConnectionMutableState>,
}

impl Display for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint)
    }
}

impl Connection {
    /// Wraps an open stream and spawns its receive loop. Must be called within a tokio runtime.
    pub fn new(
        endpoint: BlockNodeEndpoint,
        stream: BlockStream,
        send_timeout: Duration,
        event_sender: UnboundedSender<ConnectionEvent>,
    ) -> Arc<Self> {
        let BlockStream { outgoing, mut incoming } = stream;
        let (shutdown_sender, mut shutdown_receiver) = oneshot_channel();
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            endpoint,
            send_timeout,
            event_sender,
            mutable_state: Mutex::new(ConnectionMutableState {
                state: ConnectionState::Active,
                outgoing: Some(outgoing),
                shutdown_signal: Some(shutdown_sender),
            }),
        });

        let receiver = connection.clone();
        tokio::spawn(async move {
            let reason = loop {
                select! {
                    biased;
                    _ = &mut shutdown_receiver => break CloseReason::Local,
                    res = incoming.next() => match res {
                        Some(Ok(response)) => receiver.handle_response(response),
                        Some(Err(status)) => {
                            warn!("Block node {} stream error: {}", receiver, status);
                            break CloseReason::RemoteError;
                        }
                        None => {
                            info!("Block node {} completed the stream", receiver);
                            break CloseReason::RemoteCompleted;
                        }
                    }
                }
            };
            receiver.transition_to_closed(reason);
            trace!("Receive loop of connection {} to {} exited", receiver.id, receiver);
        });

        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &BlockNodeEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.mutable_state.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Gracefully closes the stream. Returns `false` if the connection was already closed.
    pub fn close(&self) -> bool {
        self.transition_to_closed(CloseReason::Local)
    }

    /// Enqueues a request on the outgoing stream.
    ///
    /// Returns `Ok(false)` without sending when the connection is already closed. A request is sent
    /// at most once, failures are not retried.
    pub async fn send_request(&self, request: PublishStreamRequest) -> Result<bool, SendError> {
        let Some(outgoing) = self.mutable_state.lock().outgoing.clone() else {
            return Ok(false);
        };
        match timeout(self.send_timeout, outgoing.send(request)).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(_)) => Err(SendError::ChannelClosed(self.endpoint.to_string())),
            Err(_) => Err(SendError::Timeout(self.endpoint.to_string())),
        }
    }

    fn handle_response(&self, response: PublishStreamResponse) {
        match response.response {
            Some(Response::Acknowledgement(ack)) => match ack.acknowledgements {
                Some(Acknowledgements::BlockAck(ack)) => info!(
                    "Block node {} acknowledged block {}{}",
                    self,
                    ack.block_number,
                    if ack.block_already_exists { " (already known)" } else { "" }
                ),
                Some(Acknowledgements::ItemAck(ack)) => debug!("Block node {} acknowledged items {:x?}", self, ack.items_hash.as_ref()),
                None => debug!("Block node {} sent an empty acknowledgement", self),
            },
            Some(Response::Status(end)) => match end.code() {
                PublishStreamResponseCode::StreamItemsUnknown => {
                    warn!("Block node {} ended the stream at block {} with unknown items", self, end.block_number)
                }
                code => info!("Block node {} ended the stream at block {} with status {:?}", self, end.block_number, code),
            },
            None => debug!("Block node {} sent an empty response", self),
        }
    }

    /// The single Active to Closed transition. Returns `true` for the call that performed it.
    fn transition_to_closed(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.mutable_state.lock();
            if state.state == ConnectionState::Closed {
                return false;
            }
            state.state = ConnectionState::Closed;
            state.outgoing = None;
            if let Some(signal) = state.shutdown_signal.take() {
                let _ = signal.send(());
            }
        }

        match reason {
            CloseReason::Local => debug!("Closed connection to block node {}", self),
            CloseReason::RemoteError | CloseReason::RemoteCompleted => {
                // The manager may already be gone during shutdown
                let _ = self.event_sender.send(ConnectionEvent::Closed { endpoint: self.endpoint.clone(), id: self.id });
            }
        }
        true
    }
}
