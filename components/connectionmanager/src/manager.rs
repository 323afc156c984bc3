use crate::{BlockNodeConnector, Connection, ConnectionEvent, ConnectionId, ConnectionManagerConfig, MIN_NODE_RESELECTION_INTERVAL};
use blockstream_blocks::{BlockDistributor, BlockState};
use blockstream_core::{debug, info, trace, warn};
use blockstream_nodedirectory::{BlockNodeCatalog, BlockNodeEndpoint};
use blockstream_utils::triggers::SingleTrigger;
use blockstream_wire::pb::PublishStreamRequest;
use futures_util::future::join_all;
use itertools::Itertools;
use parking_lot::Mutex;
use rand::{seq::SliceRandom, thread_rng};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{
    select,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep, timeout, timeout_at},
};

/// Owns the active block node connections and streams every closed block to all of them.
///
/// The active map is the only membership state and is guarded by a single mutex which is never held
/// across network I/O. The backoff set has its own mutex, always taken after the active map.
pub struct ConnectionManager {
    catalog: BlockNodeCatalog,
    config: ConnectionManagerConfig,
    connector: Arc<dyn BlockNodeConnector>,
    active: Mutex<HashMap<BlockNodeEndpoint, Arc<Connection>>>,
    backoff: Mutex<HashSet<BlockNodeEndpoint>>,
    event_sender: UnboundedSender<ConnectionEvent>,
    distribution_sender: Mutex<Option<UnboundedSender<Arc<BlockState>>>>,
    distribution_worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_signal: SingleTrigger,
}

impl ConnectionManager {
    /// Creates the manager and spawns its event loop and distribution worker. Must be called within a
    /// tokio runtime. No connection is attempted until [`establish_connections`](Self::establish_connections)
    /// or [`wait_for_connection`](Self::wait_for_connection) is called or the first reselection tick fires.
    pub fn new(catalog: BlockNodeCatalog, mut config: ConnectionManagerConfig, connector: Arc<dyn BlockNodeConnector>) -> Arc<Self> {
        if config.node_reselection_interval < MIN_NODE_RESELECTION_INTERVAL {
            warn!(
                "Connection manager: node reselection interval {:?} is too short, using {:?}",
                config.node_reselection_interval, MIN_NODE_RESELECTION_INTERVAL
            );
            config.node_reselection_interval = MIN_NODE_RESELECTION_INTERVAL;
        }
        let (event_sender, event_receiver) = unbounded_channel();
        let (distribution_sender, distribution_receiver) = unbounded_channel();
        let manager = Arc::new(Self {
            catalog,
            config,
            connector,
            active: Default::default(),
            backoff: Default::default(),
            event_sender,
            distribution_sender: Mutex::new(Some(distribution_sender)),
            distribution_worker: Default::default(),
            shutdown_signal: SingleTrigger::new(),
        });
        manager.clone().start_event_loop(event_receiver);
        let worker = manager.clone().start_distribution_worker(distribution_receiver);
        *manager.distribution_worker.lock() = Some(worker);
        manager
    }

    pub fn config(&self) -> &ConnectionManagerConfig {
        &self.config
    }

    fn start_event_loop(self: Arc<Self>, mut events: UnboundedReceiver<ConnectionEvent>) {
        let period = self.config.node_reselection_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::spawn(async move {
            loop {
                if self.shutdown_signal.is_triggered() {
                    break;
                }
                select! {
                    biased;
                    _ = self.shutdown_signal.listener.clone() => break,
                    Some(event) = events.recv() => self.handle_event(event),
                    _ = ticker.tick() => self.perform_node_reselection().await,
                }
            }
            debug!("Connection manager event loop exiting");
        });
    }

    fn start_distribution_worker(self: Arc<Self>, mut blocks: UnboundedReceiver<Arc<BlockState>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            // Exits once the sender is dropped on shutdown and every queued block was handled
            while let Some(block) = blocks.recv().await {
                self.distribute_block(block).await;
            }
            debug!("Connection manager distribution worker exiting");
        })
    }

    fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Closed { endpoint, id } => {
                if self.handle_connection_error(&endpoint, id) {
                    info!("Connection manager: removed failed connection to block node {endpoint}");
                } else {
                    trace!("Connection manager: ignoring close of stale connection {id} to {endpoint}");
                }
            }
        }
    }

    /// Connects every eligible preferred node, then fills the free non-preferred slots with eligible
    /// non-preferred nodes in random order. Failed attempts are logged and retried on the next pass.
    pub async fn establish_connections(&self) {
        if self.shutdown_signal.is_triggered() {
            return;
        }

        let preferred = self.catalog.preferred_nodes().filter(|endpoint| self.is_eligible(endpoint)).cloned().collect_vec();
        if !preferred.is_empty() {
            debug!("Connection manager: connecting to {} preferred block nodes", preferred.len());
            join_all(preferred.iter().map(|endpoint| self.connect_to(endpoint))).await;
        }

        let mut candidates = self.catalog.non_preferred_nodes().filter(|endpoint| self.is_eligible(endpoint)).cloned().collect_vec();
        candidates.shuffle(&mut thread_rng());
        let mut candidates = candidates.into_iter();
        loop {
            if self.shutdown_signal.is_triggered() {
                return;
            }
            let available = self.available_non_preferred_slots();
            if available == 0 {
                break;
            }
            let round = candidates.by_ref().take(available).collect_vec();
            if round.is_empty() {
                break;
            }
            debug!(
                "Connection manager: {} non-preferred slots available, trying {}",
                available,
                round.iter().map(|endpoint| endpoint.to_string()).join(", ")
            );
            join_all(round.iter().map(|endpoint| self.connect_to(endpoint))).await;
        }

        // Separate statements, a guard temporary lives until the end of its statement
        let active = self.active.lock().len();
        let available = self.available_non_preferred_slots();
        info!(
            "Connection manager: {} active block node connections ({} non-preferred of at most {})",
            active,
            self.max_non_preferred() - available,
            self.max_non_preferred()
        );
    }

    async fn connect_to(&self, endpoint: &BlockNodeEndpoint) -> bool {
        debug!("Connection manager: connecting to block node {endpoint}");
        let stream = match self.connector.connect(endpoint).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Connection manager: failed connecting to block node {endpoint}: {err}");
                return false;
            }
        };

        let connection = Connection::new(endpoint.clone(), stream, self.config.send_timeout, self.event_sender.clone());
        if self.try_register(&connection) {
            info!("Connection manager: connected to block node {} (priority {})", endpoint, endpoint.priority);
            true
        } else {
            debug!("Connection manager: dropping surplus connection to block node {endpoint}");
            connection.close();
            false
        }
    }

    /// Inserts a fresh connection unless the manager is shut down or the endpoint is already connected,
    /// backed off or out of slots
    fn try_register(&self, connection: &Arc<Connection>) -> bool {
        let endpoint = connection.endpoint();
        let mut active = self.active.lock();
        // Checked under the lock, so shutdown's drain cannot miss a connection registered concurrently
        if self.shutdown_signal.is_triggered() {
            return false;
        }
        if active.contains_key(endpoint) || self.backoff.lock().contains(endpoint) || !connection.is_active() {
            return false;
        }
        if !endpoint.is_preferred() && Self::count_non_preferred(&active) >= self.max_non_preferred() {
            return false;
        }
        active.insert(endpoint.clone(), connection.clone());
        true
    }

    fn is_eligible(&self, endpoint: &BlockNodeEndpoint) -> bool {
        !self.active.lock().contains_key(endpoint) && !self.backoff.lock().contains(endpoint)
    }

    fn max_non_preferred(&self) -> usize {
        self.config.max_simultaneous_connections
    }

    fn count_non_preferred(active: &HashMap<BlockNodeEndpoint, Arc<Connection>>) -> usize {
        active.keys().filter(|endpoint| !endpoint.is_preferred()).count()
    }

    /// Non-preferred slots left. Every removal path frees its slot.
    pub fn available_non_preferred_slots(&self) -> usize {
        self.max_non_preferred().saturating_sub(Self::count_non_preferred(&self.active.lock()))
    }

    /// Drops every non-preferred connection and selects again. Preferred connections are left untouched.
    pub async fn perform_node_reselection(&self) {
        let mut dropped = Vec::new();
        self.active.lock().retain(|endpoint, connection| {
            if endpoint.is_preferred() {
                return true;
            }
            dropped.push(connection.clone());
            false
        });
        info!("Connection manager: reselecting block nodes, disconnecting {} non-preferred", dropped.len());
        dropped.iter().for_each(|connection| {
            connection.close();
        });
        self.establish_connections().await;
    }

    /// Removes the failed connection `id` from the active set. Does not reconnect.
    ///
    /// Returns `false` if `endpoint` is not connected or is connected through a newer connection.
    pub fn handle_connection_error(&self, endpoint: &BlockNodeEndpoint, id: ConnectionId) -> bool {
        let mut active = self.active.lock();
        match active.get(endpoint) {
            Some(connection) if connection.id() == id => active.remove(endpoint).is_some(),
            _ => false,
        }
    }

    /// Removes and gracefully closes the connection to `endpoint`, if any
    pub fn disconnect_from_node(&self, endpoint: &BlockNodeEndpoint) -> bool {
        let removed = self.active.lock().remove(endpoint);
        match removed {
            Some(connection) => {
                info!("Connection manager: disconnecting from block node {endpoint}");
                connection.close();
                true
            }
            None => false,
        }
    }

    /// Excludes `endpoint` from selection until [`remove_node_from_backoff`](Self::remove_node_from_backoff),
    /// closing its connection if there is one
    pub fn add_node_in_backoff(&self, endpoint: &BlockNodeEndpoint) {
        let removed = {
            let mut active = self.active.lock();
            self.backoff.lock().insert(endpoint.clone());
            active.remove(endpoint)
        };
        info!("Connection manager: block node {endpoint} is in backoff");
        if let Some(connection) = removed {
            connection.close();
        }
    }

    pub fn remove_node_from_backoff(&self, endpoint: &BlockNodeEndpoint) -> bool {
        let removed = self.backoff.lock().remove(endpoint);
        if removed {
            info!("Connection manager: block node {endpoint} left backoff");
        }
        removed
    }

    pub fn is_in_backoff(&self, endpoint: &BlockNodeEndpoint) -> bool {
        self.backoff.lock().contains(endpoint)
    }

    /// Selects block nodes and polls until at least one connection is active.
    ///
    /// Returns `false` when `deadline` elapses first or the manager shuts down meanwhile.
    pub async fn wait_for_connection(&self, deadline: Duration) -> bool {
        let wait = async {
            self.establish_connections().await;
            while self.active.lock().is_empty() {
                sleep(self.config.wait_poll_interval).await;
            }
        };
        select! {
            res = timeout_at(Instant::now() + deadline, wait) => res.is_ok() && !self.shutdown_signal.is_triggered(),
            _ = self.shutdown_signal.listener.clone() => false,
        }
    }

    async fn distribute_block(&self, block: Arc<BlockState>) {
        // Snapshot, the lock is released before any send
        let connections = self.active_connections();
        if connections.is_empty() {
            debug!("Connection manager: no active block node connection, block {} is not streamed", block.block_number);
            return;
        }

        let requests = block.batches(self.config.block_item_batch_size).into_iter().map(PublishStreamRequest::from_items).collect_vec();
        trace!(
            "Connection manager: streaming block {} as {} requests to {} block nodes",
            block.block_number,
            requests.len(),
            connections.len()
        );

        let (block_number, requests) = (block.block_number, &requests);
        join_all(connections.iter().map(|connection| async move {
            for request in requests.iter() {
                match connection.send_request(request.clone()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("Connection manager: connection to {} closed while streaming block {}", connection, block_number);
                        return;
                    }
                    Err(err) => {
                        warn!("Connection manager: failed streaming block {} to {}: {}", block_number, connection, err);
                        return;
                    }
                }
            }
        }))
        .await;
    }

    /// Stops the reselection loop, waits a bounded time for queued distributions and closes every connection
    pub async fn shutdown(&self) {
        if self.shutdown_signal.is_triggered() {
            return;
        }
        self.shutdown_signal.trigger.trigger();

        drop(self.distribution_sender.lock().take());
        let worker = self.distribution_worker.lock().take();
        if let Some(worker) = worker {
            if timeout(self.config.shutdown_timeout, worker).await.is_err() {
                warn!("Connection manager: pending block distributions did not complete within {:?}", self.config.shutdown_timeout);
            }
        }

        let connections = self.active.lock().drain().map(|(_, connection)| connection).collect_vec();
        for connection in connections.iter() {
            connection.close();
        }
        info!("Connection manager: shut down, closed {} block node connections", connections.len());
    }

    pub fn active_connections(&self) -> Vec<Arc<Connection>> {
        self.active.lock().values().cloned().collect()
    }

    pub fn active_endpoints(&self) -> Vec<BlockNodeEndpoint> {
        self.active.lock().keys().cloned().collect()
    }

    pub fn connection(&self, endpoint: &BlockNodeEndpoint) -> Option<Arc<Connection>> {
        self.active.lock().get(endpoint).cloned()
    }

    pub fn is_active(&self, endpoint: &BlockNodeEndpoint) -> bool {
        self.active.lock().contains_key(endpoint)
    }
}

impl BlockDistributor for ConnectionManager {
    /// Queues the block for the distribution worker and returns immediately
    fn distribute(&self, block: Arc<BlockState>) {
        let queued = match self.distribution_sender.lock().as_ref() {
            Some(sender) => sender.send(block.clone()).is_ok(),
            None => false,
        };
        if !queued {
            warn!("Connection manager: shut down, block {} is not streamed", block.block_number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionState, mock::MockConnector};
    use blockstream_blocks::{BlockItemWriter, GrpcBlockItemWriter};
    use blockstream_core::log::try_init_logger;
    use bytes::Bytes;

    fn tier1() -> BlockNodeEndpoint {
        BlockNodeEndpoint::new("tier1", 8080, 1)
    }

    fn tier2(count: usize) -> Vec<BlockNodeEndpoint> {
        (0..count).map(|i| BlockNodeEndpoint::new(format!("tier2-{i}"), 8080, 2)).collect()
    }

    fn manager(nodes: Vec<BlockNodeEndpoint>, max: usize, batch_size: usize) -> (Arc<ConnectionManager>, Arc<MockConnector>) {
        manager_with(nodes, max, batch_size, |_| {})
    }

    fn manager_with(
        nodes: Vec<BlockNodeEndpoint>,
        max: usize,
        batch_size: usize,
        configure: impl FnOnce(&mut ConnectionManagerConfig),
    ) -> (Arc<ConnectionManager>, Arc<MockConnector>) {
        try_init_logger("info,blockstream_connectionmanager=debug");
        let catalog = BlockNodeCatalog::new(nodes, max, Duration::from_secs(3600), batch_size).unwrap();
        let mut config = ConnectionManagerConfig { wait_poll_interval: Duration::from_millis(5), ..ConnectionManagerConfig::from_catalog(&catalog) };
        configure(&mut config);
        let connector = Arc::new(MockConnector::default());
        (ConnectionManager::new(catalog, config, connector.clone()), connector)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition was not met in time");
    }

    fn non_preferred_active(manager: &ConnectionManager) -> Vec<BlockNodeEndpoint> {
        manager.active_endpoints().into_iter().filter(|endpoint| !endpoint.is_preferred()).collect()
    }

    #[tokio::test]
    async fn test_preferred_plus_bounded_non_preferred() {
        let tier2 = tier2(3);
        let (manager, _connector) = manager([vec![tier1()], tier2.clone()].concat(), 1, 256);

        assert!(manager.wait_for_connection(Duration::from_secs(1)).await);
        assert!(manager.is_active(&tier1()));
        let selected = non_preferred_active(&manager);
        assert_eq!(selected.len(), 1);
        assert!(tier2.contains(&selected[0]));
        assert_eq!(manager.available_non_preferred_slots(), 0);

        let preferred_id = manager.connection(&tier1()).unwrap().id();
        let previous = manager.connection(&selected[0]).unwrap();

        manager.perform_node_reselection().await;
        assert_eq!(manager.connection(&tier1()).unwrap().id(), preferred_id);
        assert_eq!(non_preferred_active(&manager).len(), 1);
        assert_eq!(previous.state(), ConnectionState::Closed);
        assert!(manager.active_connections().iter().all(|connection| connection.id() != previous.id()));

        manager.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_selection_completes_with_info_logging() {
        let tier2 = tier2(2);
        let (manager, _connector) = manager([vec![tier1()], tier2].concat(), 1, 256);
        assert!(log::log_enabled!(target: "blockstream_connectionmanager::manager", log::Level::Info));

        // Selection runs on a worker so a blocked lock cannot stall the timeout below
        let selection = tokio::spawn({
            let manager = manager.clone();
            async move {
                manager.establish_connections().await;
                manager.perform_node_reselection().await;
            }
        });
        timeout(Duration::from_secs(5), selection).await.expect("selection did not complete").unwrap();
        assert_eq!(manager.active_connections().len(), 2);
        assert_eq!(manager.available_non_preferred_slots(), 0);
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reselection_tick() {
        let tier2 = tier2(3);
        let (manager, _connector) =
            manager_with([vec![tier1()], tier2.clone()].concat(), 1, 256, |config| config.node_reselection_interval = Duration::from_secs(10));
        manager.establish_connections().await;
        let preferred_id = manager.connection(&tier1()).unwrap().id();
        let selected = non_preferred_active(&manager);
        assert_eq!(selected.len(), 1);
        let previous = manager.connection(&selected[0]).unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(previous.is_active());
        assert!(manager.is_active(&selected[0]));

        // Crosses the first tick
        tokio::time::advance(Duration::from_secs(6)).await;
        wait_until(|| previous.state() == ConnectionState::Closed && non_preferred_active(&manager).len() == 1).await;

        assert_eq!(manager.connection(&tier1()).unwrap().id(), preferred_id);
        let reselected = non_preferred_active(&manager);
        assert_eq!(reselected.len(), 1);
        assert!(tier2.contains(&reselected[0]));
        assert_ne!(manager.connection(&reselected[0]).unwrap().id(), previous.id());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_reselection_interval_is_raised() {
        let (manager, _connector) = manager_with(vec![tier1()], 0, 256, |config| config.node_reselection_interval = Duration::ZERO);
        assert_eq!(manager.config().node_reselection_interval, MIN_NODE_RESELECTION_INTERVAL);
        assert!(manager.wait_for_connection(Duration::from_secs(1)).await);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_completing_after_shutdown_is_dropped() {
        let (manager, connector) = manager(vec![tier1()], 0, 256);
        connector.hold();
        let selection = tokio::spawn({
            let manager = manager.clone();
            async move { manager.establish_connections().await }
        });
        wait_until(|| connector.attempts() == 1).await;

        manager.shutdown().await;
        connector.release();
        selection.await.unwrap();

        assert!(manager.active_connections().is_empty());
        assert!(!manager.is_active(&tier1()));
        // The late stream was closed rather than registered
        let mut remote = connector.take_remote(&tier1()).unwrap();
        assert_eq!(remote.requests.recv().await, None);
    }

    #[tokio::test]
    async fn test_membership_bound_under_concurrent_selection() {
        let (manager, connector) = manager(tier2(6), 2, 256);

        join_all((0..4).map(|_| manager.establish_connections())).await;
        assert_eq!(manager.active_connections().len(), 2);
        assert_eq!(manager.available_non_preferred_slots(), 0);

        // At most one connection per endpoint, every surplus stream was closed
        let endpoints = manager.active_endpoints().into_iter().collect::<HashSet<_>>();
        assert_eq!(endpoints.len(), 2);
        assert!(connector.attempts() >= 2);

        manager.establish_connections().await;
        assert_eq!(manager.active_connections().len(), 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_connect_stays_eligible() {
        let tier2 = tier2(2);
        let (manager, connector) = manager([vec![tier1()], tier2.clone()].concat(), 2, 256);
        connector.refuse(&tier1());
        connector.refuse(&tier2[0]);

        manager.establish_connections().await;
        assert_eq!(manager.active_endpoints(), vec![tier2[1].clone()]);
        assert!(!manager.is_in_backoff(&tier1()));
        assert_eq!(manager.available_non_preferred_slots(), 1);

        connector.accept(&tier1());
        connector.accept(&tier2[0]);
        manager.establish_connections().await;
        assert_eq!(manager.active_connections().len(), 3);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_failure_frees_slot() {
        let tier2 = tier2(1);
        let (manager, connector) = manager(tier2.clone(), 1, 256);
        manager.establish_connections().await;
        assert!(manager.is_active(&tier2[0]));

        let remote = connector.take_remote(&tier2[0]).unwrap();
        remote.responses.send(Err(tonic::Status::unavailable("restarting"))).unwrap();
        wait_until(|| !manager.is_active(&tier2[0])).await;
        assert_eq!(manager.available_non_preferred_slots(), 1);

        manager.establish_connections().await;
        assert!(manager.is_active(&tier2[0]));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_failure_keeps_newer_connection() {
        let (manager, _connector) = manager(vec![tier1()], 0, 256);
        manager.establish_connections().await;
        let first = manager.connection(&tier1()).unwrap();

        assert!(manager.disconnect_from_node(&tier1()));
        assert!(!manager.disconnect_from_node(&tier1()));
        manager.establish_connections().await;
        let second = manager.connection(&tier1()).unwrap();
        assert_ne!(first.id(), second.id());

        assert!(!manager.handle_connection_error(&tier1(), first.id()));
        assert!(manager.is_active(&tier1()));
        assert!(manager.handle_connection_error(&tier1(), second.id()));
        assert!(!manager.is_active(&tier1()));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_backoff() {
        let tier2 = tier2(2);
        let (manager, _connector) = manager([vec![tier1()], tier2.clone()].concat(), 2, 256);
        manager.establish_connections().await;
        assert_eq!(manager.active_connections().len(), 3);

        let connection = manager.connection(&tier2[0]).unwrap();
        manager.add_node_in_backoff(&tier2[0]);
        manager.add_node_in_backoff(&tier1());
        assert!(manager.is_in_backoff(&tier2[0]));
        assert!(!manager.is_active(&tier2[0]) && !manager.is_active(&tier1()));
        assert!(!connection.is_active());

        manager.perform_node_reselection().await;
        assert_eq!(manager.active_endpoints(), vec![tier2[1].clone()]);

        assert!(manager.remove_node_from_backoff(&tier2[0]));
        assert!(!manager.remove_node_from_backoff(&tier2[0]));
        manager.remove_node_from_backoff(&tier1());
        manager.establish_connections().await;
        assert_eq!(manager.active_connections().len(), 3);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_distribution_batches_in_order() {
        let tier2 = tier2(1);
        let (manager, connector) = manager([vec![tier1()], tier2.clone()].concat(), 1, 2);
        manager.establish_connections().await;
        let mut remotes = [tier1(), tier2[0].clone()].map(|endpoint| connector.take_remote(&endpoint).unwrap());

        let items = (0..5u8).map(|i| Bytes::from(vec![i])).collect_vec();
        manager.distribute(Arc::new(BlockState { block_number: 9, items: items.clone() }));
        manager.distribute(Arc::new(BlockState::new(10)));

        for remote in remotes.iter_mut() {
            let mut received = Vec::new();
            for _ in 0..3 {
                let request = remote.requests.recv().await.unwrap();
                received.push(request.block_items.unwrap().block_items);
            }
            assert_eq!(received.iter().map(Vec::len).collect_vec(), vec![2, 2, 1]);
            assert_eq!(received.concat(), items);

            // The empty block goes out as a single empty item set
            let empty = remote.requests.recv().await.unwrap();
            assert_eq!(empty.block_items, Some(Default::default()));
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_connection_does_not_block_others() {
        let tier2 = tier2(1);
        let (manager, connector) = manager([vec![tier1()], tier2.clone()].concat(), 1, 1);
        manager.establish_connections().await;
        let mut healthy = connector.take_remote(&tier1()).unwrap();
        // Dropping the remote closes its request channel
        drop(connector.take_remote(&tier2[0]).unwrap());

        manager.distribute(Arc::new(BlockState { block_number: 1, items: vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")] }));
        assert_eq!(healthy.requests.recv().await.unwrap().item_count(), 1);
        assert_eq!(healthy.requests.recv().await.unwrap().item_count(), 1);
        wait_until(|| !manager.is_active(&tier2[0])).await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_block_is_fire_and_forget() {
        let (manager, _connector) = manager(tier2(1), 1, 256);
        let mut writer = GrpcBlockItemWriter::new(manager.clone());

        // No connection at all
        writer.open_block(0).unwrap();
        writer.write_item(Bytes::from_static(b"header")).unwrap();
        writer.close_block().unwrap();

        writer.open_block(1).unwrap();
        writer.close_block().unwrap();
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_for_connection_timeout() {
        let tier2 = tier2(2);
        let (manager, connector) = manager(tier2.clone(), 1, 256);
        tier2.iter().for_each(|endpoint| connector.refuse(endpoint));
        assert!(!manager.wait_for_connection(Duration::from_millis(50)).await);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown() {
        let tier2 = tier2(1);
        let (manager, connector) = manager([vec![tier1()], tier2.clone()].concat(), 1, 256);
        assert!(manager.wait_for_connection(Duration::from_secs(1)).await);
        let connections = manager.active_connections();
        let mut remote = connector.take_remote(&tier1()).unwrap();

        manager.distribute(Arc::new(BlockState { block_number: 4, items: vec![Bytes::from_static(b"last")] }));
        manager.shutdown().await;

        // Queued blocks are drained before the connections are closed
        assert_eq!(remote.requests.recv().await.unwrap().item_count(), 1);
        assert_eq!(remote.requests.recv().await, None);
        assert!(connections.iter().all(|connection| !connection.is_active()));
        assert!(manager.active_connections().is_empty());

        manager.distribute(Arc::new(BlockState::new(5)));
        manager.establish_connections().await;
        assert!(manager.active_connections().is_empty());
        assert!(!manager.wait_for_connection(Duration::from_millis(20)).await);
        manager.shutdown().await;
    }
}
