//! The [`RelayEngine`].

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dedup::DedupCache;
use super::error::{RelayError, RelayResult};
use super::transport::Transport;
use super::types::{InboundFrame, RelayAction};
use crate::clock::{duration_millis, now_millis};
use crate::config::NodeConfig;
use crate::envelope::Envelope;
use crate::routing::RoutingTable;

/// Processes inbound envelopes and relays them across transports.
///
/// The engine is shared behind an `Arc`: the inbound pump, the secure
/// channel and the embedding application all call into the same instance.
///
/// # Example
///
/// ```rust,ignore
/// let engine = Arc::new(RelayEngine::new(keypair.address(), NodeConfig::default()));
/// engine.register_transport(Arc::new(my_transport)).await;
/// let pump = engine.start().await?;
///
/// let mut deliveries = engine.subscribe();
/// while let Ok(envelope) = deliveries.recv().await {
///     println!("from {}: {:?}", envelope.from(), envelope.payload());
/// }
/// ```
pub struct RelayEngine {
    /// Address of this node.
    address: String,

    config: NodeConfig,

    /// Edges learned from envelope paths.
    routing: Arc<RwLock<RoutingTable>>,

    /// Ids of recently processed envelopes.
    dedup: Mutex<DedupCache>,

    /// Every transport handed to the engine.
    registered: Mutex<Vec<Arc<dyn Transport>>>,

    /// Transports that initialized successfully.
    active: RwLock<Vec<Arc<dyn Transport>>>,

    /// Envelopes addressed to this node.
    deliveries: broadcast::Sender<Envelope>,

    inbound_tx: mpsc::Sender<InboundFrame>,

    /// Taken by the pump on start.
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
}

impl RelayEngine {
    /// Creates an engine for the node at `address`.
    #[must_use]
    pub fn new(address: impl Into<String>, config: NodeConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));
        let (deliveries, _) = broadcast::channel(config.event_buffer.max(1));
        let routing = RoutingTable::new(config.route_expiration);

        Self {
            address: address.into(),
            config,
            routing: Arc::new(RwLock::new(routing)),
            dedup: Mutex::new(DedupCache::new()),
            registered: Mutex::new(Vec::new()),
            active: RwLock::new(Vec::new()),
            deliveries,
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    /// Returns the local address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Returns the shared routing table.
    #[must_use]
    pub fn routing(&self) -> Arc<RwLock<RoutingTable>> {
        Arc::clone(&self.routing)
    }

    /// Returns a sender that feeds the inbound queue directly.
    #[must_use]
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundFrame> {
        self.inbound_tx.clone()
    }

    /// Subscribes to envelopes delivered to this node.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.deliveries.subscribe()
    }

    /// Returns true once [`start`](Self::start) has run.
    pub async fn is_started(&self) -> bool {
        self.inbound_rx.lock().await.is_none()
    }

    // ==================== Lifecycle ====================

    /// Adds a transport.
    ///
    /// Transports registered after [`start`](Self::start) are initialized
    /// immediately.
    pub async fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.registered.lock().await.push(Arc::clone(&transport));
        if self.is_started().await {
            self.init_transport(transport).await;
        }
    }

    /// Returns the names of the transports that initialized successfully.
    pub async fn active_transports(&self) -> Vec<String> {
        self.active
            .read()
            .await
            .iter()
            .map(|transport| transport.name().to_string())
            .collect()
    }

    /// Initializes every registered transport and spawns the inbound pump.
    ///
    /// Frames are processed one at a time in arrival order. Drops are
    /// logged; the pump runs until the returned handle is aborted.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyStarted`] if called twice.
    pub async fn start(self: &Arc<Self>) -> RelayResult<JoinHandle<()>> {
        let mut inbound = self
            .inbound_rx
            .lock()
            .await
            .take()
            .ok_or(RelayError::AlreadyStarted)?;

        let registered = self.registered.lock().await.clone();
        for transport in registered {
            self.init_transport(transport).await;
        }

        let transports = self.active.read().await.len();
        info!(address = %self.address, transports, "Relay engine started");

        let engine = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                match engine.process(&frame.bytes, frame.origin.as_deref()).await {
                    Ok(action) => debug!(?action, "Envelope processed"),
                    Err(e) if e.is_drop() => debug!(error = %e, "Envelope dropped"),
                    Err(e) => warn!(error = %e, "Envelope relay failed"),
                }
            }
            debug!("Inbound queue closed");
        }))
    }

    async fn init_transport(&self, transport: Arc<dyn Transport>) {
        match transport.init(self.inbound_tx.clone()).await {
            Ok(()) => {
                info!(transport = transport.name(), "Transport initialized");
                self.active.write().await.push(transport);
            }
            Err(e) => {
                let error = RelayError::ProviderInitFailure {
                    name: transport.name().to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %error, "Transport excluded");
            }
        }
    }

    // ==================== Processing ====================

    /// Runs one encoded envelope through the processing pipeline.
    ///
    /// `origin` is the address of the peer the frame arrived from, if the
    /// transport knows it.
    ///
    /// # Errors
    ///
    /// Returns the reason the envelope was dropped, or a transport failure
    /// while forwarding it.
    pub async fn process(&self, bytes: &[u8], origin: Option<&str>) -> RelayResult<RelayAction> {
        self.maybe_sweep().await;

        let envelope = Envelope::from_bytes(bytes)?;
        self.process_envelope(envelope, origin).await
    }

    /// Runs a decoded envelope through the processing pipeline.
    ///
    /// # Errors
    ///
    /// See [`process`](Self::process).
    pub async fn process_envelope(
        &self,
        envelope: Envelope,
        origin: Option<&str>,
    ) -> RelayResult<RelayAction> {
        let now = now_millis();
        if envelope.is_expired_at(now, self.config.message_ttl) {
            return Err(RelayError::Expired);
        }
        if envelope.is_future_dated_at(now, self.config.max_clock_skew) {
            return Err(RelayError::FutureTimestamp);
        }

        let id = envelope.id()?;
        {
            let mut dedup = self.dedup.lock().await;
            if !dedup.insert(id.clone(), envelope.expires_at(self.config.message_ttl)) {
                return Err(RelayError::Duplicate(id));
            }
        }

        envelope.verify_signature()?;

        if envelope.from() == self.address {
            return Err(RelayError::SelfLoop);
        }

        self.learn_path(&envelope, origin).await;

        if envelope.to() == self.address {
            debug!(id = %id, from = %envelope.from(), hops = envelope.hops().len(), "Envelope delivered");
            if self.deliveries.send(envelope).is_err() {
                debug!(id = %id, "No delivery subscribers");
            }
            return Ok(RelayAction::Delivered);
        }

        self.relay(envelope, origin).await
    }

    /// Feeds the path the envelope took into the routing table.
    async fn learn_path(&self, envelope: &Envelope, origin: Option<&str>) {
        let mut path: Vec<String> = Vec::with_capacity(envelope.hops().len() + 3);
        if !envelope.has_hop(envelope.from()) {
            path.push(envelope.from().to_string());
        }
        path.extend(envelope.hops().iter().cloned());
        if let Some(peer) = origin {
            if !path.iter().any(|hop| hop == peer) {
                path.push(peer.to_string());
            }
        }
        if !path.iter().any(|hop| hop == &self.address) {
            path.push(self.address.clone());
        }

        self.routing.write().await.add_routes(&path);
    }

    async fn relay(&self, mut envelope: Envelope, origin: Option<&str>) -> RelayResult<RelayAction> {
        let max_hops = self.config.max_hops;
        let exclude: Vec<String> = origin.map(str::to_string).into_iter().collect();

        if envelope.expected_route().is_empty() {
            envelope.add_hop(&self.address, max_hops)?;
            self.flood(&envelope, &exclude).await;
            return Ok(RelayAction::Flooded);
        }

        if let Some(next_hop) = envelope.next_expected_route(&self.address).map(str::to_string) {
            envelope.add_hop(&self.address, max_hops)?;
            self.forward(&next_hop, &envelope).await?;
            return Ok(RelayAction::Forwarded { next_hop });
        }

        envelope.clear_expected_route();
        let route = self
            .routing
            .read()
            .await
            .find_shortest_routes(&self.address, envelope.to());
        envelope.add_hop(&self.address, max_hops)?;

        match route.get(1).cloned() {
            Some(next_hop) => {
                debug!(to = %envelope.to(), route = ?route, "Expected route repaired");
                envelope.update_expected_route(route.clone());
                self.forward(&next_hop, &envelope).await?;
                Ok(RelayAction::Rerouted { next_hop, route })
            }
            None => {
                debug!(to = %envelope.to(), "No route known, flooding");
                self.flood(&envelope, &exclude).await;
                Ok(RelayAction::Flooded)
            }
        }
    }

    async fn forward(&self, next_hop: &str, envelope: &Envelope) -> RelayResult<()> {
        if self.send_message(next_hop, envelope).await {
            Ok(())
        } else {
            Err(RelayError::Transport(format!("no live connection to {next_hop}")))
        }
    }

    /// Hands the envelope to every active transport, skipping `exclude`.
    async fn flood(&self, envelope: &Envelope, exclude: &[String]) {
        let active = self.active.read().await.clone();
        let results = join_all(
            active
                .iter()
                .map(|transport| transport.broadcast(envelope, exclude)),
        )
        .await;

        for (transport, result) in active.iter().zip(results) {
            if let Err(e) = result {
                warn!(transport = transport.name(), error = %e, "Broadcast failed");
            }
        }
    }

    // ==================== Sending ====================

    /// Sends a locally created envelope into the network.
    ///
    /// Sets the expected route from the routing table, records the local
    /// address as a hop, marks the envelope as seen and floods it to every
    /// active transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be hashed or the hop ceiling
    /// is already reached.
    pub async fn broadcast_message(&self, mut envelope: Envelope) -> RelayResult<()> {
        let route = self
            .routing
            .read()
            .await
            .find_shortest_routes(envelope.from(), envelope.to());
        envelope.update_expected_route(route);

        if !envelope.has_hop(&self.address) {
            envelope.add_hop(&self.address, self.config.max_hops)?;
        }

        let id = envelope.id()?;
        self.dedup
            .lock()
            .await
            .insert(id.clone(), envelope.expires_at(self.config.message_ttl));

        debug!(id = %id, to = %envelope.to(), route = ?envelope.expected_route(), "Broadcasting envelope");
        self.flood(&envelope, &[]).await;
        Ok(())
    }

    /// Sends the envelope to `address` through the first active transport
    /// with a live connection to it.
    ///
    /// Returns false if no transport is connected or the send failed.
    pub async fn send_message(&self, address: &str, envelope: &Envelope) -> bool {
        let active = self.active.read().await.clone();
        for transport in active {
            if !transport.has_connection(address).await {
                continue;
            }
            return match transport.send(address, envelope).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(transport = transport.name(), to = %address, error = %e, "Send failed");
                    false
                }
            };
        }
        debug!(to = %address, "No transport connected");
        false
    }

    // ==================== Maintenance ====================

    async fn maybe_sweep(&self) {
        let now = now_millis();
        let interval = duration_millis(self.config.dedup_sweep_interval);
        if self.dedup.lock().await.sweep_due(now, interval) {
            self.sweep_at(now).await;
        }
    }

    /// Forgets expired dedup entries and routing edges now.
    pub async fn sweep(&self) {
        self.sweep_at(now_millis()).await;
    }

    async fn sweep_at(&self, now: i64) {
        let removed = self.dedup.lock().await.sweep(now);
        self.routing.write().await.gc_at(now);
        if removed > 0 {
            debug!(removed, "Dedup cache swept");
        }
    }

    /// Returns the number of envelope ids currently remembered.
    pub async fn seen_count(&self) -> usize {
        self.dedup.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeKeypair;
    use crate::relay::{MemoryNetwork, MemoryTransport};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        keypair: NodeKeypair,
        engine: Arc<RelayEngine>,
        transport: Arc<MemoryTransport>,
        network: MemoryNetwork,
    }

    async fn harness(config: NodeConfig) -> Harness {
        let keypair = NodeKeypair::generate();
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.transport(keypair.address()));
        let engine = Arc::new(RelayEngine::new(keypair.address(), config));
        engine.register_transport(transport.clone()).await;
        let _pump = engine.start().await.unwrap();
        Harness {
            keypair,
            engine,
            transport,
            network,
        }
    }

    fn signed(sender: &NodeKeypair, to: &str) -> Envelope {
        let mut envelope = Envelope::plain(sender.address(), to, json!({"text": "hi"})).unwrap();
        envelope.sign(sender).unwrap();
        envelope
    }

    #[tokio::test]
    async fn delivers_envelope_addressed_to_self() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        let mut deliveries = h.engine.subscribe();

        let envelope = signed(&alice, &h.keypair.address());
        let action = h.engine.process(&envelope.to_bytes().unwrap(), None).await.unwrap();

        assert_eq!(action, RelayAction::Delivered);
        let delivered = deliveries.recv().await.unwrap();
        assert_eq!(delivered.from(), alice.address());
        assert!(h.transport.outgoing().await.is_empty());
    }

    #[tokio::test]
    async fn second_copy_is_duplicate() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        let mut deliveries = h.engine.subscribe();
        let bytes = signed(&alice, &h.keypair.address()).to_bytes().unwrap();

        h.engine.process(&bytes, None).await.unwrap();
        let result = h.engine.process(&bytes, None).await;

        assert!(matches!(result, Err(RelayError::Duplicate(_))));
        deliveries.recv().await.unwrap();
        assert!(deliveries.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_detection_ignores_routing_metadata() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        let envelope = signed(&alice, "cc");
        let mut rehopped = envelope.clone();
        rehopped.add_hop("dd", 8).unwrap();

        h.engine.process(&envelope.to_bytes().unwrap(), None).await.unwrap();
        let result = h.engine.process(&rehopped.to_bytes().unwrap(), None).await;
        assert!(matches!(result, Err(RelayError::Duplicate(_))));
    }

    #[tokio::test]
    async fn expired_envelope_dropped_even_when_unsigned() {
        let h = harness(NodeConfig::default().with_message_ttl(Duration::from_secs(60))).await;
        let envelope = Envelope::plain("aa", h.keypair.address(), json!(1))
            .unwrap()
            .with_timestamp(now_millis() - 61_000);

        let result = h.engine.process(&envelope.to_bytes().unwrap(), None).await;
        assert!(matches!(result, Err(RelayError::Expired)));
        assert_eq!(h.engine.seen_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_signature_dropped() {
        let h = harness(NodeConfig::default()).await;
        let envelope = Envelope::plain("aa", h.keypair.address(), json!(1)).unwrap();

        let result = h.engine.process(&envelope.to_bytes().unwrap(), None).await;
        assert!(matches!(
            result,
            Err(RelayError::Envelope(crate::envelope::EnvelopeError::InvalidSignature))
        ));
    }

    #[tokio::test]
    async fn unknown_type_dropped() {
        let h = harness(NodeConfig::default()).await;
        let result = h
            .engine
            .process(br#"{"type":"x","from":"aa","to":"bb"}"#, None)
            .await;
        assert!(matches!(
            result,
            Err(RelayError::Envelope(crate::envelope::EnvelopeError::UnknownMessageType(_)))
        ));
    }

    #[tokio::test]
    async fn self_loop_dropped_without_relay() {
        let h = harness(NodeConfig::default()).await;
        let envelope = signed(&h.keypair, "cc");

        let result = h.engine.process(&envelope.to_bytes().unwrap(), Some("bb")).await;
        assert!(matches!(result, Err(RelayError::SelfLoop)));
        assert!(h.transport.outgoing().await.is_empty());
    }

    #[tokio::test]
    async fn flood_excludes_origin_peer() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        let envelope = signed(&alice, "cc");

        let action = h
            .engine
            .process(&envelope.to_bytes().unwrap(), Some(&alice.address()))
            .await
            .unwrap();

        assert_eq!(action, RelayAction::Flooded);
        let broadcasts = h.transport.broadcasts().await;
        assert_eq!(broadcasts.len(), 1);
        let (relayed, exclude) = &broadcasts[0];
        assert_eq!(exclude, &vec![alice.address()]);
        assert_eq!(relayed.hops(), [h.keypair.address()]);
    }

    #[tokio::test]
    async fn learns_path_from_hops_and_origin() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        let mut envelope = signed(&alice, &h.keypair.address());
        envelope.add_hop(&alice.address(), 8).unwrap();
        envelope.add_hop("relay", 8).unwrap();

        h.engine
            .process(&envelope.to_bytes().unwrap(), Some("relay"))
            .await
            .unwrap();

        let routing = h.engine.routing();
        let table = routing.read().await;
        assert_eq!(
            table.find_shortest_routes(&alice.address(), &h.keypair.address()),
            vec![alice.address(), "relay".to_string(), h.keypair.address()]
        );
    }

    #[tokio::test]
    async fn follows_expected_route() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        h.network.link(&h.keypair.address(), "cc").await;

        let mut envelope = signed(&alice, "cc");
        envelope.update_expected_route(vec![alice.address(), h.keypair.address(), "cc".to_string()]);

        let action = h
            .engine
            .process(&envelope.to_bytes().unwrap(), Some(&alice.address()))
            .await
            .unwrap();

        assert_eq!(
            action,
            RelayAction::Forwarded {
                next_hop: "cc".to_string()
            }
        );
        let sends = h.transport.sends().await;
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, "cc");
        assert!(sends[0].1.has_hop(&h.keypair.address()));
    }

    #[tokio::test]
    async fn repairs_broken_route_from_table() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        let local = h.keypair.address();
        h.network.link(&local, "dd").await;
        h.engine
            .routing()
            .write()
            .await
            .add_routes(&[local.clone(), "dd".to_string(), "cc".to_string()]);

        let mut envelope = signed(&alice, "cc");
        envelope.update_expected_route(vec![alice.address(), "xx".to_string(), "cc".to_string()]);

        let action = h
            .engine
            .process(&envelope.to_bytes().unwrap(), Some(&alice.address()))
            .await
            .unwrap();

        let expected_route = vec![local.clone(), "dd".to_string(), "cc".to_string()];
        assert_eq!(
            action,
            RelayAction::Rerouted {
                next_hop: "dd".to_string(),
                route: expected_route.clone(),
            }
        );
        let sends = h.transport.sends().await;
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].1.expected_route(), expected_route.as_slice());
        assert!(h.transport.broadcasts().await.is_empty());
    }

    #[tokio::test]
    async fn broken_route_without_alternative_floods() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        let mut envelope = signed(&alice, "cc");
        envelope.update_expected_route(vec![alice.address(), "xx".to_string(), "cc".to_string()]);

        let action = h
            .engine
            .process(&envelope.to_bytes().unwrap(), Some(&alice.address()))
            .await
            .unwrap();

        assert_eq!(action, RelayAction::Flooded);
        let broadcasts = h.transport.broadcasts().await;
        assert!(broadcasts[0].0.expected_route().is_empty());
    }

    #[tokio::test]
    async fn hop_ceiling_drops_envelope() {
        let h = harness(NodeConfig::default().with_max_hops(1)).await;
        let alice = NodeKeypair::generate();
        let mut envelope = signed(&alice, "cc");
        envelope.add_hop(&alice.address(), 1).unwrap();

        let result = h.engine.process(&envelope.to_bytes().unwrap(), None).await;
        assert!(matches!(
            result,
            Err(RelayError::Envelope(crate::envelope::EnvelopeError::MaxHopsExceeded { max: 1 }))
        ));
        assert!(h.transport.outgoing().await.is_empty());
    }

    #[tokio::test]
    async fn envelope_already_through_local_node_dropped() {
        let h = harness(NodeConfig::default()).await;
        let local = h.keypair.address();
        let alice = NodeKeypair::generate();
        let mut envelope = signed(&alice, "cc");
        envelope.add_hop(&alice.address(), 8).unwrap();
        envelope.add_hop(&local, 8).unwrap();

        let result = h.engine.process(&envelope.to_bytes().unwrap(), Some("bb")).await;
        assert!(matches!(
            result,
            Err(RelayError::Envelope(crate::envelope::EnvelopeError::DuplicateHop(hop))) if hop == local
        ));
        assert!(h.transport.outgoing().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_copies_deliver_once() {
        let h = harness(NodeConfig::default()).await;
        let alice = NodeKeypair::generate();
        let mut deliveries = h.engine.subscribe();
        let bytes = signed(&alice, &h.keypair.address()).to_bytes().unwrap();

        let (first, second) = tokio::join!(
            h.engine.process(&bytes, Some("bb")),
            h.engine.process(&bytes, Some("cc")),
        );

        let results = [first, second];
        let delivered = results
            .iter()
            .filter(|r| matches!(r, Ok(RelayAction::Delivered)))
            .count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(RelayError::Duplicate(_))))
            .count();
        assert_eq!(delivered, 1);
        assert_eq!(duplicates, 1);

        deliveries.recv().await.unwrap();
        assert!(deliveries.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_message_sets_route_and_hop() {
        let h = harness(NodeConfig::default()).await;
        let local = h.keypair.address();
        h.engine
            .routing()
            .write()
            .await
            .add_routes(&[local.clone(), "bb".to_string(), "cc".to_string()]);

        let envelope = signed(&h.keypair, "cc");
        h.engine.broadcast_message(envelope.clone()).await.unwrap();

        let broadcasts = h.transport.broadcasts().await;
        assert_eq!(broadcasts.len(), 1);
        let (sent, exclude) = &broadcasts[0];
        assert!(exclude.is_empty());
        assert_eq!(sent.hops(), [local.clone()]);
        assert_eq!(sent.expected_route(), [local, "bb".to_string(), "cc".to_string()]);

        let echo = h.engine.process(&sent.to_bytes().unwrap(), Some("bb")).await;
        assert!(matches!(echo, Err(RelayError::Duplicate(_))));
    }

    #[tokio::test]
    async fn send_message_without_connection_returns_false() {
        let h = harness(NodeConfig::default()).await;
        let envelope = signed(&h.keypair, "cc");
        assert!(!h.engine.send_message("cc", &envelope).await);

        h.network.link(&h.keypair.address(), "cc").await;
        assert!(h.engine.send_message("cc", &envelope).await);
    }

    #[tokio::test]
    async fn failing_transport_is_excluded() {
        let network = MemoryNetwork::new();
        let engine = Arc::new(RelayEngine::new("aa", NodeConfig::default()));
        let broken = Arc::new(network.failing_transport("aa"));
        let working = Arc::new(network.transport("aa"));
        engine.register_transport(broken.clone()).await;
        engine.register_transport(working.clone()).await;
        let _pump = engine.start().await.unwrap();

        assert_eq!(engine.active_transports().await.len(), 1);

        let keypair = NodeKeypair::generate();
        let envelope = signed(&keypair, "cc");
        engine.process(&envelope.to_bytes().unwrap(), None).await.unwrap();
        assert!(broken.outgoing().await.is_empty());
        assert_eq!(working.broadcasts().await.len(), 1);
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let h = harness(NodeConfig::default()).await;
        assert!(matches!(h.engine.start().await, Err(RelayError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn sweep_forgets_expired_ids() {
        let h = harness(NodeConfig::default().with_message_ttl(Duration::from_millis(1))).await;
        h.engine
            .dedup
            .lock()
            .await
            .insert("old".to_string(), now_millis() - 1_000);
        assert_eq!(h.engine.seen_count().await, 1);

        h.engine.sweep().await;
        assert_eq!(h.engine.seen_count().await, 0);
    }

    #[tokio::test]
    async fn far_future_envelope_never_cached() {
        let config = NodeConfig::default()
            .with_message_ttl(Duration::from_millis(1))
            .with_max_clock_skew(Duration::from_secs(1));
        let h = harness(config).await;

        for offset in 0..50 {
            let envelope = Envelope::plain("aa", h.keypair.address(), json!(offset))
                .unwrap()
                .with_timestamp(i64::MAX - offset);
            let result = h.engine.process(&envelope.to_bytes().unwrap(), None).await;
            assert!(matches!(result, Err(RelayError::FutureTimestamp)));
        }
        assert_eq!(h.engine.seen_count().await, 0);
    }

    #[tokio::test]
    async fn sweep_forgets_slightly_future_ids() {
        let config = NodeConfig::default()
            .with_message_ttl(Duration::from_millis(1))
            .with_max_clock_skew(Duration::from_secs(1));
        let h = harness(config).await;
        let now = now_millis();
        let envelope = Envelope::plain("aa", h.keypair.address(), json!(1))
            .unwrap()
            .with_timestamp(now + 500);

        let result = h.engine.process(&envelope.to_bytes().unwrap(), None).await;
        assert!(matches!(result, Err(RelayError::Envelope(_))));
        assert_eq!(h.engine.seen_count().await, 1);

        h.engine.sweep_at(now + 2_000).await;
        assert_eq!(h.engine.seen_count().await, 0);
    }
}
