//! Engine orchestration.
//!
//! [`MeshEngine`] is an explicitly constructed, lifetime-scoped instance
//! owning all protocol state (peer table, dedup cache, fragment store,
//! abuse control, sessions) - no globals, so multiple independent engines
//! coexist in one process.
//!
//! Inbound frames run the pipeline decode → admit → dedup → verify →
//! decrypt → reassemble → route. Each frame is processed as its own task;
//! per-frame failures are contained and degrade to drop-and-record.
//! Heartbeat, rotation, and purge timers run as independent spawned tasks
//! so a burst of inbound traffic cannot starve them.

use crate::abuse::{AbuseControl, Admission};
use crate::config::EngineConfig;
use crate::dedup::DedupCache;
use crate::error::EngineError;
use crate::fragment::{FragmentError, Fragmenter};
use crate::frame::{Frame, FrameType, MessageId, PeerId};
use crate::identity::Identity;
use crate::peer::PeerSnapshot;
use crate::persistence::{Persistence, PEERS_KEY};
use crate::router::{HeartbeatSchedule, RoutingTable};
use crate::transport::{Inbound, Transport};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use weft_crypto::hash::dedup_key;
use weft_crypto::session::{HandshakeOffer, SessionManager};
use weft_crypto::CryptoError;

/// Depth of the upward delivery channel.
const DELIVERY_DEPTH: usize = 256;

/// A message delivered to the local application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Originating peer
    pub sender: PeerId,
    /// Reassembled, decrypted payload
    pub payload: Vec<u8>,
    /// Logical message identifier
    pub message_id: MessageId,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    relayed: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_duplicate: AtomicU64,
    dropped_admission: AtomicU64,
    dropped_verification: AtomicU64,
    dropped_decryption: AtomicU64,
    dropped_other: AtomicU64,
}

/// Engine counters snapshot.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Frames handed in by the transport
    pub received: u64,
    /// Logical messages delivered upward
    pub delivered: u64,
    /// Frames relayed onward
    pub relayed: u64,
    /// Dropped: codec rejection
    pub dropped_malformed: u64,
    /// Dropped: dedup suppression
    pub dropped_duplicate: u64,
    /// Dropped: rate limit or blacklist
    pub dropped_admission: u64,
    /// Dropped: signature verification failure
    pub dropped_verification: u64,
    /// Dropped: AEAD authentication failure
    pub dropped_decryption: u64,
    /// Dropped: any other per-frame failure
    pub dropped_other: u64,
}

/// The mesh protocol engine.
///
/// Generic over the [`Transport`] capability; everything else is owned.
pub struct MeshEngine<T: Transport> {
    identity: Identity,
    config: EngineConfig,
    transport: T,
    sessions: SessionManager,
    dedup: DedupCache,
    fragments: Fragmenter,
    routing: RoutingTable,
    abuse: AbuseControl,
    heartbeat: Mutex<HeartbeatSchedule>,
    /// Outbound payloads queued while a handshake is in flight
    pending_sends: DashMap<PeerId, Vec<(MessageId, Vec<u8>)>>,
    /// Directed sends awaiting an ACK, for RTT and health accounting
    pending_acks: DashMap<MessageId, (PeerId, Instant)>,
    delivery_tx: mpsc::Sender<Delivery>,
    counters: Counters,
}

impl<T: Transport> MeshEngine<T> {
    /// Build an engine and the delivery stream the application consumes.
    #[must_use]
    pub fn new(
        identity: Identity,
        config: EngineConfig,
        transport: T,
    ) -> (Arc<Self>, mpsc::Receiver<Delivery>) {
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_DEPTH);
        let heartbeat = HeartbeatSchedule::new(&config.router);
        let engine = Arc::new(Self {
            sessions: SessionManager::new(config.session.clone()),
            dedup: DedupCache::new(config.dedup.clone()),
            fragments: Fragmenter::new(config.fragment.clone()),
            routing: RoutingTable::new(config.router.clone()),
            abuse: AbuseControl::new(config.abuse.clone()),
            heartbeat: Mutex::new(heartbeat),
            pending_sends: DashMap::new(),
            pending_acks: DashMap::new(),
            delivery_tx,
            counters: Counters::default(),
            identity,
            config,
            transport,
        });
        (engine, delivery_rx)
    }

    /// This node's identifier.
    #[must_use]
    pub fn local_id(&self) -> PeerId {
        self.identity.id()
    }

    /// Spawn the inbound pump and the timer tasks.
    ///
    /// Frames are processed as independent, order-insensitive tasks; no
    /// frame's processing blocks on another's.
    pub fn start(self: &Arc<Self>, mut inbound: mpsc::Receiver<Inbound>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some((from, bytes)) = inbound.recv().await {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine.process_inbound(from, bytes).await;
                });
            }
        });

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.heartbeat_loop().await;
        });

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.maintenance_loop().await;
        });
    }

    /// Tell the engine a transport-level connection to `peer` exists.
    ///
    /// Creates the peer record so floods and handshakes can reach it.
    pub fn connect_peer(&self, peer: PeerId) {
        self.routing.upsert(peer);
    }

    /// Send an application payload.
    ///
    /// Broadcast payloads are signed and flooded. Directed payloads are
    /// sealed under the pairwise session; without one, the payload queues
    /// and a handshake is initiated - the send completes once the session
    /// is established.
    ///
    /// # Errors
    ///
    /// Propagates codec, crypto, and transport failures for the local
    /// send path. A queued send returns `Ok` with its message id.
    pub async fn send_message(
        &self,
        recipient: PeerId,
        payload: Vec<u8>,
    ) -> Result<MessageId, EngineError> {
        let message_id = MessageId::random();

        if !recipient.is_broadcast() && !self.sessions.has_session(recipient.as_bytes()).await {
            self.pending_sends
                .entry(recipient)
                .or_default()
                .push((message_id, payload));
            self.begin_handshake(recipient).await?;
            return Ok(message_id);
        }

        self.send_payload(recipient, message_id, payload).await?;
        Ok(message_id)
    }

    /// Broadcast a route advertisement carrying our transport addresses.
    ///
    /// # Errors
    ///
    /// Propagates codec and transport failures.
    pub async fn announce(&self) -> Result<(), EngineError> {
        let payload = bincode::serialize(&self.config.local_addresses).unwrap_or_default();
        let mut frame = Frame::new(
            FrameType::RouteAdvert,
            self.local_id(),
            PeerId::BROADCAST,
            self.config.ttl,
            payload,
        );
        frame.sign(self.identity.signing_key());
        self.dispatch(&frame).await
    }

    /// Snapshots of every known peer.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.routing.snapshots()
    }

    /// Health score for one peer, if known.
    #[must_use]
    pub fn peer_health(&self, peer: &PeerId) -> Option<f64> {
        self.routing.peer_health(peer)
    }

    /// Engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            received: self.counters.received.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            relayed: self.counters.relayed.load(Ordering::Relaxed),
            dropped_malformed: self.counters.dropped_malformed.load(Ordering::Relaxed),
            dropped_duplicate: self.counters.dropped_duplicate.load(Ordering::Relaxed),
            dropped_admission: self.counters.dropped_admission.load(Ordering::Relaxed),
            dropped_verification: self.counters.dropped_verification.load(Ordering::Relaxed),
            dropped_decryption: self.counters.dropped_decryption.load(Ordering::Relaxed),
            dropped_other: self.counters.dropped_other.load(Ordering::Relaxed),
        }
    }

    /// Persist the peer table.
    pub async fn save_peers<P: Persistence>(&self, store: &P) {
        if let Ok(bytes) = serde_json::to_vec(&self.routing.snapshots()) {
            store.put(PEERS_KEY, bytes).await;
        }
    }

    /// Restore peer records (id and addresses) from the store.
    ///
    /// Health and reputation restart neutral; scores are observations, not
    /// durable facts. Returns the number of peers restored.
    pub async fn load_peers<P: Persistence>(&self, store: &P) -> usize {
        let Some(bytes) = store.get(PEERS_KEY).await else {
            return 0;
        };
        let Ok(snapshots) = serde_json::from_slice::<Vec<PeerSnapshot>>(&bytes) else {
            return 0;
        };
        let count = snapshots.len();
        for snapshot in snapshots {
            self.routing.upsert(snapshot.id);
            self.routing.with_peer(snapshot.id, |peer| {
                for address in &snapshot.addresses {
                    peer.add_address(address.clone());
                }
            });
        }
        count
    }

    // ---- inbound pipeline ----

    async fn process_inbound(&self, from: PeerId, bytes: Vec<u8>) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        if let Err(error) = self.handle_frame(from, &bytes).await {
            let counter = match &error {
                EngineError::Frame(_)
                | EngineError::Fragment(_)
                | EngineError::MalformedPayload => &self.counters.dropped_malformed,
                EngineError::RateLimited | EngineError::Blacklisted => {
                    &self.counters.dropped_admission
                }
                EngineError::SignatureVerification => &self.counters.dropped_verification,
                EngineError::Decryption => &self.counters.dropped_decryption,
                _ => &self.counters.dropped_other,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(from = %from, error = %error, "frame dropped");
        }
    }

    /// The decode → admit → dedup → verify → decrypt → reassemble → route
    /// pipeline for one frame. Every error is fatal for this frame only.
    async fn handle_frame(&self, from: PeerId, bytes: &[u8]) -> Result<(), EngineError> {
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(error) => {
                // The forwarding neighbor handed us garbage.
                self.punish(&from).await;
                return Err(error.into());
            }
        };

        // Our own frame echoed back around a cycle.
        if frame.sender_id == self.local_id() {
            return Ok(());
        }

        let (admission, imposed) = self.abuse.admit(&from, frame.frame_type).await;
        if let Some(duration) = imposed {
            self.mirror_blacklist(from, duration);
        }
        match admission {
            Admission::Admitted => {}
            Admission::RateLimited => return Err(EngineError::RateLimited),
            Admission::Blacklisted => return Err(EngineError::Blacklisted),
        }

        if !self
            .dedup
            .check_and_insert(frame.message_id.as_bytes(), &frame.payload)
            .await
        {
            self.counters.dropped_duplicate.fetch_add(1, Ordering::Relaxed);
            let key = dedup_key(frame.message_id.as_bytes(), &frame.payload);
            if let Some(duration) = self.abuse.note_duplicate(&from, key).await {
                self.mirror_blacklist(from, duration);
            }
            return Ok(());
        }

        if frame.verify().is_err() {
            tracing::warn!(origin = %frame.sender_id, "signature verification failed");
            self.punish(&frame.sender_id).await;
            return Err(EngineError::SignatureVerification);
        }

        if self.routing.contains(&from) {
            self.routing.with_peer(from, |peer| peer.touch());
        }

        let addressed_here =
            frame.recipient_id == self.local_id() || frame.recipient_id.is_broadcast();
        if addressed_here {
            // A frame whose local processing failed is never relayed.
            self.deliver_frame(&frame).await?;
        }

        // Broadcast frames and directed frames passing through both relay;
        // frames addressed solely to us terminate here.
        if frame.recipient_id.is_broadcast() || frame.recipient_id != self.local_id() {
            self.relay(&frame, &from).await;
        }

        Ok(())
    }

    /// Local processing of a frame addressed to this node (or broadcast).
    async fn deliver_frame(&self, frame: &Frame) -> Result<(), EngineError> {
        let origin = frame.sender_id;
        match frame.frame_type {
            FrameType::Data => {
                let plaintext = self.open_payload(frame).await?;
                self.deliver(origin, frame.message_id, plaintext).await;
                if !frame.recipient_id.is_broadcast() {
                    self.send_ack(origin, frame.message_id).await;
                }
                Ok(())
            }
            FrameType::Fragment => {
                let plaintext = self.open_payload(frame).await?;
                match self.fragments.ingest(frame.message_id, &plaintext).await {
                    Ok(Some(payload)) => {
                        self.deliver(origin, frame.message_id, payload).await;
                        if !frame.recipient_id.is_broadcast() {
                            self.send_ack(origin, frame.message_id).await;
                        }
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(FragmentError::PendingLimit) => Ok(()),
                    Err(error) => {
                        tracing::debug!(origin = %origin, error = %error, "hostile fragment");
                        self.punish(&origin).await;
                        Err(error.into())
                    }
                }
            }
            FrameType::Ack => {
                self.handle_ack(origin, &frame.payload);
                Ok(())
            }
            FrameType::Heartbeat => {
                if self.routing.contains(&origin) {
                    self.routing.with_peer(origin, |peer| peer.record_heartbeat());
                }
                Ok(())
            }
            FrameType::RouteAdvert => {
                let Ok(addresses) = bincode::deserialize::<Vec<String>>(&frame.payload) else {
                    self.punish(&origin).await;
                    return Err(EngineError::MalformedPayload);
                };
                self.routing.upsert(origin);
                self.routing.with_peer(origin, |peer| {
                    for address in addresses {
                        peer.add_address(address);
                    }
                });
                Ok(())
            }
            FrameType::Handshake => self.handle_handshake(origin, &frame.payload).await,
        }
    }

    /// Unseal a directed payload; broadcast payloads travel signed but
    /// in the clear (no pairwise session applies to a flood audience).
    async fn open_payload(&self, frame: &Frame) -> Result<Vec<u8>, EngineError> {
        if frame.recipient_id.is_broadcast() {
            return Ok(frame.payload.clone());
        }
        match self
            .sessions
            .open(
                frame.sender_id.as_bytes(),
                frame.message_id.as_bytes(),
                &frame.payload,
            )
            .await
        {
            Ok(plaintext) => Ok(plaintext),
            Err(CryptoError::NoSession) => {
                // Recoverable: they have a session we lost. Re-handshake.
                self.begin_handshake(frame.sender_id).await?;
                Err(EngineError::SessionNotEstablished)
            }
            Err(_) => {
                tracing::warn!(origin = %frame.sender_id, "payload failed authentication");
                self.punish(&frame.sender_id).await;
                Err(EngineError::Decryption)
            }
        }
    }

    async fn handle_handshake(&self, origin: PeerId, payload: &[u8]) -> Result<(), EngineError> {
        let offer = match HandshakeOffer::from_bytes(payload) {
            Ok(offer) => offer,
            Err(error) => {
                self.punish(&origin).await;
                return Err(error.into());
            }
        };

        // First valid handshake creates the peer record.
        self.routing.upsert(origin);

        match self.sessions.on_offer(origin.as_bytes(), &offer).await {
            Ok(Some(reply)) => {
                let mut frame = Frame::new(
                    FrameType::Handshake,
                    self.local_id(),
                    origin,
                    self.config.ttl,
                    reply.to_bytes().to_vec(),
                );
                frame.sign(self.identity.signing_key());
                self.dispatch(&frame).await?;
            }
            Ok(None) => {}
            Err(error) => {
                self.punish(&origin).await;
                return Err(error.into());
            }
        }

        // Either side of the exchange leaves a session installed.
        self.flush_pending(origin).await;
        Ok(())
    }

    fn handle_ack(&self, origin: PeerId, payload: &[u8]) {
        let Ok(acked) = <[u8; 16]>::try_from(payload) else {
            return;
        };
        let acked = MessageId::from_bytes(acked);
        if let Some((_, (recipient, sent_at))) = self.pending_acks.remove(&acked) {
            if recipient == origin {
                let rtt = sent_at.elapsed();
                self.routing
                    .with_peer(origin, |peer| peer.record_success(Some(rtt)));
            }
        }
    }

    async fn deliver(&self, sender: PeerId, message_id: MessageId, payload: Vec<u8>) {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        self.routing.note_delivered();
        let _ = self
            .delivery_tx
            .send(Delivery {
                sender,
                payload,
                message_id,
            })
            .await;
    }

    /// Flood the frame onward, excluding the arrival peer and the origin.
    async fn relay(&self, frame: &Frame, from: &PeerId) {
        let Some(relayed) = frame.for_relay() else {
            return;
        };
        let Ok(bytes) = relayed.encode() else {
            return;
        };

        let mut forwarded = false;
        for target in self.routing.relay_targets(Some(from)) {
            if target == frame.sender_id {
                continue;
            }
            match self.transport.send(target, bytes.clone()).await {
                Ok(()) => forwarded = true,
                Err(_) => self.routing.with_peer(target, |peer| peer.record_failure()),
            }
        }
        if forwarded {
            self.counters.relayed.fetch_add(1, Ordering::Relaxed);
            self.routing.note_relayed_for(&frame.sender_id);
        }
    }

    // ---- outbound path ----

    async fn send_payload(
        &self,
        recipient: PeerId,
        message_id: MessageId,
        payload: Vec<u8>,
    ) -> Result<(), EngineError> {
        let directed = !recipient.is_broadcast();

        if self.fragments.fits_single_frame(&payload) {
            let body = self.seal_if_directed(recipient, message_id, payload).await?;
            let mut frame = Frame::new(
                FrameType::Data,
                self.local_id(),
                recipient,
                self.config.ttl,
                body,
            );
            frame.message_id = message_id;
            frame.sign(self.identity.signing_key());
            if directed {
                self.pending_acks.insert(message_id, (recipient, Instant::now()));
            }
            return self.dispatch(&frame).await;
        }

        let chunks = self.fragments.split(&payload)?;
        for chunk in chunks {
            let body = self
                .seal_if_directed(recipient, message_id, chunk.bytes)
                .await?;
            let mut frame = Frame::new(
                FrameType::Fragment,
                self.local_id(),
                recipient,
                self.config.ttl,
                body,
            );
            frame.message_id = message_id;
            frame.sign(self.identity.signing_key());
            self.dispatch(&frame).await?;
        }
        if directed {
            self.pending_acks.insert(message_id, (recipient, Instant::now()));
        }
        Ok(())
    }

    async fn seal_if_directed(
        &self,
        recipient: PeerId,
        message_id: MessageId,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, EngineError> {
        if recipient.is_broadcast() {
            return Ok(payload);
        }
        self.sessions
            .seal(recipient.as_bytes(), message_id.as_bytes(), &payload)
            .await
            .map_err(|error| match error {
                CryptoError::NoSession => EngineError::SessionNotEstablished,
                other => other.into(),
            })
    }

    /// Push a locally originated frame into the mesh: direct to the
    /// recipient when reachable first-hand, flooding otherwise.
    async fn dispatch(&self, frame: &Frame) -> Result<(), EngineError> {
        let bytes = frame.encode()?;

        if !frame.recipient_id.is_broadcast()
            && self
                .transport
                .send(frame.recipient_id, bytes.clone())
                .await
                .is_ok()
        {
            return Ok(());
        }

        let mut reached = false;
        for target in self.routing.relay_targets(None) {
            if target == frame.recipient_id {
                continue; // direct attempt already failed
            }
            match self.transport.send(target, bytes.clone()).await {
                Ok(()) => reached = true,
                Err(_) => self.routing.with_peer(target, |peer| peer.record_failure()),
            }
        }

        if reached || frame.recipient_id.is_broadcast() {
            Ok(())
        } else {
            Err(crate::transport::TransportError::Unreachable(frame.recipient_id).into())
        }
    }

    async fn begin_handshake(&self, peer: PeerId) -> Result<(), EngineError> {
        if self.sessions.has_pending(peer.as_bytes()).await {
            return Ok(());
        }
        let offer = self.sessions.initiate(peer.as_bytes()).await;
        let mut frame = Frame::new(
            FrameType::Handshake,
            self.local_id(),
            peer,
            self.config.ttl,
            offer.to_bytes().to_vec(),
        );
        frame.sign(self.identity.signing_key());
        self.dispatch(&frame).await
    }

    async fn flush_pending(&self, peer: PeerId) {
        let Some((_, queued)) = self.pending_sends.remove(&peer) else {
            return;
        };
        for (message_id, payload) in queued {
            if let Err(error) = self.send_payload(peer, message_id, payload).await {
                tracing::warn!(peer = %peer, error = %error, "queued send failed");
            }
        }
    }

    async fn send_ack(&self, origin: PeerId, acked: MessageId) {
        let mut frame = Frame::new(
            FrameType::Ack,
            self.local_id(),
            origin,
            self.config.ttl,
            acked.as_bytes().to_vec(),
        );
        frame.sign(self.identity.signing_key());
        if let Err(error) = self.dispatch(&frame).await {
            tracing::debug!(peer = %origin, error = %error, "ack dispatch failed");
        }
    }

    // ---- violations ----

    async fn punish(&self, peer: &PeerId) {
        if self.routing.contains(peer) {
            self.routing.with_peer(*peer, |p| p.record_violation());
        }
        if let Some(duration) = self.abuse.record_violation(peer).await {
            self.mirror_blacklist(*peer, duration);
        }
    }

    fn mirror_blacklist(&self, peer: PeerId, duration: std::time::Duration) {
        tracing::warn!(peer = %peer, ?duration, "peer blacklisted");
        self.routing.with_peer(peer, |p| p.blacklist_for(duration));
    }

    // ---- timers ----

    async fn heartbeat_loop(self: Arc<Self>) {
        loop {
            let interval = self.heartbeat.lock().await.interval();
            tokio::time::sleep(interval).await;
            self.emit_heartbeats().await;

            let suspected = self.routing.partition_suspected(interval * 2);
            let mut schedule = self.heartbeat.lock().await;
            if suspected {
                schedule.on_partition_suspected();
            } else {
                schedule.on_stable();
            }
        }
    }

    /// Direct, non-relayed liveness beacons (ttl 1) to every usable peer.
    async fn emit_heartbeats(&self) {
        for snapshot in self.routing.snapshots() {
            if snapshot.blacklisted {
                continue;
            }
            let mut frame = Frame::new(
                FrameType::Heartbeat,
                self.local_id(),
                snapshot.id,
                1,
                Vec::new(),
            );
            frame.sign(self.identity.signing_key());
            let Ok(bytes) = frame.encode() else {
                continue;
            };
            if self.transport.send(snapshot.id, bytes).await.is_err() {
                self.routing
                    .with_peer(snapshot.id, |peer| peer.record_failure());
            }
        }
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.maintenance_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.dedup.purge_expired().await;
            let purged = self.fragments.purge_stale().await;
            if purged > 0 {
                tracing::debug!(purged, "reassembly timeouts");
            }
            self.sessions.purge().await;
            self.abuse.cleanup().await;
            self.routing.expire_blacklists();

            for peer in self.routing.remove_stale() {
                self.sessions.remove(peer.as_bytes()).await;
            }

            self.expire_acks();
            self.rotate_due_sessions().await;
        }
    }

    /// Unacknowledged directed sends past the timeout count as failures.
    fn expire_acks(&self) {
        let timeout = self.config.ack_timeout;
        let expired: Vec<MessageId> = self
            .pending_acks
            .iter()
            .filter(|entry| entry.value().1.elapsed() >= timeout)
            .map(|entry| *entry.key())
            .collect();
        for message_id in expired {
            if let Some((_, (peer, _))) = self.pending_acks.remove(&message_id) {
                self.routing.with_peer(peer, |p| p.record_failure());
            }
        }
    }

    async fn rotate_due_sessions(&self) {
        for snapshot in self.routing.snapshots() {
            let peer = snapshot.id;
            if self.sessions.needs_rotation(peer.as_bytes()).await
                && !self.sessions.has_pending(peer.as_bytes()).await
            {
                tracing::debug!(peer = %peer, "rotating session");
                if let Err(error) = self.begin_handshake(peer).await {
                    tracing::debug!(peer = %peer, error = %error, "rotation handshake failed");
                }
            }
        }
    }
}
