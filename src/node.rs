//! # High-Level Node API
//!
//! This module provides the main entry point for running a gossip node. A
//! [`Node`] owns one UDP socket, the bounded membership view, the gossip
//! engine state, and the background tasks that drive the protocol.
//!
//! ## Quick Start
//!
//! ```ignore
//! // Create a node on an ephemeral port
//! let node = Node::bind(NodeConfig::default()).await?;
//!
//! // Join the overlay through a known peer, then start the loops
//! node.bootstrap("127.0.0.1:5000".parse()?).await;
//! node.run().await;
//!
//! // Originate one application message
//! node.inject(serde_json::json!({ "topic": "news", "data": "hello" })).await?;
//!
//! node.shutdown().await;
//! ```
//!
//! ## Tasks
//!
//! | Task | Cadence | Work |
//! |------|---------|------|
//! | Listener | per datagram | decode, refresh sender liveness, dispatch |
//! | Ping | every `ping_interval` | probe sampled peers, expire silent ones |
//! | Pull | every `pull_interval` (optional) | advertise recent ids via IHAVE |
//!
//! All three select on a cancellation channel owned by the node, so
//! `shutdown()` wakes them immediately instead of waiting out a socket
//! timeout.
//!
//! ## Locking
//!
//! Two locks, never held across socket I/O: the engine lock covers the
//! seen-set, the gossip store, the send counter, and the event log; the
//! membership lock covers the view. When both are needed the engine lock
//! is taken first and released before any send.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::engine::{GossipStore, SeenSet};
use crate::events::{Event, EventLog};
use crate::identity::{self, now_ms, PowProof};
use crate::membership::{AddOutcome, MembershipView};
use crate::messages::{
    self, Envelope, HelloPayload, IhavePayload, IwantPayload, MsgType, PeersPayload,
    MAX_SERIALIZED_LEN,
};

/// Default number of peers chosen for one push relay.
pub const DEFAULT_FANOUT: usize = 3;

/// Default hop budget for injected gossip.
pub const DEFAULT_TTL: u32 = 5;

/// Default membership view capacity.
pub const DEFAULT_PEER_LIMIT: usize = 20;

/// Default liveness probe cadence in seconds.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 2;

/// Default silence threshold before a peer is expired, in seconds.
pub const DEFAULT_PEER_TIMEOUT_SECS: u64 = 6;

/// Default seed for the per-node sampling PRNG.
pub const DEFAULT_SEED: u64 = 42;

/// Default cap on ids advertised in one IHAVE.
pub const DEFAULT_MAX_IHAVE_IDS: usize = 32;

/// Node configuration, immutable after [`Node::bind`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// UDP listen port. 0 binds an ephemeral port.
    pub port: u16,
    /// Peers chosen per push relay.
    pub fanout: usize,
    /// Hop budget for injected gossip.
    pub ttl: u32,
    /// Membership view capacity (capped at `membership::MAX_PEERS`).
    pub peer_limit: usize,
    /// Liveness probe cadence.
    pub ping_interval: Duration,
    /// Silence threshold before a peer is expired.
    pub peer_timeout: Duration,
    /// Seed for the per-node sampling PRNG.
    pub seed: u64,
    /// Cadence of IHAVE advertisements. Zero disables the pull path.
    pub pull_interval: Duration,
    /// Cap on ids advertised in one IHAVE.
    pub max_ihave_ids: usize,
    /// Admission puzzle difficulty in leading zero nibbles. Zero disables
    /// admission control.
    pub pow_difficulty: u32,
    /// Directory the event log is created in.
    pub log_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 0,
            fanout: DEFAULT_FANOUT,
            ttl: DEFAULT_TTL,
            peer_limit: DEFAULT_PEER_LIMIT,
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            peer_timeout: Duration::from_secs(DEFAULT_PEER_TIMEOUT_SECS),
            seed: DEFAULT_SEED,
            pull_interval: Duration::ZERO,
            max_ihave_ids: DEFAULT_MAX_IHAVE_IDS,
            pow_difficulty: 0,
            log_dir: PathBuf::from("."),
        }
    }
}

/// State guarded by the engine lock: dedup ring, pull store, send counter,
/// event log sink.
struct EngineState {
    seen: SeenSet,
    store: GossipStore,
    sent_messages: u64,
    log: EventLog,
}

/// State shared between the public handle and the background tasks.
struct Shared {
    config: NodeConfig,
    node_id: String,
    self_addr: String,
    socket: UdpSocket,
    membership: Mutex<MembershipView>,
    engine: Mutex<EngineState>,
    /// Admission proof, mined once on first use and reused for every
    /// bootstrap (the puzzle is bound to `node_id`, not to the receiver).
    pow_proof: OnceLock<PowProof>,
    log_path: PathBuf,
}

pub struct Node {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

impl Node {
    /// Bind the socket, create the event log, and generate the identity.
    ///
    /// Socket or log creation failure is fatal here and nowhere else;
    /// everything after `bind` treats the network as lossy.
    pub async fn bind(config: NodeConfig) -> Result<Self> {
        let socket = bind_udp(config.port).context("failed to bind UDP socket")?;
        let local_addr = socket.local_addr().context("failed to read bound address")?;
        let port = local_addr.port();

        let log = EventLog::create(&config.log_dir, port)
            .with_context(|| format!("failed to create event log in {:?}", config.log_dir))?;
        let log_path = log.path().to_path_buf();

        let node_id = identity::generate_node_id();
        let self_addr = format!("127.0.0.1:{port}");
        let membership = MembershipView::new(config.peer_limit, config.seed);

        info!(%local_addr, node = %node_id, "node bound");

        let shared = Arc::new(Shared {
            node_id,
            self_addr,
            socket,
            membership: Mutex::new(membership),
            engine: Mutex::new(EngineState {
                seen: SeenSet::new(),
                store: GossipStore::new(),
                sent_messages: 0,
                log,
            }),
            pow_proof: OnceLock::new(),
            log_path,
            config,
        });
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            shared,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            local_addr,
        })
    }

    /// Join the overlay through a known peer: remember it, introduce
    /// ourselves with a HELLO (carrying the admission proof when enabled),
    /// and ask for its peer list.
    pub async fn bootstrap(&self, peer: SocketAddr) {
        let s = &self.shared;
        s.membership.lock().await.add(peer, now_ms());

        let hello = s.envelope(
            MsgType::Hello,
            format!("HELLO_{}", s.node_id),
            1,
            s.hello_payload(),
        );
        s.send_envelope(&hello, peer).await;

        let get_peers = s.envelope(
            MsgType::GetPeers,
            fresh_msg_id("GET"),
            1,
            json!({ "max_peers": s.config.peer_limit }),
        );
        s.send_envelope(&get_peers, peer).await;
    }

    /// Start the listener, ping, and (if enabled) pull tasks.
    pub async fn run(&self) {
        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(Shared::listener_loop(
            self.shared.clone(),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(Shared::ping_loop(
            self.shared.clone(),
            self.shutdown.subscribe(),
        )));
        if !self.shared.config.pull_interval.is_zero() {
            tasks.push(tokio::spawn(Shared::pull_loop(
                self.shared.clone(),
                self.shutdown.subscribe(),
            )));
        }
        info!(addr = %self.local_addr, "node running");
    }

    /// Originate one GOSSIP at the configured TTL. Returns its message id.
    ///
    /// The payload must fit the codec's limits; the message is marked seen
    /// and stored before relaying, so a copy echoed back by a peer is
    /// deduplicated.
    pub async fn inject(&self, payload: Value) -> Result<String> {
        let s = &self.shared;
        let msg_id = format!("{}_{}", s.node_id, now_ms());
        let msg = s.envelope(MsgType::Gossip, msg_id.clone(), s.config.ttl, payload);
        let bytes = messages::encode(&msg).context("failed to encode gossip")?;

        {
            let mut engine = s.engine.lock().await;
            engine.seen.mark_seen(&msg_id);
            engine.store.insert(&msg_id, bytes);
        }
        debug!(id = %msg_id, "injected gossip");
        s.relay(&msg, None).await;
        Ok(msg_id)
    }

    /// Stop all background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!(addr = %self.local_addr, "node stopped");
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    pub fn log_path(&self) -> &Path {
        &self.shared.log_path
    }

    pub async fn peer_count(&self) -> usize {
        self.shared.membership.lock().await.len()
    }

    pub async fn peers(&self) -> Vec<SocketAddr> {
        self.shared.membership.lock().await.snapshot()
    }

    pub async fn sent_messages(&self) -> u64 {
        self.shared.engine.lock().await.sent_messages
    }
}

/// Bind a nonblocking UDP socket on `0.0.0.0:port` with SO_REUSEADDR, so
/// experiment harnesses can restart nodes on well-known ports immediately.
fn bind_udp(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.set_nonblocking(true)?;
    let socket = UdpSocket::from_std(std::net::UdpSocket::from(socket))?;
    Ok(socket)
}

/// Fresh unique id for a control message.
fn fresh_msg_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

impl Shared {
    fn envelope(&self, msg_type: MsgType, msg_id: String, ttl: u32, payload: Value) -> Envelope {
        Envelope::new(
            msg_type,
            msg_id,
            &self.node_id,
            &self.self_addr,
            ttl,
            payload,
        )
    }

    /// HELLO payload: capabilities, plus the admission proof when enabled.
    fn hello_payload(&self) -> Value {
        let k = self.config.pow_difficulty;
        if k == 0 {
            return json!({ "capabilities": ["udp", "json"] });
        }
        let proof = self
            .pow_proof
            .get_or_init(|| identity::mine(&self.node_id, k));
        json!({
            "capabilities": ["udp", "json"],
            "pow": {
                "hash_alg": identity::POW_HASH_ALG,
                "difficulty_k": k,
                "nonce": proof.nonce,
                "digest_hex": proof.digest_hex,
            }
        })
    }

    // ========================================================================
    // Sending
    // ========================================================================

    async fn send_envelope(&self, msg: &Envelope, dest: SocketAddr) {
        let bytes = match messages::encode(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, msg_type = %msg.msg_type, "dropping unencodable message");
                return;
            }
        };
        self.send_raw(&bytes, dest, msg.msg_type.wire_name(), &msg.msg_id)
            .await;
    }

    /// Transmit one datagram, then bump the counter and log the SEND.
    /// Transient send errors drop the single datagram; epidemic
    /// propagation is the retry mechanism.
    async fn send_raw(&self, bytes: &[u8], dest: SocketAddr, msg_type: &str, msg_id: &str) {
        if let Err(e) = self.socket.send_to(bytes, dest).await {
            debug!(%dest, error = %e, "send failed, dropping datagram");
            return;
        }
        let mut engine = self.engine.lock().await;
        engine.sent_messages += 1;
        engine.log.record(Event::Send, msg_type, msg_id);
    }

    /// Forward a gossip message to up to `fanout` sampled peers, excluding
    /// the address it arrived from. The copy leaves with TTL decremented;
    /// an exhausted TTL ends the flood here.
    async fn relay(&self, msg: &Envelope, exclude: Option<SocketAddr>) {
        if msg.ttl == 0 {
            return;
        }
        let mut relayed = msg.clone();
        relayed.ttl -= 1;

        let targets = {
            let mut view = self.membership.lock().await;
            view.sample(self.config.fanout, exclude)
        };
        if targets.is_empty() {
            return;
        }
        let bytes = match messages::encode(&relayed) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "dropping unencodable relay");
                return;
            }
        };
        trace!(id = %relayed.msg_id, ttl = relayed.ttl, n = targets.len(), "relaying");
        for dest in targets {
            self.send_raw(&bytes, dest, relayed.msg_type.wire_name(), &relayed.msg_id)
                .await;
        }
    }

    // ========================================================================
    // Listener
    // ========================================================================

    async fn listener_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        // One byte over the limit so an oversized datagram is seen as such
        // and rejected by decode instead of being silently truncated.
        let mut buf = vec![0u8; MAX_SERIALIZED_LEN + 1];
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            trace!(error = %e, "recv error ignored");
                            continue;
                        }
                    };
                    let msg = match messages::decode(&buf[..len]) {
                        Ok(msg) => msg,
                        Err(e) => {
                            trace!(%src, error = %e, "dropping undecodable datagram");
                            continue;
                        }
                    };
                    self.dispatch(msg, src).await;
                }
            }
        }
    }

    async fn dispatch(&self, msg: Envelope, src: SocketAddr) {
        // Any datagram from a known peer counts as liveness; this aliases
        // ping success with general activity and tolerates ping loss.
        self.membership.lock().await.refresh(src, now_ms());

        match msg.msg_type {
            MsgType::Hello => self.handle_hello(msg, src).await,
            MsgType::GetPeers => self.send_peers_list(src).await,
            MsgType::PeersList => self.handle_peers_list(msg).await,
            MsgType::Gossip => self.handle_gossip(msg, src).await,
            MsgType::Ping => self.handle_ping(msg, src).await,
            MsgType::Pong => self.handle_pong(src).await,
            MsgType::Ihave => self.handle_ihave(msg, src).await,
            MsgType::Iwant => self.handle_iwant(msg, src).await,
            MsgType::Unknown => {
                trace!(%src, "dropping datagram with unknown message type");
            }
        }
    }

    // ========================================================================
    // Bootstrap and peer exchange
    // ========================================================================

    /// A joiner announced itself. Verify the admission proof before the
    /// sender is allowed into the view; a bad proof gets no reply at all.
    async fn handle_hello(&self, msg: Envelope, src: SocketAddr) {
        if !self.verify_hello_pow(&msg) {
            warn!(sender = %msg.sender_addr, "rejecting HELLO with invalid admission proof");
            return;
        }
        let outcome = self.membership.lock().await.add(src, now_ms());
        if outcome == AddOutcome::Added {
            info!(peer = %src, "admitted new peer");
        }
        self.send_peers_list(src).await;
    }

    fn verify_hello_pow(&self, msg: &Envelope) -> bool {
        let k = self.config.pow_difficulty;
        if k == 0 {
            return true;
        }
        let hello: HelloPayload = match serde_json::from_value(msg.payload.clone()) {
            Ok(hello) => hello,
            Err(_) => return false,
        };
        match hello.pow {
            Some(pow) => identity::verify(&msg.sender_id, pow.nonce, k),
            None => false,
        }
    }

    /// Snapshot the view under its lock, release, then reply.
    async fn send_peers_list(&self, dest: SocketAddr) {
        let peers: Vec<Value> = {
            let view = self.membership.lock().await;
            view.snapshot()
                .iter()
                .map(|addr| json!({ "addr": addr.to_string() }))
                .collect()
        };
        let reply = self.envelope(
            MsgType::PeersList,
            fresh_msg_id("PEERS"),
            1,
            json!({ "peers": peers }),
        );
        self.send_envelope(&reply, dest).await;
    }

    /// Merge a peer list into the view. Malformed entries and our own
    /// address are skipped; a full view rejects the rest silently.
    async fn handle_peers_list(&self, msg: Envelope) {
        let payload: PeersPayload = match serde_json::from_value(msg.payload) {
            Ok(payload) => payload,
            Err(e) => {
                trace!(error = %e, "dropping malformed PEERS_LIST");
                return;
            }
        };
        let now = now_ms();
        let mut view = self.membership.lock().await;
        for entry in payload.peers {
            if entry.addr == self.self_addr {
                continue;
            }
            match entry.addr.parse::<SocketAddr>() {
                Ok(addr) => {
                    view.add(addr, now);
                }
                Err(_) => trace!(entry = %entry.addr, "skipping malformed peer entry"),
            }
        }
    }

    // ========================================================================
    // Gossip
    // ========================================================================

    async fn handle_gossip(&self, msg: Envelope, src: SocketAddr) {
        {
            let mut engine = self.engine.lock().await;
            if !engine.seen.mark_seen(&msg.msg_id) {
                trace!(id = %msg.msg_id, "duplicate gossip dropped");
                return;
            }
            engine.log.record(Event::Receive, "GOSSIP", &msg.msg_id);
            match messages::encode(&msg) {
                // Stored with the TTL as observed, for later IWANT service.
                Ok(bytes) => engine.store.insert(&msg.msg_id, bytes),
                Err(e) => warn!(error = %e, "gossip not stored for pull"),
            }
        }
        debug!(id = %msg.msg_id, from = %src, "gossip accepted");
        self.relay(&msg, Some(src)).await;
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    async fn handle_ping(&self, msg: Envelope, src: SocketAddr) {
        self.membership.lock().await.add(src, now_ms());
        let pong = self.envelope(
            MsgType::Pong,
            fresh_msg_id("PONG"),
            1,
            json!({ "reply_to": msg.msg_id }),
        );
        self.send_envelope(&pong, src).await;
    }

    async fn handle_pong(&self, src: SocketAddr) {
        self.membership.lock().await.add(src, now_ms());
    }

    async fn ping_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.ping_interval) => {}
            }

            let targets = {
                let mut view = self.membership.lock().await;
                view.sample(self.config.fanout, None)
            };
            for dest in targets {
                let msg_id = fresh_msg_id("PING");
                let ping = self.envelope(
                    MsgType::Ping,
                    msg_id.clone(),
                    1,
                    json!({ "ping_id": msg_id }),
                );
                self.send_envelope(&ping, dest).await;
            }

            let timeout_ms = self.config.peer_timeout.as_millis() as u64;
            let removed = {
                let mut view = self.membership.lock().await;
                view.expire(now_ms(), timeout_ms)
            };
            for peer in removed {
                info!(%peer, "peer timed out, removed from view");
            }
        }
    }

    // ========================================================================
    // Hybrid push-pull
    // ========================================================================

    /// Periodically advertise the most recently seen ids so peers the push
    /// missed can pull the full messages.
    async fn pull_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.pull_interval) => {}
            }

            let ids = {
                let engine = self.engine.lock().await;
                engine.seen.recent_ids(self.config.max_ihave_ids)
            };
            if ids.is_empty() {
                continue;
            }

            let ihave = self.envelope(
                MsgType::Ihave,
                fresh_msg_id("IHAVE"),
                1,
                json!({ "ids": ids, "max_ids": self.config.max_ihave_ids }),
            );
            let targets = {
                let mut view = self.membership.lock().await;
                view.sample(self.config.fanout, None)
            };
            let bytes = match messages::encode(&ihave) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "dropping unencodable IHAVE");
                    continue;
                }
            };
            for dest in targets {
                self.send_raw(&bytes, dest, "IHAVE", &ihave.msg_id).await;
            }
        }
    }

    /// A peer advertised ids. Request the ones we have not seen; ids we
    /// already have generate nothing, duplicates within one digest are
    /// tolerated.
    async fn handle_ihave(&self, msg: Envelope, src: SocketAddr) {
        let payload: IhavePayload = match serde_json::from_value(msg.payload) {
            Ok(payload) => payload,
            Err(e) => {
                trace!(error = %e, "dropping malformed IHAVE");
                return;
            }
        };
        let missing: Vec<String> = {
            let engine = self.engine.lock().await;
            let mut missing = Vec::new();
            for id in payload.ids {
                if !engine.seen.contains(&id) && !missing.contains(&id) {
                    missing.push(id);
                }
            }
            missing
        };
        if missing.is_empty() {
            return;
        }
        debug!(n = missing.len(), advertiser = %src, "requesting unseen gossip");
        let iwant = self.envelope(
            MsgType::Iwant,
            fresh_msg_id("IWANT"),
            1,
            json!({ "ids": missing }),
        );
        self.send_envelope(&iwant, src).await;
    }

    /// A peer asked for full messages. Serve each hit with the exact bytes
    /// stored at first observation; evicted ids are silently skipped.
    async fn handle_iwant(&self, msg: Envelope, src: SocketAddr) {
        let payload: IwantPayload = match serde_json::from_value(msg.payload) {
            Ok(payload) => payload,
            Err(e) => {
                trace!(error = %e, "dropping malformed IWANT");
                return;
            }
        };
        for id in payload.ids {
            let stored = {
                let engine = self.engine.lock().await;
                engine.store.lookup(&id).map(|bytes| bytes.to_vec())
            };
            match stored {
                Some(bytes) => self.send_raw(&bytes, src, "GOSSIP", &id).await,
                None => trace!(%id, "IWANT miss, id evicted or never stored"),
            }
        }
    }
}
