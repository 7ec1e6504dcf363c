//! The subscription graph: peers, channels, and the edges between them.
//!
//! `Engine` is a cheaply-clonable handle (an `Arc` around a single `Mutex`-guarded
//! `State`) so it can be handed to every connection task. Every graph mutation is a
//! plain synchronous method taken while holding the lock — nothing here ever awaits,
//! so the lock is never held across a suspension point.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Channel every peer is auto-subscribed to on connect.
pub const ALL_CHANNEL: &str = "all";

/// Stable per-connection identity. In practice the raw fd of the socket.
pub type PeerId = u64;

#[derive(Debug)]
struct PeerEntry {
    tx: UnboundedSender<Bytes>,
    addr: SocketAddr,
    subscriptions: HashSet<String>,
}

#[derive(Debug, Default)]
struct State {
    peers: HashMap<PeerId, PeerEntry>,
    channels: HashMap<String, HashSet<PeerId>>,
    high_water_mark: usize,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    announcements: AtomicU64,
    messages: AtomicU64,
    subscribes: AtomicU64,
    unsubscribes: AtomicU64,
    pings: AtomicU64,
    client_limit_rejections: AtomicU64,
}

/// Bump a wraparound counter, logging once when it rolls over to zero.
///
/// `AtomicU64::fetch_add` already wraps on overflow; this only adds the
/// warning the wraparound is documented to produce.
fn bump(counter: &AtomicU64) {
    let prev = counter.fetch_add(1, Ordering::Relaxed);
    if prev == u64::MAX {
        warn!("counter wrapped around to zero");
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    counters: Counters,
    started_at: Instant,
    /// 0 means unlimited.
    client_limit: usize,
    soft_rlimit: u64,
    hard_rlimit: u64,
}

/// Cloning `Engine` is shallow and only incurs an atomic ref count increment.
#[derive(Debug, Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

/// A point-in-time view of the counters and graph sizes, used to render `info`.
#[derive(Debug)]
pub struct Snapshot {
    pub uptime_secs: u64,
    pub client_limit: usize,
    pub client_limit_rejections: u64,
    pub soft_rlimit: u64,
    pub hard_rlimit: u64,
    pub high_water_mark: usize,
    pub current_connections: usize,
    pub current_channels: usize,
    pub current_subscriptions: usize,
    pub total_connections: u64,
    pub total_announcements: u64,
    pub total_messages: u64,
    pub total_subscribes: u64,
    pub total_unsubscribes: u64,
    pub total_pings: u64,
}

impl Engine {
    pub fn new(client_limit: usize, soft_rlimit: u64, hard_rlimit: u64) -> Engine {
        Engine {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                counters: Counters::default(),
                started_at: Instant::now(),
                client_limit,
                soft_rlimit,
                hard_rlimit,
            }),
        }
    }

    /// Current number of live peers. Used by the accept loop's admission check.
    pub fn client_count(&self) -> usize {
        self.shared.state.lock().unwrap().peers.len()
    }

    /// Atomically check the admission limit and register the peer if it fits.
    ///
    /// Returns `false` (without mutating anything) if the limit is positive and
    /// already reached; the caller is responsible for sending `debug!busy` and
    /// closing the socket in that case.
    pub fn try_admit(&self, id: PeerId, addr: SocketAddr, tx: UnboundedSender<Bytes>) -> bool {
        let mut state = self.shared.state.lock().unwrap();

        let limit = self.shared.client_limit;
        if limit > 0 && state.peers.len() >= limit {
            self.shared.counters.client_limit_rejections.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        state.peers.insert(
            id,
            PeerEntry {
                tx,
                addr,
                subscriptions: HashSet::new(),
            },
        );

        if state.peers.len() > state.high_water_mark {
            state.high_water_mark = state.peers.len();
        }

        bump(&self.shared.counters.connections);
        info!(%addr, "peer connected");
        true
    }

    /// Subscribe `id` to `name`. Idempotent.
    pub fn subscribe(&self, id: PeerId, name: &str) {
        let mut state = self.shared.state.lock().unwrap();

        let Some(peer) = state.peers.get_mut(&id) else {
            return;
        };
        if !peer.subscriptions.insert(name.to_string()) {
            // Already subscribed; nothing to do.
            return;
        }

        state
            .channels
            .entry(name.to_string())
            .or_insert_with(HashSet::new)
            .insert(id);

        bump(&self.shared.counters.subscribes);
    }

    /// Unsubscribe `id` from `name`. A no-op if either is absent.
    pub fn unsubscribe(&self, id: PeerId, name: &str) {
        let mut state = self.shared.state.lock().unwrap();

        let had_edge = state
            .peers
            .get_mut(&id)
            .map(|peer| peer.subscriptions.remove(name))
            .unwrap_or(false);

        if !had_edge {
            return;
        }

        if let Some(subscribers) = state.channels.get_mut(name) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                state.channels.remove(name);
            }
        }

        bump(&self.shared.counters.unsubscribes);
    }

    /// Deliver `body` to every current subscriber of `name`.
    ///
    /// A no-op if the channel has no subscribers or the body is empty. Returns
    /// the number of peers the message was actually enqueued to.
    pub fn announce(&self, name: &str, body: &[u8]) -> usize {
        if body.is_empty() {
            return 0;
        }

        let state = self.shared.state.lock().unwrap();

        let Some(subscribers) = state.channels.get(name) else {
            return 0;
        };
        if subscribers.is_empty() {
            return 0;
        }

        let mut line = Vec::with_capacity(name.len() + body.len() + 2);
        line.extend_from_slice(name.as_bytes());
        line.push(b'!');
        line.extend_from_slice(body);
        line.push(b'\n');
        let line = Bytes::from(line);

        let mut delivered = 0;
        for peer_id in subscribers {
            if let Some(peer) = state.peers.get(peer_id) {
                if peer.tx.send(line.clone()).is_ok() {
                    delivered += 1;
                    bump(&self.shared.counters.messages);
                }
            }
        }

        bump(&self.shared.counters.announcements);
        delivered
    }

    /// Tear down every subscription owned by `id`, then forget the peer.
    pub fn disconnect(&self, id: PeerId) {
        let mut state = self.shared.state.lock().unwrap();

        let Some(peer) = state.peers.remove(&id) else {
            return;
        };

        for channel in peer.subscriptions {
            if let Some(subscribers) = state.channels.get_mut(&channel) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    state.channels.remove(&channel);
                }
            }
        }

        info!(addr = %peer.addr, "peer disconnected");
    }

    pub fn bump_pings(&self) {
        bump(&self.shared.counters.pings);
    }

    /// Enqueue `bytes` directly on one peer's outbound queue, bypassing the
    /// channel fanout. Used for unicast replies to `ping`/`info`.
    pub fn send_direct(&self, id: PeerId, bytes: Bytes) {
        let state = self.shared.state.lock().unwrap();
        if let Some(peer) = state.peers.get(&id) {
            let _ = peer.tx.send(bytes);
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.shared.state.lock().unwrap();

        let current_connections = state.peers.len();
        let current_channels = state.channels.len();
        let current_subscriptions: usize = state.channels.values().map(HashSet::len).sum();

        Snapshot {
            uptime_secs: self.shared.started_at.elapsed().as_secs(),
            client_limit: self.shared.client_limit,
            client_limit_rejections: self.shared.counters.client_limit_rejections.load(Ordering::Relaxed),
            soft_rlimit: self.shared.soft_rlimit,
            hard_rlimit: self.shared.hard_rlimit,
            high_water_mark: state.high_water_mark,
            current_connections,
            current_channels,
            current_subscriptions,
            total_connections: self.shared.counters.connections.load(Ordering::Relaxed),
            total_announcements: self.shared.counters.announcements.load(Ordering::Relaxed),
            total_messages: self.shared.counters.messages.load(Ordering::Relaxed),
            total_subscribes: self.shared.counters.subscribes.load(Ordering::Relaxed),
            total_unsubscribes: self.shared.counters.unsubscribes.load(Ordering::Relaxed),
            total_pings: self.shared.counters.pings.load(Ordering::Relaxed),
        }
    }
}
