//! # Rumornet - UDP Epidemic Gossip Dissemination
//!
//! Rumornet is a small peer-to-peer gossip node for cooperative overlays
//! on unreliable datagram transport:
//!
//! - **Membership**: bounded, self-healing partial view maintained by
//!   PING/PONG liveness probes and peer exchange
//! - **Gossip engine**: seen-set deduplication and TTL-bounded flooding
//!   with configurable fanout
//! - **Hybrid push-pull**: eager push plus lazy pull via IHAVE digest
//!   advertisements and IWANT solicitations
//! - **Admission PoW**: a SHA-256 puzzle attached to HELLO that receivers
//!   verify before accepting a new peer
//!
//! ## Architecture
//!
//! One node runs three background tasks (listener, ping, optional pull)
//! over a single UDP socket. Shared state sits behind two locks, the
//! engine lock and the membership lock, and neither is ever held across
//! socket I/O. Shutdown is a cancellation channel every task selects on.
//!
//! The network is treated as lossy end to end: nothing is retried at the
//! engine layer, because epidemic propagation itself is the retry
//! mechanism.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `node` | High-level API: bind, bootstrap, run, inject, shutdown |
//! | `identity` | Node identity and the admission Proof-of-Work puzzle |
//! | `membership` | Bounded partial view with seeded random sampling |
//! | `engine` | Seen-set and gossip store rings |
//! | `messages` | JSON wire envelope, typed payloads, bounded codec |
//! | `events` | Append-only SEND/RECEIVE event log |

mod engine;
mod events;
pub mod identity;
mod membership;
pub mod messages;
mod node;

pub use node::{
    Node, NodeConfig, DEFAULT_FANOUT, DEFAULT_MAX_IHAVE_IDS, DEFAULT_PEER_LIMIT,
    DEFAULT_PEER_TIMEOUT_SECS, DEFAULT_PING_INTERVAL_SECS, DEFAULT_SEED, DEFAULT_TTL,
};
