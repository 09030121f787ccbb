//! # WEFT Core
//!
//! Core protocol engine for WEFT (Woven Ephemeral Frame Transport), the
//! message-transport layer of a serverless peer-to-peer mesh.
//!
//! This crate provides:
//! - Binary wire codec (fixed-offset header, big-endian fields)
//! - TTL-bounded flood routing with content-addressed deduplication
//! - Fragmentation and out-of-order reassembly of oversized payloads
//! - Peer table with bounded health scoring and blacklist state
//! - Abuse control (rate limiting, flood detection, exponential blacklists)
//! - The `MeshEngine` orchestrating the decode → admit → dedup → verify →
//!   decrypt → reassemble → route pipeline
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        MeshEngine                                │
//! │   (lifetime-scoped instance, owns all protocol state)           │
//! ├──────────────┬──────────────┬──────────────┬────────────────────┤
//! │  Flood       │  Dedup       │  Fragment    │  Abuse             │
//! │  Router      │  Cache       │  Store       │  Control           │
//! ├──────────────┴──────────────┴──────────────┴────────────────────┤
//! │                    Crypto Envelope (weft-crypto)                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                         Frames                                   │
//! │   (signed, payload-encrypted protocol data units)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod abuse;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod identity;
pub mod peer;
pub mod persistence;
pub mod router;
pub mod transport;

pub use abuse::{AbuseConfig, AbuseControl, AbuseMetrics, Admission};
pub use config::EngineConfig;
pub use dedup::{DedupCache, DedupConfig};
pub use engine::{Delivery, EngineStats, MeshEngine};
pub use error::{EngineError, FrameError};
pub use fragment::{FragmentChunk, FragmentConfig, FragmentError, Fragmenter};
pub use frame::{now_millis, Frame, FrameType, MessageId, PeerId};
pub use identity::Identity;
pub use peer::{Peer, PeerSnapshot};
pub use persistence::{MemoryStore, Persistence};
pub use router::{HeartbeatSchedule, RouterConfig, RoutingTable};
pub use transport::{Inbound, MeshFabric, MeshLink, Transport, TransportError};

/// Protocol version carried in every frame header
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed frame header size in bytes:
/// version(1) + type(1) + ttl(1) + sender(32) + recipient(32) +
/// message_id(16) + timestamp(8) + payload_len(2) + signature(65)
pub const FRAME_HEADER_SIZE: usize = 158;

/// Default hop budget for newly created frames
pub const DEFAULT_TTL: u8 = 7;

/// Largest payload a single frame may carry
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;
