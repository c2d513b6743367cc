//! # minizab
//!
//! A minimal coordination-service node replicating an ordered log of ZNode
//! metadata records with a ZooKeeper-style atomic broadcast:
//! - one leader, every other member follows
//! - client writes are admitted in client-timestamp order and forwarded to the leader
//! - the leader commits each write with a two-phase propose/acknowledge/commit round
//! - joining and recovering members catch up with a majority sync round
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!   client write
//!        │
//! ┌──────▼───────────┐  forward   ┌──────────────────┐
//! │ Follower B       ├───────────►│ Leader A          │
//! │  ordering queue  │            │  ordering queue   │
//! └──────────────────┘            │  proposal round   │
//!        ▲   ▲                    └──┬─────────────┬──┘
//!        │   └─ propose/commit ──────┘             │ propose/commit
//!        │                                         ▼
//!        └──────────── sync ─────────────  ┌────────────────┐
//!                                          │ Follower C     │
//!                                          └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a three-node ensemble
//! ```bash
//! minizab-node serve --id 127.0.0.1:7000 --bind 127.0.0.1:7000 \
//!   --servers 127.0.0.1:7000,127.0.0.1:7001,127.0.0.1:7002 --leader 127.0.0.1:7000
//! minizab-node serve --id 127.0.0.1:7001 --bind 127.0.0.1:7001 \
//!   --servers 127.0.0.1:7000,127.0.0.1:7001,127.0.0.1:7002 --leader 127.0.0.1:7000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minizab --node 127.0.0.1:7001 put --payload '{"path":"/app/config"}'
//! minizab --node 127.0.0.1:7002 records
//! minizab --node 127.0.0.1:7002 sync
//! ```

pub mod common;
pub mod ops;
pub mod zab;
pub mod ztree;

// Re-export commonly used types
pub use common::{Config, Error, NodeConfig, Result};
pub use zab::{AtomicBroadcast, ZabNode, ZabServer};
pub use ztree::{Metadata, MetadataStore};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
