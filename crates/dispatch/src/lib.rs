// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # dispatch - brokerless topic discovery and pooled message framing
//!
//! Nodes on one subnet find each other's endpoints ("topics") through a small
//! UDP multicast gossip protocol, then exchange schema-tagged multi-part
//! messages built from pooled, word-aligned segments.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |              Socket wrappers (pub/sub/req/rep, external)            |
//! |          observe()/unobserve()        add()/remove()                |
//! +---------------------------------------------------------------------+
//! |  Directory (mio loop)  ->  Gossip (sans-IO)  ->  TopicStore          |
//! |        UDP multicast          A / S / X / R        observers         |
//! +---------------------------------------------------------------------+
//! |  MessageBuilder / MessageReader  (segment table + type id frame)    |
//! +---------------------------------------------------------------------+
//! |  BufferPool  (fixed slots, ring freelist, heap fallback)            |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dispatch::{Directory, DirectoryConfig, NetworkIdentity, Pattern};
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> dispatch::Result<()> {
//!     let config = DirectoryConfig::from_env();
//!     let identity = Arc::new(NetworkIdentity::from_config(&config));
//!     let mut directory = Directory::new("camera", config, identity)?;
//!
//!     let guid = directory.guid().to_string();
//!     directory.add(
//!         "robot1/camera/frames",
//!         Pattern::Pub,
//!         "tcp://10.0.0.5:40404",
//!         &BTreeSet::new(),
//!         &BTreeSet::new(),
//!         &guid,
//!     )?;
//!
//!     directory.observe(
//!         "robot1/planner/goal",
//!         Arc::new(|name: &str, owners: &dispatch::OwnerMap| {
//!             println!("{} now has {} owners", name, owners.len());
//!         }),
//!     );
//!
//!     directory.run_for(Duration::from_secs(5))
//! }
//! ```

/// Constants and runtime configuration (ports, multicast group, query timing).
pub mod config;
/// Topic registry, gossip protocol and the multicast directory service.
pub mod directory;
/// Error type shared by all modules.
pub mod error;
/// Fixed-size buffer pool with heap fallback.
pub mod pool;
/// Multicast socket construction and interface helpers.
pub mod transport;
/// Segment-framed, type-tagged multi-part messages.
pub mod wire;

pub use config::{DirectoryConfig, QueryConfig};
pub use directory::{
    newest_topic, Address, AddressChanges, AddressTracker, Directory, Gossip, NetworkIdentity, ObserverRef,
    OwnerMap, Pattern, TopicEventHandler, TopicPath, TopicRecord, TopicStore,
};
pub use error::{Error, Result};
pub use pool::{BufferPool, PoolBuffer};
pub use wire::{
    id_from_message, type_of, Frame, MessageBuilder, MessageReader, Schema, SegmentReader,
    SegmentWriter, SmartMessageReader,
};
