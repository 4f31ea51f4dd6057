// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic directory: multicast discovery of named endpoints.
//!
//! ```text
//!  observe("cam") --> TopicStore --missing()--> QueryScheduler --> S cam
//!                        ^                                          |
//!                        |  add()                        multicast  v
//!  handler(name, owners) +<---- Gossip <-- A cam PUB tcp://... <-- peer
//! ```
//!
//! - [`TopicStore`]: local topics, network view and observers.
//! - [`Gossip`]: protocol state machine, no I/O.
//! - [`Directory`]: binds the socket and drives a `Gossip` from mio.
//! - [`AddressTracker`]: turns owner maps into connect/disconnect lists.

mod address;
mod gossip;
pub mod protocol;
mod scheduler;
mod service;
mod store;
mod topic;
mod tracker;

pub use address::{Address, NetworkIdentity};
pub use gossip::{generate_guid, Gossip, Outbound};
pub use scheduler::{search_batches, QueryScheduler};
pub use service::Directory;
pub use store::{ObserverRef, TopicEventHandler, TopicStore, WILDCARD};
pub use topic::{
    build_info, encode_types, newest_topic, parse_types, OwnerMap, Pattern, TopicPath,
    TopicRecord, NO_TYPES, TYPE_SEPARATOR,
};
pub use tracker::{AddressChanges, AddressTracker};
