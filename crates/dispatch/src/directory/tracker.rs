// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observer-side connection bookkeeping.
//!
//! A client socket observing a topic connects to every address advertised
//! for it. `AddressTracker` turns successive owner maps into the connect and
//! disconnect calls the socket layer has to make.

use super::topic::{OwnerMap, Pattern};
use std::collections::BTreeSet;

/// Addresses to connect to and disconnect from after an owner map change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressChanges {
    pub connect: Vec<String>,
    pub disconnect: Vec<String>,
}

impl AddressChanges {
    pub fn is_empty(&self) -> bool {
        self.connect.is_empty() && self.disconnect.is_empty()
    }
}

/// Set of addresses a client is connected to for one topic.
#[derive(Debug, Clone)]
pub struct AddressTracker {
    topic: String,
    pattern: Option<Pattern>,
    addresses: BTreeSet<String>,
}

impl AddressTracker {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            pattern: None,
            addresses: BTreeSet::new(),
        }
    }

    /// Only follow advertisements whose pattern `pattern` can connect to.
    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn addresses(&self) -> &BTreeSet<String> {
        &self.addresses
    }

    /// At least `count` connections.
    pub fn is_connected(&self, count: usize) -> bool {
        self.addresses.len() >= count
    }

    /// Record a connection. Returns `false` if already connected.
    pub fn connect(&mut self, address: &str) -> bool {
        self.addresses.insert(address.to_string())
    }

    /// Forget a connection. Returns `false` if it was not connected.
    pub fn disconnect(&mut self, address: &str) -> bool {
        let removed = self.addresses.remove(address);
        if !removed {
            log::debug!("[DIRECTORY] {} already disconnected from {}", self.topic, address);
        }
        removed
    }

    /// Apply the current owner map and return what changed.
    ///
    /// Addresses new to the map are connected, addresses no longer in it are
    /// disconnected. Both lists are sorted.
    pub fn update(&mut self, owners: &OwnerMap) -> AddressChanges {
        let wanted: BTreeSet<&str> = owners
            .values()
            .filter(|topic| match self.pattern {
                Some(own) if !own.can_connect(topic.pattern) => {
                    log::debug!(
                        "[DIRECTORY] {} cannot connect to {} ({} @ {})",
                        own,
                        topic.pattern,
                        topic.name,
                        topic.address
                    );
                    false
                }
                _ => true,
            })
            .map(|topic| topic.address.as_str())
            .collect();

        let mut changes = AddressChanges::default();
        for address in &wanted {
            if !self.addresses.contains(*address) {
                changes.connect.push((*address).to_string());
            }
        }
        for address in &self.addresses {
            if !wanted.contains(address.as_str()) {
                changes.disconnect.push(address.clone());
            }
        }

        for address in &changes.connect {
            log::info!("[DIRECTORY] {} @ {}", self.topic, address);
            self.addresses.insert(address.clone());
        }
        for address in &changes.disconnect {
            log::info!("[DIRECTORY] {} !@ {}", self.topic, address);
            self.addresses.remove(address);
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::topic::TopicRecord;

    fn owners(entries: &[(&str, Pattern, &str)]) -> OwnerMap {
        entries
            .iter()
            .map(|(guid, pattern, address)| {
                (
                    guid.to_string(),
                    TopicRecord::new("t", *pattern, *address, Default::default(), Default::default(), *guid),
                )
            })
            .collect()
    }

    #[test]
    fn test_connects_then_disconnects() {
        let mut tracker = AddressTracker::new("t");
        let changes = tracker.update(&owners(&[
            ("a", Pattern::Pub, "tcp://10.0.0.1:1"),
            ("b", Pattern::Pub, "tcp://10.0.0.2:1"),
        ]));
        assert_eq!(changes.connect, vec!["tcp://10.0.0.1:1", "tcp://10.0.0.2:1"]);
        assert!(changes.disconnect.is_empty());
        assert!(tracker.is_connected(2));

        let changes = tracker.update(&owners(&[("b", Pattern::Pub, "tcp://10.0.0.2:1")]));
        assert!(changes.connect.is_empty());
        assert_eq!(changes.disconnect, vec!["tcp://10.0.0.1:1"]);

        assert!(tracker.update(&owners(&[("b", Pattern::Pub, "tcp://10.0.0.2:1")])).is_empty());
        let changes = tracker.update(&OwnerMap::new());
        assert_eq!(changes.disconnect, vec!["tcp://10.0.0.2:1"]);
        assert!(!tracker.is_connected(1));
    }

    #[test]
    fn test_shared_address_connects_once() {
        let mut tracker = AddressTracker::new("t");
        let changes = tracker.update(&owners(&[
            ("a", Pattern::Pub, "tcp://10.0.0.1:1"),
            ("b", Pattern::Pub, "tcp://10.0.0.1:1"),
        ]));
        assert_eq!(changes.connect.len(), 1);
    }

    #[test]
    fn test_pattern_filter() {
        let mut tracker = AddressTracker::new("t").with_pattern(Pattern::Sub);
        let changes = tracker.update(&owners(&[
            ("a", Pattern::Pub, "tcp://10.0.0.1:1"),
            ("b", Pattern::Rep, "tcp://10.0.0.2:1"),
        ]));
        assert_eq!(changes.connect, vec!["tcp://10.0.0.1:1"]);
    }

    #[test]
    fn test_manual_connect() {
        let mut tracker = AddressTracker::new("t");
        assert!(tracker.connect("tcp://h:1"));
        assert!(!tracker.connect("tcp://h:1"));
        assert!(tracker.disconnect("tcp://h:1"));
        assert!(!tracker.disconnect("tcp://h:1"));
    }
}
