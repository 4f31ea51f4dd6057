// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic registry: local advertisements, network view and observers.
//!
//! # Notification
//!
//! Every change of a name's owner map (insert, address update, removal,
//! eviction) calls the observers of that name, then the wildcard observers
//! (registered under `""`), with a snapshot of the full owner map. Handlers
//! are collected into a list before the first call.

use super::topic::{OwnerMap, TopicRecord};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Name under which wildcard observers register.
pub const WILDCARD: &str = "";

/// Called with a topic name and its current owner map.
pub type TopicEventHandler = Arc<dyn Fn(&str, &OwnerMap) + Send + Sync>;

/// Opaque token returned by [`TopicStore::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverRef(u64);

impl fmt::Display for ObserverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{:08x}", self.0)
    }
}

#[derive(Clone)]
struct Observer {
    reference: ObserverRef,
    handler: TopicEventHandler,
}

/// In-memory registry of topics and their observers.
pub struct TopicStore {
    guid: String,
    local: BTreeMap<String, TopicRecord>,
    network: BTreeMap<String, OwnerMap>,
    observers: BTreeMap<String, Vec<Observer>>,
    next_ref: u64,
}

impl TopicStore {
    /// Empty store for the node identified by `guid`.
    pub fn new(guid: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            local: BTreeMap::new(),
            network: BTreeMap::new(),
            observers: BTreeMap::new(),
            next_ref: 1,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Insert or refresh an advertisement. Returns `true` if it is local.
    ///
    /// An existing `(name, owner)` entry is only replaced when the address
    /// differs, so identical re-advertisements notify nobody.
    ///
    /// # Errors
    /// [`Error::DuplicateTopic`] if a local topic with that name exists.
    pub fn add(&mut self, topic: TopicRecord) -> Result<bool> {
        let is_local = topic.owner == self.guid;
        if is_local {
            if self.local.contains_key(&topic.name) {
                return Err(Error::DuplicateTopic(topic.name));
            }
            self.local.insert(topic.name.clone(), topic.clone());
        }

        let name = topic.name.clone();
        let owners = self.network.entry(name.clone()).or_default();
        let changed = match owners.get(&topic.owner) {
            Some(existing) => existing.address != topic.address,
            None => true,
        };
        if changed {
            owners.insert(topic.owner.clone(), topic);
            self.notify(&name);
        }
        Ok(is_local)
    }

    /// Drop `guid`'s advertisement of `name`. Returns `true` if a local
    /// topic was removed.
    pub fn remove(&mut self, guid: &str, name: &str) -> bool {
        let removed_local = guid == self.guid && self.local.remove(name).is_some();

        let Some(owners) = self.network.get_mut(name) else {
            return removed_local;
        };
        let changed = owners.remove(guid).is_some();
        let now_empty = owners.is_empty();
        if changed {
            self.notify(name);
        }
        if now_empty {
            self.network.remove(name);
        }
        removed_local
    }

    /// Drop every advertisement owned by `guid`. Returns the affected names.
    pub fn evict(&mut self, guid: &str) -> Vec<String> {
        let affected: Vec<String> = self
            .network
            .iter()
            .filter(|(_, owners)| owners.contains_key(guid))
            .map(|(name, _)| name.clone())
            .collect();

        for name in &affected {
            let now_empty = match self.network.get_mut(name) {
                Some(owners) => {
                    owners.remove(guid);
                    owners.is_empty()
                }
                None => continue,
            };
            self.notify(name);
            if now_empty {
                self.network.remove(name);
            }
        }
        if guid == self.guid {
            self.local.clear();
        }
        affected
    }

    /// Register `handler` for `name` (`""` for every topic).
    ///
    /// The handler is not called here; see [`call_immediate`](Self::call_immediate).
    pub fn observe(&mut self, name: &str, handler: TopicEventHandler) -> ObserverRef {
        let reference = ObserverRef(self.next_ref);
        self.next_ref += 1;
        self.observers
            .entry(name.to_string())
            .or_default()
            .push(Observer { reference, handler });
        reference
    }

    /// Remove a registration. Returns `false` if it was not found.
    pub fn unobserve(&mut self, name: &str, reference: ObserverRef) -> bool {
        let Some(list) = self.observers.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|obs| obs.reference != reference);
        let removed = list.len() != before;
        if list.is_empty() {
            self.observers.remove(name);
        }
        removed
    }

    /// Whether `reference` is still registered under `name`.
    pub fn is_observing(&self, name: &str, reference: ObserverRef) -> bool {
        self.observers
            .get(name)
            .map_or(false, |list| list.iter().any(|obs| obs.reference == reference))
    }

    /// Call `handler` with the current state of `name`.
    ///
    /// Nothing happens for an unknown name. The wildcard name calls the
    /// handler once per known topic.
    pub fn call_immediate(&self, name: &str, handler: &TopicEventHandler) {
        if name == WILDCARD {
            for (topic, owners) in &self.network {
                handler(topic, owners);
            }
        } else if let Some(owners) = self.network.get(name) {
            handler(name, owners);
        }
    }

    /// Observed names with no advertisement (wildcard excluded).
    pub fn missing(&self) -> BTreeSet<String> {
        self.observers
            .keys()
            .filter(|name| name.as_str() != WILDCARD && !self.network.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Number of names with at least one advertisement.
    pub fn len(&self) -> usize {
        self.network.len()
    }

    pub fn is_empty(&self) -> bool {
        self.network.is_empty()
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.network.contains_key(name)
    }

    pub fn find_local(&self, name: &str) -> Option<&TopicRecord> {
        self.local.get(name)
    }

    pub fn locals(&self) -> impl Iterator<Item = &TopicRecord> {
        self.local.values()
    }

    pub fn owners(&self, name: &str) -> Option<&OwnerMap> {
        self.network.get(name)
    }

    fn notify(&self, name: &str) {
        let empty = OwnerMap::new();
        let owners = self.network.get(name).unwrap_or(&empty);

        let handlers: Vec<TopicEventHandler> = self
            .observers
            .get(name)
            .into_iter()
            .chain(self.observers.get(WILDCARD))
            .flatten()
            .map(|obs| Arc::clone(&obs.handler))
            .collect();

        log::trace!(
            "[DIRECTORY] {} changed: {} owners, {} observers",
            name,
            owners.len(),
            handlers.len()
        );
        for handler in handlers {
            handler(name, owners);
        }
    }
}

impl fmt::Debug for TopicStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicStore")
            .field("guid", &self.guid)
            .field("local", &self.local.keys().collect::<Vec<_>>())
            .field("network", &self.network.keys().collect::<Vec<_>>())
            .field("observed", &self.observers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::topic::Pattern;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<(String, usize)>>>;

    fn topic(name: &str, owner: &str, address: &str) -> TopicRecord {
        TopicRecord::new(name, Pattern::Pub, address, BTreeSet::new(), BTreeSet::new(), owner)
    }

    fn recorder(tag: &'static str, log: &Log) -> TopicEventHandler {
        let log = Arc::clone(log);
        Arc::new(move |name: &str, owners: &OwnerMap| {
            log.lock().push((format!("{}:{}", tag, name), owners.len()));
        })
    }

    #[test]
    fn test_add_local_and_duplicate() {
        let mut store = TopicStore::new("me");
        assert!(store.add(topic("a", "me", "tcp://127.0.0.1:1")).expect("add"));
        assert!(!store.add(topic("a", "peer", "tcp://127.0.0.1:2")).expect("add"));
        assert!(matches!(
            store.add(topic("a", "me", "tcp://127.0.0.1:3")),
            Err(Error::DuplicateTopic(_))
        ));
        assert_eq!(store.local_len(), 1);
        assert_eq!(store.owners("a").map(OwnerMap::len), Some(2));
    }

    #[test]
    fn test_idempotent_readvertisement() {
        let mut store = TopicStore::new("me");
        let log: Log = Arc::default();
        store.observe("t", recorder("obs", &log));

        store.add(topic("t", "peer", "tcp://127.0.0.1:1")).expect("add");
        store.add(topic("t", "peer", "tcp://127.0.0.1:1")).expect("again");
        assert_eq!(log.lock().len(), 1);

        store.add(topic("t", "peer", "tcp://127.0.0.1:9")).expect("moved");
        assert_eq!(log.lock().len(), 2);
        assert_eq!(
            store.owners("t").and_then(|o| o.get("peer")).map(|t| t.address.as_str()),
            Some("tcp://127.0.0.1:9")
        );
    }

    #[test]
    fn test_specific_observers_before_wildcard() {
        let mut store = TopicStore::new("me");
        let log: Log = Arc::default();
        store.observe(WILDCARD, recorder("all", &log));
        store.observe("t", recorder("one", &log));

        store.add(topic("t", "peer", "tcp://127.0.0.1:1")).expect("add");
        store.add(topic("u", "peer", "tcp://127.0.0.1:1")).expect("add");
        assert_eq!(
            *log.lock(),
            vec![
                ("one:t".to_string(), 1),
                ("all:t".to_string(), 1),
                ("all:u".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_remove_notifies_with_empty_map_then_drops() {
        let mut store = TopicStore::new("me");
        let log: Log = Arc::default();
        store.add(topic("t", "me", "tcp://127.0.0.1:1")).expect("add");
        store.observe("t", recorder("obs", &log));

        assert!(!store.remove("peer", "t"));
        assert!(log.lock().is_empty());

        assert!(store.remove("me", "t"));
        assert_eq!(*log.lock(), vec![("obs:t".to_string(), 0)]);
        assert!(!store.has_topic("t"));
        assert!(store.find_local("t").is_none());
    }

    #[test]
    fn test_evict_only_owner() {
        let mut store = TopicStore::new("me");
        let log: Log = Arc::default();
        store.observe(WILDCARD, recorder("all", &log));
        store.add(topic("a", "g", "tcp://127.0.0.1:1")).expect("add");
        store.add(topic("b", "g", "tcp://127.0.0.1:2")).expect("add");
        store.add(topic("b", "h", "tcp://127.0.0.1:3")).expect("add");
        store.add(topic("c", "h", "tcp://127.0.0.1:4")).expect("add");
        log.lock().clear();

        let affected = store.evict("g");
        assert_eq!(affected, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            *log.lock(),
            vec![("all:a".to_string(), 0), ("all:b".to_string(), 1)]
        );
        assert!(!store.has_topic("a"));
        assert_eq!(store.owners("b").map(|o| o.contains_key("h")), Some(true));
        assert!(store.has_topic("c"));
        assert!(store.evict("nobody").is_empty());
    }

    #[test]
    fn test_missing() {
        let mut store = TopicStore::new("me");
        let log: Log = Arc::default();
        store.observe("A", recorder("a", &log));
        store.observe("B", recorder("b", &log));
        store.observe(WILDCARD, recorder("all", &log));
        store.add(topic("A", "peer", "tcp://127.0.0.1:1")).expect("add");
        assert_eq!(store.missing(), BTreeSet::from(["B".to_string()]));
    }

    #[test]
    fn test_unobserve() {
        let mut store = TopicStore::new("me");
        let log: Log = Arc::default();
        let first = store.observe("t", recorder("first", &log));
        let second = store.observe("t", recorder("second", &log));
        assert!(store.unobserve("t", first));
        assert!(!store.unobserve("t", first));
        assert!(!store.is_observing("t", first));
        assert!(store.is_observing("t", second));

        store.add(topic("t", "peer", "tcp://127.0.0.1:1")).expect("add");
        assert_eq!(*log.lock(), vec![("second:t".to_string(), 1)]);

        assert!(store.unobserve("t", second));
        assert!(store.missing().is_empty());
    }

    #[test]
    fn test_call_immediate() {
        let mut store = TopicStore::new("me");
        let log: Log = Arc::default();
        store.add(topic("a", "p", "tcp://127.0.0.1:1")).expect("add");
        store.add(topic("b", "p", "tcp://127.0.0.1:2")).expect("add");

        store.call_immediate("zzz", &recorder("x", &log));
        assert!(log.lock().is_empty());
        store.call_immediate("a", &recorder("x", &log));
        store.call_immediate(WILDCARD, &recorder("w", &log));
        assert_eq!(
            *log.lock(),
            vec![
                ("x:a".to_string(), 1),
                ("w:a".to_string(), 1),
                ("w:b".to_string(), 1)
            ]
        );
    }
}
