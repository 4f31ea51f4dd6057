// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sans-IO discovery engine.
//!
//! `Gossip` owns the topic store, the SEARCH scheduler and the send buffers,
//! but no socket: the caller feeds received datagrams and the current time,
//! fires the timer and drains the outbox.
//!
//! ```text
//! handle_datagram(bytes, now) --parse--> Command --> TopicStore / replies
//! on_timer(now) -----------------------> SEARCH batches (backoff)
//! run_deferred() ----------------------> first call of new observers
//! outbox (PoolBuffer) -----------------> driver socket, partial writes resumed
//! ```

use super::address::{Address, NetworkIdentity};
use super::protocol::{self, Command, CommandCode, DatagramWriter, ProtocolError, SEARCH_ALL};
use super::scheduler::{search_batches, QueryScheduler};
use super::store::{ObserverRef, TopicEventHandler, TopicStore};
use super::topic::{Pattern, TopicRecord, TYPE_SEPARATOR};
use crate::config::{DirectoryConfig, PROTOCOL_PREFIX};
use crate::error::{Error, Result};
use crate::pool::{BufferPool, PoolBuffer};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Datagram waiting to be sent. `sent` advances on partial writes.
pub struct Outbound {
    buf: PoolBuffer,
    len: usize,
    sent: usize,
}

impl Outbound {
    /// Bytes not yet written.
    pub fn remaining(&self) -> &[u8] {
        &self.buf[self.sent..self.len]
    }

    /// Record `n` more bytes written.
    pub fn advance(&mut self, n: usize) {
        self.sent = (self.sent + n).min(self.len);
    }

    pub fn is_done(&self) -> bool {
        self.sent >= self.len
    }

    /// Full datagram.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Outbound({:?}, {}/{})",
            String::from_utf8_lossy(self.as_bytes()),
            self.sent,
            self.len
        )
    }
}

struct Deferred {
    name: String,
    reference: ObserverRef,
    handler: TopicEventHandler,
}

/// `<name>_<ip>_<32 hex>`
pub fn generate_guid(name: &str, identity: &NetworkIdentity) -> String {
    format!(
        "{}_{}_{:016x}{:016x}",
        name,
        identity.address,
        fastrand::u64(..),
        fastrand::u64(..)
    )
}

/// Discovery state machine of one node.
pub struct Gossip {
    guid: String,
    identity: Arc<NetworkIdentity>,
    config: DirectoryConfig,
    store: TopicStore,
    scheduler: QueryScheduler,
    pool: BufferPool,
    outbox: VecDeque<Outbound>,
    deferred: VecDeque<Deferred>,
}

impl Gossip {
    /// Engine with a freshly generated guid.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(name: &str, config: DirectoryConfig, identity: Arc<NetworkIdentity>) -> Result<Self> {
        let guid = generate_guid(name, &identity);
        Self::with_guid(guid, config, identity)
    }

    /// Engine with a caller-chosen guid.
    pub fn with_guid(
        guid: impl Into<String>,
        config: DirectoryConfig,
        identity: Arc<NetworkIdentity>,
    ) -> Result<Self> {
        config.validate()?;
        let guid = guid.into();
        if guid.is_empty() || guid.contains(' ') {
            return Err(Error::InvalidConfig(format!("invalid guid '{}'", guid)));
        }
        let pool = BufferPool::new(config.send_pool_count, config.max_datagram)?;
        Ok(Self {
            store: TopicStore::new(guid.clone()),
            scheduler: QueryScheduler::new(config.query.clone()),
            guid,
            identity,
            config,
            pool,
            outbox: VecDeque::new(),
            deferred: VecDeque::new(),
        })
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn identity(&self) -> &NetworkIdentity {
        &self.identity
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn store(&self) -> &TopicStore {
        &self.store
    }

    // ========================================================================
    // Registration / observation
    // ========================================================================

    /// Register a topic. Returns `true` if `owner` is this node, in which case
    /// an AVAILABLE is queued.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if the name, address or a type id is not a
    /// single printable token, [`Error::DuplicateTopic`] for a second local
    /// topic of the same name, [`Error::DatagramTooLarge`] if its
    /// advertisement cannot be sent.
    pub fn add(
        &mut self,
        name: &str,
        pattern: Pattern,
        address: &str,
        input_types: &BTreeSet<String>,
        output_types: &BTreeSet<String>,
        owner: &str,
    ) -> Result<bool> {
        check_token("topic name", name)?;
        check_token("address", address)?;
        for id in input_types.iter().chain(output_types) {
            check_token("type id", id)?;
            if id.contains(TYPE_SEPARATOR) {
                return Err(Error::InvalidConfig(format!(
                    "type id '{}' contains '{}'",
                    id, TYPE_SEPARATOR
                )));
            }
        }
        let topic = TopicRecord::new(
            name,
            pattern,
            address,
            input_types.clone(),
            output_types.clone(),
            owner,
        );
        self.add_record(topic)
    }

    fn add_record(&mut self, topic: TopicRecord) -> Result<bool> {
        let is_local = topic.owner == self.guid;
        if is_local {
            let needed = self.header_len() + 1 + topic.info.len();
            if needed > self.config.max_datagram {
                return Err(Error::DatagramTooLarge(needed));
            }
        }

        let summary = if log::log_enabled!(log::Level::Debug) {
            topic.to_string()
        } else {
            String::new()
        };
        let info = topic.info.clone();

        if self.store.add(topic)? {
            self.queue(CommandCode::Available, &[&info]);
            log::debug!("[DIRECTORY] registered {}", summary);
            Ok(true)
        } else {
            log::debug!("[DIRECTORY] added {}", summary);
            Ok(false)
        }
    }

    /// Retract a local topic. Returns `true` (and queues a REMOVE) if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let guid = self.guid.clone();
        if self.store.remove(&guid, name) {
            self.queue(CommandCode::Remove, &[name]);
            log::debug!("[DIRECTORY] removed topic {}", name);
            true
        } else {
            false
        }
    }

    /// Observe `name` (`""` for all). The handler gets the current state on
    /// the next [`run_deferred`](Self::run_deferred), then every change.
    pub fn observe(&mut self, name: &str, handler: TopicEventHandler, now: Instant) -> ObserverRef {
        let reference = self.store.observe(name, Arc::clone(&handler));
        self.deferred.push_back(Deferred {
            name: name.to_string(),
            reference,
            handler,
        });
        self.scheduler.restart(now);
        reference
    }

    pub fn unobserve(&mut self, name: &str, reference: ObserverRef, now: Instant) -> bool {
        let removed = self.store.unobserve(name, reference);
        self.scheduler.restart(now);
        removed
    }

    /// Run the immediate calls posted by `observe`. Calls posted while
    /// running wait for the next invocation.
    pub fn run_deferred(&mut self) -> usize {
        let batch: Vec<Deferred> = self.deferred.drain(..).collect();
        let mut ran = 0;
        for call in batch {
            if !self.store.is_observing(&call.name, call.reference) {
                log::trace!("[DIRECTORY] observer {} gone before first call", call.reference);
                continue;
            }
            self.store.call_immediate(&call.name, &call.handler);
            ran += 1;
        }
        ran
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    // ========================================================================
    // Timer
    // ========================================================================

    /// When [`on_timer`](Self::on_timer) next has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.deadline()
    }

    /// Fire the SEARCH timer if due. Returns the number of SEARCH datagrams queued.
    pub fn on_timer(&mut self, now: Instant) -> usize {
        if !self.scheduler.is_due(now) {
            return 0;
        }
        let missing = self.store.missing();
        if !self.scheduler.fire(now, !missing.is_empty()) {
            log::trace!("[GOSSIP] nothing missing, query timer idle");
            return 0;
        }

        let batches = search_batches(
            missing.iter().map(String::as_str),
            self.header_len(),
            self.config.max_datagram,
            self.config.query.max_names_per_search,
        );
        for batch in &batches {
            self.queue(CommandCode::Search, batch);
        }
        log::debug!(
            "[GOSSIP] searching {} topics in {} datagrams, next in {:?}",
            missing.len(),
            batches.len(),
            self.scheduler.interval()
        );
        batches.len()
    }

    // ========================================================================
    // Receive
    // ========================================================================

    /// Process one received datagram. Malformed input is logged and dropped.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) {
        let message = match protocol::parse(datagram) {
            Ok(message) => message,
            Err(e @ ProtocolError::NonPrintable { .. }) => {
                log::warn!("[GOSSIP] dropping datagram: {}", e);
                return;
            }
            Err(e) => {
                log::trace!(
                    "[GOSSIP] ignoring event ({}): {}",
                    e,
                    String::from_utf8_lossy(datagram)
                );
                return;
            }
        };

        if message.sender == self.guid {
            return;
        }
        log::trace!("[GOSSIP] received \"{}\"", String::from_utf8_lossy(datagram));

        let sender = message.sender;
        match message.command {
            Command::Available(adv) => {
                let address = Address::parse(adv.address);
                if !self.identity.accepts(&address) {
                    log::info!(
                        "[GOSSIP] ignoring topic from other network: {} {}",
                        adv.name,
                        adv.address
                    );
                    return;
                }
                let topic = TopicRecord::new(
                    adv.name,
                    adv.pattern,
                    adv.address,
                    adv.input_types,
                    adv.output_types,
                    sender,
                );
                if let Err(e) = self.add_record(topic) {
                    log::debug!("[GOSSIP] rejected AVAILABLE from {}: {}", sender, e);
                }
            }
            Command::Search(names) => self.answer_search(&names),
            Command::Exit => {
                let affected = self.store.evict(sender);
                self.scheduler.restart(now);
                log::debug!(
                    "[GOSSIP] {} exited, {} topics evicted, {} remaining",
                    sender,
                    affected.len(),
                    self.store.len()
                );
            }
            Command::Remove(name) => {
                self.store.remove(sender, name);
                self.scheduler.restart(now);
            }
        }
    }

    fn answer_search(&mut self, names: &[&str]) {
        let mut replies: Vec<String> = Vec::new();
        for name in names {
            if *name == SEARCH_ALL {
                replies.extend(self.store.locals().map(|t| t.info.clone()));
            } else if let Some(topic) = self.store.find_local(name) {
                replies.push(topic.info.clone());
            }
        }
        for info in &replies {
            self.queue(CommandCode::Available, &[info]);
        }
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// `DISPATCH <guid> <code>`
    fn header_len(&self) -> usize {
        PROTOCOL_PREFIX.len() + 1 + self.guid.len() + 2
    }

    fn queue(&mut self, code: CommandCode, args: &[&str]) {
        let mut buf = self.pool.malloc();
        let len = {
            let Some(mut writer) = DatagramWriter::new(&mut buf[..], &self.guid, code) else {
                log::error!("[GOSSIP] guid too long for a {} byte datagram", self.config.max_datagram);
                return;
            };
            for arg in args {
                if !writer.push(arg) {
                    log::error!(
                        "[GOSSIP] {} datagram too large, dropped",
                        code.as_char()
                    );
                    return;
                }
            }
            writer.len()
        };
        let out = Outbound { buf, len, sent: 0 };
        log::debug!("[GOSSIP] sending \"{}\"", String::from_utf8_lossy(out.as_bytes()));
        self.outbox.push_back(out);
    }

    /// Oldest datagram not yet fully sent.
    pub fn front_outbound(&mut self) -> Option<&mut Outbound> {
        self.outbox.front_mut()
    }

    /// Remove the oldest datagram; its buffer returns to the pool on drop.
    pub fn pop_outbound(&mut self) -> Option<Outbound> {
        self.outbox.pop_front()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbox.len()
    }

    /// Take every queued datagram as owned bytes.
    pub fn drain_outbound(&mut self) -> Vec<Vec<u8>> {
        self.outbox
            .drain(..)
            .map(|out| out.remaining().to_vec())
            .collect()
    }

    /// EXIT datagram, built outside the pool for the shutdown path.
    pub fn exit_datagram(&self) -> Vec<u8> {
        format!("{} {} {}", PROTOCOL_PREFIX, self.guid, CommandCode::Exit.as_char()).into_bytes()
    }
}

/// Gossip fields are space separated printable ASCII.
fn check_token(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidConfig(format!("empty {}", what)));
    }
    if let Some(byte) = value.bytes().find(|b| !b.is_ascii_graphic()) {
        return Err(Error::InvalidConfig(format!(
            "{} {:?} contains byte 0x{:02x}",
            what, value, byte
        )));
    }
    Ok(())
}

impl fmt::Debug for Gossip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gossip")
            .field("guid", &self.guid)
            .field("store", &self.store)
            .field("query_deadline", &self.scheduler.deadline())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}
