// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket-driven directory node.
//!
//! `Directory` binds the multicast socket and drives a [`Gossip`] engine from
//! a mio poll loop on the calling thread. Nothing runs in the background:
//! datagrams, the SEARCH timer and deferred observer calls are only processed
//! inside [`turn`](Directory::turn) and the `run_*` helpers.

use super::address::NetworkIdentity;
use super::gossip::Gossip;
use super::store::{ObserverRef, TopicEventHandler, TopicStore};
use super::topic::Pattern;
use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::transport::bind_multicast;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SOCKET_TOKEN: Token = Token(0);

/// Consecutive receive failures tolerated in one drain.
const MAX_RECV_ERRORS: usize = 8;

/// Discovery node bound to the directory multicast group.
pub struct Directory {
    gossip: Gossip,
    poll: Poll,
    events: Events,
    socket: UdpSocket,
    group: SocketAddr,
    recv_buf: Vec<u8>,
    interest: Interest,
}

impl Directory {
    /// Bind the directory socket and create the node `name`.
    ///
    /// # Errors
    /// [`crate::Error::InvalidConfig`], [`crate::Error::BindFailed`] or
    /// [`crate::Error::MulticastJoinFailed`]; all are fatal at startup.
    pub fn new(name: &str, config: DirectoryConfig, identity: Arc<NetworkIdentity>) -> Result<Self> {
        config.validate()?;
        let bound = bind_multicast(&config, &identity)?;
        let recv_buf = vec![0u8; config.max_datagram];
        let gossip = Gossip::new(name, config, identity)?;

        let poll = Poll::new()?;
        let mut socket = UdpSocket::from_std(bound.socket);
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;

        log::info!("[DIRECTORY] {} joined {}", gossip.guid(), bound.group);
        Ok(Self {
            gossip,
            poll,
            events: Events::with_capacity(16),
            socket,
            group: bound.group,
            recv_buf,
            interest: Interest::READABLE,
        })
    }

    pub fn guid(&self) -> &str {
        self.gossip.guid()
    }

    pub fn identity(&self) -> &NetworkIdentity {
        self.gossip.identity()
    }

    pub fn store(&self) -> &TopicStore {
        self.gossip.store()
    }

    /// Multicast destination of outgoing gossip.
    pub fn group(&self) -> SocketAddr {
        self.group
    }

    /// See [`Gossip::add`]. The AVAILABLE goes out immediately when the
    /// socket accepts it.
    pub fn add(
        &mut self,
        name: &str,
        pattern: Pattern,
        address: &str,
        input_types: &BTreeSet<String>,
        output_types: &BTreeSet<String>,
        owner: &str,
    ) -> Result<bool> {
        let is_local = self
            .gossip
            .add(name, pattern, address, input_types, output_types, owner)?;
        self.flush();
        Ok(is_local)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.gossip.remove(name);
        self.flush();
        removed
    }

    /// Observe `name` (`""` for every topic). The first call with the current
    /// state happens on the next [`turn`](Self::turn), never inside `observe`.
    pub fn observe(&mut self, name: &str, handler: TopicEventHandler) -> ObserverRef {
        self.gossip.observe(name, handler, Instant::now())
    }

    pub fn unobserve(&mut self, name: &str, reference: ObserverRef) -> bool {
        self.gossip.unobserve(name, reference, Instant::now())
    }

    /// One loop iteration: deferred calls, due timer, then wait up to
    /// `timeout` (shortened to the next timer deadline) for socket readiness.
    ///
    /// # Errors
    /// Poll failures other than `EINTR`.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.gossip.run_deferred();
        self.gossip.on_timer(Instant::now());
        self.flush();

        let timeout = self.poll_timeout(timeout, Instant::now());
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e.into());
        }

        let mut readable = false;
        let mut writable = false;
        for event in self.events.iter() {
            if event.token() != SOCKET_TOKEN {
                continue;
            }
            readable |= event.is_readable();
            writable |= event.is_writable();
        }

        if readable {
            self.receive();
        }
        self.gossip.on_timer(Instant::now());
        if writable || self.gossip.outbound_len() > 0 {
            self.flush();
        }
        Ok(())
    }

    /// Run the loop for `duration`.
    pub fn run_for(&mut self, duration: Duration) -> Result<()> {
        let end = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            self.turn(Some(end - now))?;
        }
    }

    /// Run the loop until `predicate` holds or `limit` elapses. Returns
    /// whether the predicate was met.
    pub fn run_until<P>(&mut self, limit: Duration, mut predicate: P) -> Result<bool>
    where
        P: FnMut(&Self) -> bool,
    {
        let end = Instant::now() + limit;
        loop {
            if predicate(self) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= end {
                return Ok(false);
            }
            self.turn(Some(end - now))?;
        }
    }

    fn poll_timeout(&self, requested: Option<Duration>, now: Instant) -> Option<Duration> {
        if self.gossip.has_deferred() {
            return Some(Duration::ZERO);
        }
        let until_timer = self
            .gossip
            .next_deadline()
            .map(|at| at.saturating_duration_since(now));
        match (requested, until_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn receive(&mut self) {
        let socket = &self.socket;
        let buf = &mut self.recv_buf;
        let gossip = &mut self.gossip;
        drain_socket(|| {
            let (len, src) = socket.recv_from(&mut buf[..])?;
            log::trace!("[MCAST] recv len={} src={}", len, src);
            gossip.handle_datagram(&buf[..len], Instant::now());
            Ok(())
        });
    }

    fn flush(&mut self) {
        let socket = &self.socket;
        let group = self.group;
        flush_outbox(&mut self.gossip, |bytes| socket.send_to(bytes, group));
        self.update_interest();
    }

    fn update_interest(&mut self) {
        let wanted = interest_for(self.gossip.outbound_len());
        if wanted == self.interest {
            return;
        }
        match self
            .poll
            .registry()
            .reregister(&mut self.socket, SOCKET_TOKEN, wanted)
        {
            Ok(()) => self.interest = wanted,
            Err(e) => log::error!("[MCAST] reregister failed: {}", e),
        }
    }
}

/// Call `recv_one` until the socket would block. mio readiness is
/// edge-triggered, so a failed receive is followed by another attempt; the
/// drain gives up after `MAX_RECV_ERRORS` failures in a row. Returns the
/// number of datagrams received.
fn drain_socket<F>(mut recv_one: F) -> usize
where
    F: FnMut() -> io::Result<()>,
{
    let mut received = 0;
    let mut errors = 0;
    loop {
        match recv_one() {
            Ok(()) => {
                received += 1;
                errors = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return received,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                errors += 1;
                log::error!("[MCAST] recv_from error: {}", e);
                if errors >= MAX_RECV_ERRORS {
                    log::warn!(
                        "[MCAST] {} receive errors in a row, waiting for next event",
                        errors
                    );
                    return received;
                }
            }
        }
    }
}

/// Send queued datagrams through `send` until it would block. A short write
/// keeps the remainder at the head of the outbox; a hard error drops the
/// datagram. Returns the number of datagrams taken off the outbox.
fn flush_outbox<S>(gossip: &mut Gossip, mut send: S) -> usize
where
    S: FnMut(&[u8]) -> io::Result<usize>,
{
    let mut finished = 0;
    while let Some(out) = gossip.front_outbound() {
        let pending = out.remaining().len();
        match send(out.remaining()) {
            Ok(0) if pending > 0 => break,
            Ok(n) => {
                if n < pending {
                    log::debug!("[GOSSIP] partial write {}/{}, continuing", n, pending);
                }
                out.advance(n);
                if out.is_done() {
                    gossip.pop_outbound();
                    finished += 1;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("[GOSSIP] send failed, dropping datagram: {}", e);
                gossip.pop_outbound();
                finished += 1;
            }
        }
    }
    finished
}

/// WRITABLE only while something is queued.
fn interest_for(outbound: usize) -> Interest {
    if outbound > 0 {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    }
}

impl Drop for Directory {
    fn drop(&mut self) {
        self.flush();
        let exit = self.gossip.exit_datagram();
        match self.socket.send_to(&exit, self.group) {
            Ok(_) => log::debug!("[DIRECTORY] {} sent EXIT", self.gossip.guid()),
            Err(e) => log::error!("[DIRECTORY] failed to send EXIT: {}", e),
        }
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("group", &self.group)
            .field("gossip", &self.gossip)
            .finish()
    }
}
