// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic records and the messaging pattern table.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Type list placeholder when a set is empty.
pub const NO_TYPES: &str = ".";

/// Separator between type ids in a type list.
pub const TYPE_SEPARATOR: char = '|';

/// Advertisements for one topic name, keyed by owner guid.
pub type OwnerMap = BTreeMap<String, TopicRecord>;

/// Messaging pattern (socket role) of an endpoint.
///
/// Numeric values follow the transport library's socket type constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Pattern {
    Pair = 0,
    Pub = 1,
    Sub = 2,
    Req = 3,
    Rep = 4,
    Dealer = 5,
    Router = 6,
    Pull = 7,
    Push = 8,
    XPub = 9,
    XSub = 10,
    Stream = 11,
}

impl Pattern {
    pub const ALL: [Pattern; 12] = [
        Pattern::Pair,
        Pattern::Pub,
        Pattern::Sub,
        Pattern::Req,
        Pattern::Rep,
        Pattern::Dealer,
        Pattern::Router,
        Pattern::Pull,
        Pattern::Push,
        Pattern::XPub,
        Pattern::XSub,
        Pattern::Stream,
    ];

    /// Wire name (`PUB`, `SUB`, ...).
    pub fn name(self) -> &'static str {
        match self {
            Pattern::Pair => "PAIR",
            Pattern::Pub => "PUB",
            Pattern::Sub => "SUB",
            Pattern::Req => "REQ",
            Pattern::Rep => "REP",
            Pattern::Dealer => "DEALER",
            Pattern::Router => "ROUTER",
            Pattern::Pull => "PULL",
            Pattern::Push => "PUSH",
            Pattern::XPub => "XPUB",
            Pattern::XSub => "XSUB",
            Pattern::Stream => "STREAM",
        }
    }

    /// Inverse of [`Pattern::name`]. Case sensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether an endpoint of this pattern may connect to one of `other`.
    pub fn can_connect(self, other: Pattern) -> bool {
        use Pattern::*;
        matches!(
            (self, other),
            (Pair, Pair)
                | (Pub, Sub)
                | (Sub, Pub)
                | (Req, Rep)
                | (Rep, Req)
                | (Dealer, Router)
                | (Router, Dealer)
                | (Pull, Push)
                | (Push, Pull)
                | (XPub, XSub)
                | (XSub, XPub)
                | (Stream, Stream)
        )
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One endpoint advertised by some node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRecord {
    pub name: String,
    /// Milliseconds since the Unix epoch at registration (or receipt).
    pub timestamp_ms: u64,
    pub pattern: Pattern,
    /// `protocol://host:port`
    pub address: String,
    pub input_types: BTreeSet<String>,
    pub output_types: BTreeSet<String>,
    /// Guid of the advertising node.
    pub owner: String,
    /// Cached AVAILABLE arguments: `name PATTERN address ins outs`.
    pub info: String,
}

impl TopicRecord {
    /// Record stamped with the current wall clock.
    pub fn new(
        name: impl Into<String>,
        pattern: Pattern,
        address: impl Into<String>,
        input_types: BTreeSet<String>,
        output_types: BTreeSet<String>,
        owner: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let address = address.into();
        let info = build_info(&name, pattern, &address, &input_types, &output_types);
        Self {
            name,
            timestamp_ms: now_ms(),
            pattern,
            address,
            input_types,
            output_types,
            owner: owner.into(),
            info,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }
}

impl fmt::Display for TopicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} from {} ({})",
            self.pattern, self.name, self.address, self.owner, self.timestamp_ms
        )
    }
}

/// AVAILABLE arguments for a topic.
pub fn build_info(
    name: &str,
    pattern: Pattern,
    address: &str,
    input_types: &BTreeSet<String>,
    output_types: &BTreeSet<String>,
) -> String {
    format!(
        "{} {} {} {} {}",
        name,
        pattern,
        address,
        encode_types(input_types),
        encode_types(output_types)
    )
}

/// `a|b|c`, or `.` for an empty set.
pub fn encode_types(types: &BTreeSet<String>) -> String {
    if types.is_empty() {
        return NO_TYPES.to_string();
    }
    let mut out = String::new();
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            out.push(TYPE_SEPARATOR);
        }
        out.push_str(ty);
    }
    out
}

/// Inverse of [`encode_types`]. Empty entries are skipped.
pub fn parse_types(list: &str) -> BTreeSet<String> {
    if list.is_empty() || list == NO_TYPES {
        return BTreeSet::new();
    }
    list.split(TYPE_SEPARATOR)
        .filter(|ty| !ty.is_empty())
        .map(str::to_string)
        .collect()
}

/// Freshest advertisement: largest timestamp, first owner on ties.
pub fn newest_topic(owners: &OwnerMap) -> Option<&TopicRecord> {
    owners.values().fold(None, |best, topic| match best {
        Some(b) if b.timestamp_ms >= topic.timestamp_ms => Some(b),
        _ => Some(topic),
    })
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Hierarchical topic name `device/node/topic`.
///
/// Empty components are skipped and separators are not doubled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicPath {
    pub device: String,
    pub node: String,
    pub topic: String,
}

impl TopicPath {
    pub fn new(device: impl Into<String>, node: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            node: node.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for part in [&self.device, &self.node, &self.topic] {
            if part.is_empty() {
                continue;
            }
            if !out.is_empty() && !out.ends_with('/') {
                out.push('/');
            }
            out.push_str(part);
        }
        f.write_str(&out)
    }
}
