// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dispatch Global Configuration - Single Source of Truth
//!
//! This module centralizes the discovery constants and runtime configuration.
//! **NEVER hardcode ports, groups or timings elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time constants (port, group, buffer sizes, query timing)
//! - **Level 2 (Dynamic)**: [`DirectoryConfig`] built once at startup, optionally from
//!   the environment, then handed to the directory constructor.
//!
//! # Example
//!
//! ```rust
//! use dispatch::config::*;
//! use std::time::Duration;
//!
//! let config = DirectoryConfig::default()
//!     .with_port(9999)
//!     .with_query(QueryConfig::default().with_max_interval(Duration::from_secs(4)));
//!
//! assert_eq!(config.port, 9999);
//! assert_eq!(config.query.max_interval, Duration::from_secs(4));
//! assert_eq!(config.multicast, DEFAULT_DIRECTORY_MULTICAST);
//! ```

use crate::error::{Error, Result};
use std::net::Ipv4Addr;
use std::time::Duration;

// =======================================================================
// Discovery endpoint
// =======================================================================

/// Default UDP port for discovery gossip.
pub const DEFAULT_DIRECTORY_PORT: u16 = 8888;

/// Default multicast group for discovery gossip (224.0.88.1).
pub const DEFAULT_DIRECTORY_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 88, 1);

/// Size of one gossip datagram buffer (Ethernet MTU).
///
/// Outgoing datagrams larger than this are rejected, incoming ones are truncated.
pub const EVENT_BUFFER_SIZE: usize = 1500;

/// Number of send buffers held by the directory's pool.
pub const DEFAULT_SEND_POOL_COUNT: usize = 64;

/// Gossip protocol prefix, first token of every datagram.
pub const PROTOCOL_PREFIX: &str = "DISPATCH";

// =======================================================================
// Buffer pool / framing
// =======================================================================

/// Word size of the segment format (bytes).
pub const WORD_SIZE: usize = 8;

/// Default number of buffers in a framing pool.
pub const DEFAULT_POOL_BUFFER_COUNT: usize = 64;

/// Default framing pool buffer size (bytes, 64 words).
pub const DEFAULT_POOL_BUFFER_SIZE: usize = 64 * WORD_SIZE;

// =======================================================================
// Query retry timing
// =======================================================================

/// Delay before the first SEARCH after the observed set changes.
pub const QUERY_ZERO: Duration = Duration::from_millis(50);

/// Retry interval after the first SEARCH round (backoff floor).
pub const QUERY_INTERVAL: Duration = Duration::from_secs(1);

/// Backoff ceiling.
pub const QUERY_INTERVAL_MAX: Duration = Duration::from_secs(16);

/// Backoff multiplier applied after each SEARCH round.
pub const QUERY_INTERVAL_MULT: u32 = 2;

/// Upper bound on names packed into one SEARCH datagram.
pub const MAX_SEARCH_NAMES: usize = 4;

// =======================================================================
// Environment variables
// =======================================================================

/// Overrides [`DirectoryConfig::port`].
pub const ENV_PORT: &str = "DISPATCH_PORT";
/// Overrides [`DirectoryConfig::multicast`].
pub const ENV_MULTICAST: &str = "DISPATCH_MULTICAST";
/// Selects the interface whose address/netmask identify this node.
pub const ENV_INTERFACE: &str = "DISPATCH_INTERFACE";
/// `1`/`true` enables `SO_REUSEPORT` on the discovery socket (Unix only).
pub const ENV_REUSEPORT: &str = "DISPATCH_REUSEPORT";

/// Retry scheduler timing for SEARCH broadcasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// Delay of the first SEARCH round after the observed set changes.
    pub initial_delay: Duration,
    /// Interval used after the first SEARCH round.
    pub interval: Duration,
    /// Backoff ceiling.
    pub max_interval: Duration,
    /// Interval multiplier per round.
    pub multiplier: u32,
    /// Maximum number of names per SEARCH datagram.
    pub max_names_per_search: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            initial_delay: QUERY_ZERO,
            interval: QUERY_INTERVAL,
            max_interval: QUERY_INTERVAL_MAX,
            multiplier: QUERY_INTERVAL_MULT,
            max_names_per_search: MAX_SEARCH_NAMES,
        }
    }
}

impl QueryConfig {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_interval(mut self, max: Duration) -> Self {
        self.max_interval = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_names_per_search(mut self, names: usize) -> Self {
        self.max_names_per_search = names;
        self
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] when the interval is zero, the ceiling is below
    /// the floor, the multiplier is zero or no name fits a SEARCH.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("query interval must be > 0".into()));
        }
        if self.max_interval < self.interval {
            return Err(Error::InvalidConfig(format!(
                "query max interval {:?} below interval {:?}",
                self.max_interval, self.interval
            )));
        }
        if self.multiplier == 0 {
            return Err(Error::InvalidConfig("query multiplier must be >= 1".into()));
        }
        if self.max_names_per_search == 0 {
            return Err(Error::InvalidConfig(
                "max names per search must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Runtime configuration of a [`crate::Directory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// UDP port shared by every node of the fleet.
    pub port: u16,
    /// Multicast group.
    pub multicast: Ipv4Addr,
    /// Interface name used to derive this node's identity (`None` = localhost).
    pub interface: Option<String>,
    /// Maximum size of a gossip datagram.
    pub max_datagram: usize,
    /// Send buffers preallocated for outgoing gossip.
    pub send_pool_count: usize,
    /// Enable `SO_REUSEPORT` (Unix).
    pub reuse_port: bool,
    /// SEARCH retry timing.
    pub query: QueryConfig,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_DIRECTORY_PORT,
            multicast: DEFAULT_DIRECTORY_MULTICAST,
            interface: None,
            max_datagram: EVENT_BUFFER_SIZE,
            send_pool_count: DEFAULT_SEND_POOL_COUNT,
            reuse_port: false,
            query: QueryConfig::default(),
        }
    }
}

impl DirectoryConfig {
    /// Defaults overridden by `DISPATCH_*` environment variables.
    ///
    /// Invalid values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment, test fixture).
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_PORT) {
            match raw.trim().parse::<u16>() {
                Ok(port) if port != 0 => self.port = port,
                _ => log::warn!("[DIRECTORY] Invalid {}='{}', keeping {}", ENV_PORT, raw, self.port),
            }
        }
        if let Some(raw) = lookup(ENV_MULTICAST) {
            match raw.trim().parse::<Ipv4Addr>() {
                Ok(group) if group.is_multicast() => self.multicast = group,
                _ => log::warn!(
                    "[DIRECTORY] Invalid {}='{}', keeping {}",
                    ENV_MULTICAST,
                    raw,
                    self.multicast
                ),
            }
        }
        if let Some(raw) = lookup(ENV_INTERFACE) {
            let name = raw.trim();
            if !name.is_empty() {
                self.interface = Some(name.to_string());
            }
        }
        if let Some(raw) = lookup(ENV_REUSEPORT) {
            self.reuse_port = matches!(raw.trim(), "1" | "true" | "TRUE" | "yes");
        }
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_multicast(mut self, group: Ipv4Addr) -> Self {
        self.multicast = group;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_max_datagram(mut self, bytes: usize) -> Self {
        self.max_datagram = bytes;
        self
    }

    pub fn with_send_pool_count(mut self, count: usize) -> Self {
        self.send_pool_count = count;
        self
    }

    pub fn with_reuse_port(mut self, enabled: bool) -> Self {
        self.reuse_port = enabled;
        self
    }

    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] on a non-multicast group, a zero port, an
    /// unusable datagram size or an invalid [`QueryConfig`].
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::InvalidConfig("directory port must be > 0".into()));
        }
        if !self.multicast.is_multicast() {
            return Err(Error::InvalidConfig(format!(
                "{} is not a multicast group",
                self.multicast
            )));
        }
        if self.max_datagram < PROTOCOL_PREFIX.len() + 8 || self.max_datagram > 65_507 {
            return Err(Error::InvalidConfig(format!(
                "max datagram {} out of range",
                self.max_datagram
            )));
        }
        self.query.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DirectoryConfig::default();
        assert_eq!(config.port, 8888);
        assert_eq!(config.multicast, Ipv4Addr::new(224, 0, 88, 1));
        assert_eq!(config.max_datagram, 1500);
        assert_eq!(config.query.initial_delay, Duration::from_millis(50));
        assert_eq!(config.query.max_names_per_search, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = DirectoryConfig::default().apply_env(lookup(&[
            (ENV_PORT, "9100"),
            (ENV_MULTICAST, "239.1.2.3"),
            (ENV_INTERFACE, "eth0"),
            (ENV_REUSEPORT, "1"),
        ]));
        assert_eq!(config.port, 9100);
        assert_eq!(config.multicast, Ipv4Addr::new(239, 1, 2, 3));
        assert_eq!(config.interface.as_deref(), Some("eth0"));
        assert!(config.reuse_port);
    }

    #[test]
    fn test_invalid_env_ignored() {
        let config = DirectoryConfig::default().apply_env(lookup(&[
            (ENV_PORT, "not-a-port"),
            (ENV_MULTICAST, "10.0.0.1"),
            (ENV_INTERFACE, "  "),
        ]));
        assert_eq!(config, DirectoryConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_query() {
        let config = DirectoryConfig::default().with_query(
            QueryConfig::default().with_max_interval(Duration::from_millis(10)),
        );
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = DirectoryConfig::default().with_multicast(Ipv4Addr::new(10, 0, 0, 1));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
