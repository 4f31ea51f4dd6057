// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint addresses and the node's own network identity.

use crate::config::DirectoryConfig;
use std::fmt;
use std::net::Ipv4Addr;

/// Parsed `protocol://host:port` endpoint.
///
/// Protocol defaults to `tcp`, port to 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
        }
    }

    /// Lenient parse; never fails.
    pub fn parse(address: &str) -> Self {
        let (protocol, rest) = match address.find("://") {
            Some(at) => (&address[..at], &address[at + 3..]),
            None => ("tcp", address),
        };
        let (host, port) = match rest.find(':') {
            Some(at) => (&rest[..at], leading_port(&rest[at + 1..])),
            None => (rest, 0),
        };
        Self::new(protocol, host, port)
    }

    /// Host as an IPv4 address, if it is one.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.host.parse().ok()
    }

    pub fn is_localhost(&self) -> bool {
        self.host == "localhost" || self.ip().map_or(false, |ip| ip.is_loopback())
    }
}

/// Digits at the start of `s`, 0 when absent or out of range.
fn leading_port(s: &str) -> u16 {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().unwrap_or(0)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Address and subnet of this node, resolved once at startup.
///
/// Topics advertised from another subnet are ignored by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    /// Interface the identity came from, `None` for localhost.
    pub interface: Option<String>,
}

impl NetworkIdentity {
    /// `127.0.0.1/32`.
    pub fn localhost() -> Self {
        Self::new(Ipv4Addr::LOCALHOST, Ipv4Addr::BROADCAST)
    }

    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        let broadcast = Ipv4Addr::from(u32::from(address) | !u32::from(netmask));
        Self {
            address,
            netmask,
            broadcast,
            interface: None,
        }
    }

    /// Identity of interface `name`, localhost when it has no IPv4 address.
    pub fn from_interface(name: &str) -> Self {
        match lookup_interface(name) {
            Some((address, netmask)) => {
                let mut identity = Self::new(address, netmask);
                identity.interface = Some(name.to_string());
                log::info!(
                    "[DIRECTORY] Selected interface {} | ip {} netmask {} bcast {}",
                    name,
                    identity.address,
                    identity.netmask,
                    identity.broadcast
                );
                identity
            }
            None => {
                log::warn!(
                    "[DIRECTORY] Could not obtain ip from interface {}, defaulting to localhost",
                    name
                );
                Self::localhost()
            }
        }
    }

    /// Identity for the configured interface, localhost when none is set.
    pub fn from_config(config: &DirectoryConfig) -> Self {
        match config.interface.as_deref() {
            Some(name) => Self::from_interface(name),
            None => {
                log::info!("[DIRECTORY] No interface specified, defaulting to localhost");
                Self::localhost()
            }
        }
    }

    /// [`from_config`](Self::from_config) on [`DirectoryConfig::from_env`].
    pub fn from_env() -> Self {
        Self::from_config(&DirectoryConfig::from_env())
    }

    /// Subnet filter: `ip` shares this node's network.
    pub fn on_network(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(ip) & mask == u32::from(self.address) & mask
    }

    /// Subnet filter on an endpoint string. Non-IPv4 hosts never match.
    pub fn accepts(&self, address: &Address) -> bool {
        address.ip().map_or(false, |ip| self.on_network(ip))
    }
}

impl Default for NetworkIdentity {
    fn default() -> Self {
        Self::localhost()
    }
}

#[cfg(unix)]
fn lookup_interface(name: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    use std::ffi::CStr;

    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: getifaddrs writes a list head we free below with freeifaddrs.
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        log::error!(
            "[DIRECTORY] getifaddrs failed: {}",
            std::io::Error::last_os_error()
        );
        return None;
    }

    let mut found = None;
    let mut cursor = ifap;
    while !cursor.is_null() {
        // SAFETY: cursor is a node of the list returned by getifaddrs, valid
        // until freeifaddrs.
        let ifa = unsafe { &*cursor };
        cursor = ifa.ifa_next;

        if ifa.ifa_addr.is_null() || ifa.ifa_netmask.is_null() || ifa.ifa_name.is_null() {
            continue;
        }
        // SAFETY: non-null sockaddr from getifaddrs.
        let family = unsafe { (*ifa.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_INET {
            continue;
        }
        // SAFETY: non-null NUL-terminated name from getifaddrs.
        let ifname = unsafe { CStr::from_ptr(ifa.ifa_name) };
        if ifname.to_bytes() != name.as_bytes() {
            continue;
        }
        // SAFETY: both sockaddrs are AF_INET (netmask shares the family).
        let (address, netmask) = unsafe { (sockaddr_v4(ifa.ifa_addr), sockaddr_v4(ifa.ifa_netmask)) };
        log::trace!("[DIRECTORY] Attempting {} | {} {}", name, address, netmask);
        found = Some((address, netmask));
        break;
    }

    // SAFETY: ifap came from a successful getifaddrs and is freed once.
    unsafe { libc::freeifaddrs(ifap) };
    found
}

/// # Safety
/// `sa` must point to a valid `sockaddr_in`.
#[cfg(unix)]
unsafe fn sockaddr_v4(sa: *const libc::sockaddr) -> Ipv4Addr {
    let sin = &*(sa as *const libc::sockaddr_in);
    Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))
}

/// Without getifaddrs the netmask is unknown; assume a /24.
#[cfg(not(unix))]
fn lookup_interface(name: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let interfaces = local_ip_address::list_afinet_netifas().ok()?;
    interfaces.into_iter().find_map(|(ifname, ip)| match ip {
        std::net::IpAddr::V4(v4) if ifname == name => Some((v4, Ipv4Addr::new(255, 255, 255, 0))),
        _ => None,
    })
}
