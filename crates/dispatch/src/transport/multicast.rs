// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Directory multicast socket construction and interface discovery.

use crate::config::DirectoryConfig;
use crate::directory::NetworkIdentity;
use crate::error::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Bound, joined, non-blocking directory socket.
#[derive(Debug)]
pub struct MulticastSocket {
    pub socket: UdpSocket,
    /// Group address every gossip datagram is sent to.
    pub group: SocketAddr,
    /// Interface the group was joined on (`UNSPECIFIED` = kernel default).
    pub interface: Ipv4Addr,
}

/// Interface to join the group on: the identity's address, or the kernel
/// default for a loopback identity.
pub fn membership_interface(identity: &NetworkIdentity) -> Ipv4Addr {
    if identity.address.is_loopback() || identity.address.is_unspecified() {
        Ipv4Addr::UNSPECIFIED
    } else {
        identity.address
    }
}

/// Create the directory socket: `0.0.0.0:<port>` with address reuse, member
/// of `config.multicast`, loopback on, TTL 1, non-blocking.
///
/// # Errors
/// [`Error::BindFailed`] if the socket cannot be created or bound,
/// [`Error::MulticastJoinFailed`] if the group cannot be joined.
pub fn bind_multicast(config: &DirectoryConfig, identity: &NetworkIdentity) -> Result<MulticastSocket> {
    let bind_err = |what: &str, e: io::Error| {
        Error::BindFailed(format!("{} on port {}: {}", what, config.port, e))
    };

    let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| bind_err("socket", e))?;
    socket2
        .set_reuse_address(true)
        .map_err(|e| bind_err("SO_REUSEADDR", e))?;
    #[cfg(unix)]
    if config.reuse_port {
        set_reuseport(&socket2).map_err(|e| bind_err("SO_REUSEPORT", e))?;
        log::info!("[MCAST] SO_REUSEPORT enabled (multi-process mode)");
    }

    let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
    socket2
        .bind(&bind_addr.into())
        .map_err(|e| bind_err("bind", e))?;

    let interface = membership_interface(identity);
    socket2
        .join_multicast_v4(&config.multicast, &interface)
        .map_err(|e| {
            Error::MulticastJoinFailed(format!("{} on {}: {}", config.multicast, interface, e))
        })?;
    if !interface.is_unspecified() {
        if let Err(e) = socket2.set_multicast_if_v4(&interface) {
            log::debug!("[MCAST] set_multicast_if_v4({}) failed (non-fatal): {}", interface, e);
        }
    }
    socket2.set_multicast_loop_v4(true)?;
    let _ = socket2.set_multicast_ttl_v4(1);
    socket2.set_nonblocking(true)?;

    let group = SocketAddr::V4(SocketAddrV4::new(config.multicast, config.port));
    log::info!(
        "[MCAST] listening on {} group {} via {}",
        bind_addr,
        group,
        interface
    );
    Ok(MulticastSocket {
        socket: socket2.into(),
        group,
        interface,
    })
}

/// Named IPv4 interfaces of this host, loopback included.
pub fn list_interfaces() -> Vec<(String, Ipv4Addr)> {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[MCAST] Failed to list network interfaces: {}", e);
            return Vec::new();
        }
    };
    interfaces
        .into_iter()
        .filter_map(|(name, ip)| match ip {
            IpAddr::V4(v4) => Some((name, v4)),
            IpAddr::V6(_) => None,
        })
        .collect()
}

#[cfg(unix)]
fn set_reuseport(socket: &Socket) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = socket.as_raw_fd();
    let optval: libc::c_int = 1;
    // SAFETY: valid fd, standard option, optval sized as c_int.
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_interface() {
        assert_eq!(
            membership_interface(&NetworkIdentity::localhost()),
            Ipv4Addr::UNSPECIFIED
        );
        let id = NetworkIdentity::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(255, 0, 0, 0));
        assert_eq!(membership_interface(&id), Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_list_interfaces_has_no_v6() {
        // Content depends on the host; only the filtering is checked.
        for (name, _ip) in list_interfaces() {
            assert!(!name.is_empty());
        }
    }

    #[test]
    #[ignore] // Ignore by default (requires UDP multicast permissions)
    fn test_bind_multicast() {
        let config = DirectoryConfig::default().with_port(18_888).with_reuse_port(true);
        let bound = bind_multicast(&config, &NetworkIdentity::localhost()).expect("bind");
        assert_eq!(bound.group, "224.0.88.1:18888".parse::<SocketAddr>().expect("addr"));
    }
}
