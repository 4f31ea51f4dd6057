// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic

//! Two directories in one process discovering each other over the real
//! multicast group.

use dispatch::{Directory, DirectoryConfig, NetworkIdentity, OwnerMap, Pattern};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn config(port: u16) -> DirectoryConfig {
    DirectoryConfig::default()
        .with_port(port)
        .with_reuse_port(true)
}

#[test]
#[ignore] // Ignore by default (requires UDP multicast permissions)
fn test_discovery_over_loopback() {
    let identity = Arc::new(NetworkIdentity::localhost());
    let mut server = Directory::new("server", config(28_888), Arc::clone(&identity)).expect("server");
    let mut client = Directory::new("client", config(28_888), identity).expect("client");

    let guid = server.guid().to_string();
    server
        .add(
            "loop/test/topic",
            Pattern::Rep,
            "tcp://127.0.0.1:45678",
            &BTreeSet::new(),
            &BTreeSet::new(),
            &guid,
        )
        .expect("add");

    let seen = Arc::new(Mutex::new(None::<String>));
    let sink = Arc::clone(&seen);
    client.observe(
        "loop/test/topic",
        Arc::new(move |_: &str, owners: &OwnerMap| {
            *sink.lock() = owners.values().next().map(|t| t.address.clone());
        }),
    );

    let mut found = false;
    for _ in 0..100 {
        client.turn(Some(Duration::from_millis(20))).expect("client turn");
        server.turn(Some(Duration::from_millis(20))).expect("server turn");
        if seen.lock().is_some() {
            found = true;
            break;
        }
    }
    assert!(found, "client never discovered the server topic");
    assert_eq!(seen.lock().as_deref(), Some("tcp://127.0.0.1:45678"));

    // EXIT on drop evicts the server's topics.
    drop(server);
    let gone = client
        .run_until(Duration::from_secs(2), |d| !d.store().has_topic("loop/test/topic"))
        .expect("run");
    assert!(gone);
}
