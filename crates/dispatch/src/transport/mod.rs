// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP multicast socket setup for the directory.

mod multicast;

pub use multicast::{bind_multicast, list_interfaces, membership_interface, MulticastSocket};
