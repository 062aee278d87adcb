// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types shared between the SA conformance engine and anything that
//! answers its queries.
//!
//! These are the typed forms of the Subnet Administration attributes.
//! Nothing in here knows about MAD framing or byte order on the wire;
//! a transport is free to encode them however it needs to.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod attr;
pub mod gid;
pub mod mad;
pub mod mcast;
pub mod node;
pub mod path;
pub mod port;
pub mod record;
pub mod service;

pub use attr::*;
pub use gid::*;
pub use mad::*;
pub use mcast::*;
pub use node::*;
pub use path::*;
pub use port::*;
pub use record::*;
pub use service::*;

/// The SM_Key used for trusted requests when nothing else has been
/// configured. This matches the default key of the subnet manager.
pub const DEFAULT_SM_KEY: u64 = 1;

/// The LID value reserved as the permissive LID. No record may carry
/// it, so queries naming it must fail.
pub const PERMISSIVE_LID: u16 = 0xFFFF;

/// The first LID in the multicast range.
pub const MCAST_LID_BASE: u16 = 0xC000;
