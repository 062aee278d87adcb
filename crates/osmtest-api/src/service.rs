// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::gid::Gid;
use alloc::string::String;
use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

/// A lease value meaning the registration never expires.
pub const INFINITE_LEASE: u32 = 0xFFFF_FFFF;

/// The longest service name the SA will store.
pub const SERVICE_NAME_MAX: usize = 64;

bitflags! {
    /// Component mask of a ServiceRecord request.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
        Serialize,
    )]
    pub struct ServiceCompMask: u64 {
        const ID = 1 << 0;
        const GID = 1 << 1;
        const PKEY = 1 << 2;
        const LEASE = 1 << 4;
        const KEY = 1 << 5;
        const NAME = 1 << 6;
        const DATA8 = 1 << 7;
        const DATA16 = 1 << 8;
        const DATA32 = 1 << 9;
        const DATA64 = 1 << 10;

        /// The components a registration must supply.
        const REGISTER = Self::ID.bits()
            | Self::GID.bits()
            | Self::LEASE.bits()
            | Self::KEY.bits()
            | Self::NAME.bits();
    }
}

/// A ServiceRecord.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceRecord {
    pub service_id: u64,
    pub service_gid: Gid,
    pub service_pkey: u16,
    /// Seconds, or [`INFINITE_LEASE`].
    pub service_lease: u32,
    pub service_key: [u8; 16],
    pub service_name: String,
    pub data8: [u8; 16],
    pub data16: [u16; 8],
    pub data32: [u32; 4],
    pub data64: [u64; 2],
}

impl ServiceRecord {
    pub fn is_infinite(&self) -> bool {
        self.service_lease == INFINITE_LEASE
    }
}
