// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The remaining SA attributes the engine probes: class information,
//! subnet manager records, event subscriptions, and the per-port
//! tables.

use crate::gid::Gid;
use alloc::vec::Vec;
use serde::Deserialize;
use serde::Serialize;

/// ClassPortInfo of the SA class.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct ClassPortInfo {
    pub base_ver: u8,
    pub class_ver: u8,
    pub cap_mask: u16,
    /// CapabilityMask2 (upper 27 bits) and RespTimeValue (low five).
    pub cap_mask2_resp_time: u32,
}

impl ClassPortInfo {
    pub const fn cap_mask2(&self) -> u32 {
        self.cap_mask2_resp_time >> 5
    }

    pub const fn resp_time_value(&self) -> u8 {
        (self.cap_mask2_resp_time & 0x1F) as u8
    }
}

/// SMInfo states.
pub mod sm_state {
    pub const NOT_ACTIVE: u8 = 0;
    pub const DISCOVERING: u8 = 1;
    pub const STANDBY: u8 = 2;
    pub const MASTER: u8 = 3;
}

/// An SMInfoRecord.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct SmInfoRecord {
    pub lid: u16,
    pub guid: u64,
    pub sm_key: u64,
    pub act_count: u32,
    /// Priority (high nibble) and SMState (low nibble).
    pub pri_state: u8,
}

impl SmInfoRecord {
    pub const fn priority(&self) -> u8 {
        self.pri_state >> 4
    }

    pub const fn state(&self) -> u8 {
        self.pri_state & 0x0F
    }
}

/// The filter fields an SMInfoRecord GetTable may name.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SmInfoFilter {
    All,
    Lid(u16),
    Guid(u64),
    Priority(u8),
    State(u8),
}

/// InformInfo: a subscription to traps.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct InformInfo {
    pub gid: Gid,
    pub lid_range_begin: u16,
    pub lid_range_end: u16,
    pub is_generic: bool,
    pub subscribe: bool,
    /// 0xFFFF subscribes to every type.
    pub trap_type: u16,
    /// 0xFFFF subscribes to every trap number.
    pub trap_num: u16,
    pub qpn: u32,
    pub resp_time_val: u8,
    pub producer_type: u32,
}

/// An InformInfoRecord, naming a subscriber and its subscription.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct InformInfoRecord {
    pub subscriber_gid: Gid,
    pub subscriber_enum: u16,
    pub inform_info: InformInfo,
}

/// Trap numbers the engine cares about.
pub mod trap {
    /// A GID is now in service.
    pub const GID_IN_SERVICE: u16 = 64;
    /// A GID is out of service.
    pub const GID_OUT_OF_SERVICE: u16 = 65;
    /// Subscribes to every trap.
    pub const ALL: u16 = 0xFFFF;
}

/// A trap report forwarded by the SA to a subscriber.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct Notice {
    pub is_generic: bool,
    pub trap_type: u8,
    pub trap_num: u16,
    pub issuer_lid: u16,
    pub producer_type: u32,
    /// The GID the trap is about, for traps 64 and 65.
    pub gid: Gid,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct GuidInfoRecord {
    pub lid: u16,
    pub block_num: u8,
    pub guids: [u64; 8],
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct PKeyTableRecord {
    pub lid: u16,
    pub port_num: u8,
    pub block_num: u16,
    pub pkeys: [u16; 32],
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct SwitchInfoRecord {
    pub lid: u16,
    pub lin_cap: u16,
    pub rand_cap: u16,
    pub mcast_cap: u16,
    pub lin_top: u16,
    pub def_port: u8,
    pub life_state: u8,
}

/// One block of a linear forwarding table, up to 64 entries.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LftRecord {
    pub lid: u16,
    pub block_num: u16,
    pub ports: Vec<u8>,
}

/// One block of a multicast forwarding table.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct MftRecord {
    pub lid: u16,
    pub position: u8,
    pub block_num: u16,
    pub masks: [u16; 32],
}

/// The SL to VL mapping of one (in port, out port) pair.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct SlVlRecord {
    pub lid: u16,
    pub in_port: u8,
    pub out_port: u8,
    /// Indexed by SL.
    pub vls: [u8; 16],
}

/// The VL arbitration table blocks.
pub mod vlarb_block {
    pub const LOW_0_31: u8 = 1;
    pub const HIGH_0_31: u8 = 2;
    pub const LOW_32_63: u8 = 3;
    pub const HIGH_32_63: u8 = 4;
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct VlArbEntry {
    pub vl: u8,
    pub weight: u8,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct VlArbRecord {
    pub lid: u16,
    pub port_num: u8,
    pub block_num: u8,
    pub entries: [VlArbEntry; 32],
}
