// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The logical state of a port.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u8)]
pub enum PortState {
    Nop = 0,
    Down = 1,
    Init = 2,
    Armed = 3,
    Active = 4,
    ActDefer = 5,
}

impl TryFrom<u8> for PortState {
    type Error = String;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(Self::Nop),
            1 => Ok(Self::Down),
            2 => Ok(Self::Init),
            3 => Ok(Self::Armed),
            4 => Ok(Self::Active),
            5 => Ok(Self::ActDefer),
            _ => Err(format!("unknown port state: {val}")),
        }
    }
}

impl FromStr for PortState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NOP" => Ok(Self::Nop),
            "DOWN" => Ok(Self::Down),
            "INIT" => Ok(Self::Init),
            "ARMED" => Ok(Self::Armed),
            "ACTIVE" => Ok(Self::Active),
            "ACT_DEFER" => Ok(Self::ActDefer),
            _ => Err(format!("invalid port state: {s}")),
        }
    }
}

impl Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Nop => "NOP",
            Self::Down => "DOWN",
            Self::Init => "INIT",
            Self::Armed => "ARMED",
            Self::Active => "ACTIVE",
            Self::ActDefer => "ACT_DEFER",
        };
        write!(f, "{s}")
    }
}

/// The PortInfo attribute.
///
/// Several fields pack two sub-fields into one byte; use the accessors
/// rather than masking by hand. Like [`crate::NodeInfo`] this shape is
/// also used as a comparison mask.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct PortInfo {
    pub m_key: u64,
    pub subnet_prefix: u64,
    pub base_lid: u16,
    pub master_sm_base_lid: u16,
    pub capability_mask: u32,
    pub diag_code: u16,
    pub m_key_lease_period: u16,
    pub local_port_num: u8,
    pub link_width_enabled: u8,
    pub link_width_supported: u8,
    pub link_width_active: u8,
    /// LinkSpeedSupported (high nibble) and PortState (low nibble).
    pub state_info1: u8,
    /// PortPhysicalState (high nibble) and LinkDownDefaultState.
    pub state_info2: u8,
    /// M_KeyProtectBits (top two bits) and LMC (low three bits).
    pub mkey_lmc: u8,
    pub link_speed: u8,
    pub mtu_smsl: u8,
    pub vl_cap: u8,
    pub vl_high_limit: u8,
    pub vl_arb_high_cap: u8,
    pub vl_arb_low_cap: u8,
    pub mtu_cap: u8,
    pub vl_stall_life: u8,
    pub vl_enforce: u8,
    pub m_key_violations: u16,
    pub p_key_violations: u16,
    pub q_key_violations: u16,
    pub guid_cap: u8,
    /// Only the low five bits are defined.
    pub subnet_timeout: u8,
    pub resp_time_value: u8,
    pub error_threshold: u8,
}

impl PortInfo {
    pub const fn port_state(&self) -> u8 {
        self.state_info1 & 0x0F
    }

    pub fn set_port_state(&mut self, state: u8) {
        self.state_info1 = (self.state_info1 & 0xF0) | (state & 0x0F);
    }

    pub const fn link_speed_supported(&self) -> u8 {
        self.state_info1 >> 4
    }

    pub fn set_link_speed_supported(&mut self, speed: u8) {
        self.state_info1 = (self.state_info1 & 0x0F) | (speed << 4);
    }

    pub const fn lmc(&self) -> u8 {
        self.mkey_lmc & 0x07
    }

    pub fn set_lmc(&mut self, lmc: u8) {
        self.mkey_lmc = (self.mkey_lmc & 0xF8) | (lmc & 0x07);
    }

    pub const fn mpb(&self) -> u8 {
        self.mkey_lmc >> 6
    }

    pub fn set_mpb(&mut self, mpb: u8) {
        self.mkey_lmc = (self.mkey_lmc & 0x3F) | (mpb << 6);
    }

    /// The neighbor MTU, high nibble of `mtu_smsl`.
    pub const fn neighbor_mtu(&self) -> u8 {
        self.mtu_smsl >> 4
    }
}

/// A PortInfoRecord. Ports have no identity of their own, so they
/// are always named by the LID of their node and their number.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct PortRecord {
    pub lid: u16,
    pub port_num: u8,
    pub info: PortInfo,
}

/// A LinkRecord: one direction of a physical link.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct LinkRecord {
    pub from_lid: u16,
    pub from_port_num: u8,
    pub to_port_num: u8,
    pub to_lid: u16,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packed_fields() {
        let mut pi = PortInfo::default();
        pi.set_port_state(PortState::Active as u8);
        pi.set_link_speed_supported(0x7);
        assert_eq!(pi.state_info1, 0x74);
        assert_eq!(pi.port_state(), 4);
        assert_eq!(pi.link_speed_supported(), 7);

        pi.set_lmc(2);
        pi.set_mpb(1);
        assert_eq!(pi.mkey_lmc, 0x42);
        assert_eq!(pi.lmc(), 2);
        assert_eq!(pi.mpb(), 1);
    }

    #[test]
    fn port_state_names() {
        assert_eq!("active".parse::<PortState>().unwrap(), PortState::Active);
        assert_eq!(
            "ACT_DEFER".parse::<PortState>().unwrap(),
            PortState::ActDefer
        );
        assert!("UP".parse::<PortState>().is_err());
    }
}
