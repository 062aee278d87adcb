// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Path records and the ordinal fields (rate, MTU, packet lifetime)
//! that carry a selector.

use crate::gid::Gid;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The selector held in the top two bits of an ordinal field.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u8)]
pub enum Selector {
    GreaterThan = 0,
    LessThan = 1,
    Exactly = 2,
    /// Whatever the largest available value is.
    Largest = 3,
}

impl Selector {
    /// Return true if `actual` satisfies this selector against
    /// `bound`. Both are ranks, i.e. already mapped onto an ordered
    /// scale.
    pub fn admits(self, actual: u32, bound: u32) -> bool {
        match self {
            Self::GreaterThan => actual > bound,
            Self::LessThan => actual < bound,
            Self::Exactly => actual == bound,
            Self::Largest => true,
        }
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GreaterThan => "GREATER_THAN",
            Self::LessThan => "LESS_THAN",
            Self::Exactly => "EXACTLY",
            Self::Largest => "LARGEST",
        };
        write!(f, "{s}")
    }
}

/// Encode a selector and a six-bit value into one field byte.
pub const fn encode_selector(sel: Selector, value: u8) -> u8 {
    ((sel as u8) << 6) | (value & 0x3F)
}

/// Split a field byte into its selector and six-bit value.
pub const fn decode_selector(field: u8) -> (Selector, u8) {
    let sel = match field >> 6 {
        0 => Selector::GreaterThan,
        1 => Selector::LessThan,
        2 => Selector::Exactly,
        _ => Selector::Largest,
    };
    (sel, field & 0x3F)
}

/// Static rate encodings. The encoding is not ordered by bandwidth;
/// compare through [`rate_rank`].
pub mod rate {
    pub const R2_5: u8 = 2;
    pub const R10: u8 = 3;
    pub const R30: u8 = 4;
    pub const R5: u8 = 5;
    pub const R20: u8 = 6;
    pub const R40: u8 = 7;
    pub const R60: u8 = 8;
    pub const R80: u8 = 9;
    pub const R120: u8 = 10;
    pub const R14: u8 = 11;
    pub const R56: u8 = 12;
    pub const R112: u8 = 13;
    pub const R168: u8 = 14;
    pub const R25: u8 = 15;
    pub const R100: u8 = 16;
    pub const R200: u8 = 17;
    pub const R300: u8 = 18;

    pub const MIN: u8 = R2_5;
    pub const MAX: u8 = R300;
}

/// Map a rate encoding onto tenths of Gb/s so rates can be ordered.
/// Values below the minimum encoding rank as zero, values above the
/// maximum rank above everything.
pub const fn rate_rank(code: u8) -> u32 {
    match code {
        0 | 1 => 0,
        rate::R2_5 => 25,
        rate::R10 => 100,
        rate::R30 => 300,
        rate::R5 => 50,
        rate::R20 => 200,
        rate::R40 => 400,
        rate::R60 => 600,
        rate::R80 => 800,
        rate::R120 => 1200,
        rate::R14 => 140,
        rate::R56 => 560,
        rate::R112 => 1120,
        rate::R168 => 1680,
        rate::R25 => 250,
        rate::R100 => 1000,
        rate::R200 => 2000,
        rate::R300 => 3000,
        _ => u32::MAX,
    }
}

/// MTU encodings, ordered.
pub mod mtu {
    pub const M256: u8 = 1;
    pub const M512: u8 = 2;
    pub const M1024: u8 = 3;
    pub const M2048: u8 = 4;
    pub const M4096: u8 = 5;

    pub const MIN: u8 = M256;
    pub const MAX: u8 = M4096;
}

/// Map an MTU encoding onto bytes.
pub const fn mtu_rank(code: u8) -> u32 {
    match code {
        0 => 0,
        1..=5 => 128 << code,
        _ => u32::MAX,
    }
}

/// A PathRecord.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct PathRecord {
    pub dgid: Gid,
    pub sgid: Gid,
    pub dlid: u16,
    pub slid: u16,
    /// RawTraffic, FlowLabel and HopLimit.
    pub hop_flow_raw: u32,
    pub tclass: u8,
    /// Reversible (top bit) and NumbPath.
    pub num_path: u8,
    pub pkey: u16,
    /// QoSClass and SL (low nibble).
    pub qos_class_sl: u16,
    pub mtu: u8,
    pub rate: u8,
    pub pkt_life: u8,
    pub preference: u8,
}

impl PathRecord {
    pub const fn sl(&self) -> u8 {
        (self.qos_class_sl & 0x000F) as u8
    }

    pub const fn qos_class(&self) -> u16 {
        self.qos_class_sl >> 4
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn selector_round_trip() {
        let field = encode_selector(Selector::LessThan, mtu::M4096);
        assert_eq!(field, 0x45);
        assert_eq!(decode_selector(field), (Selector::LessThan, mtu::M4096));
        assert_eq!(decode_selector(0xC3), (Selector::Largest, 3));
    }

    #[test]
    fn rates_rank_by_bandwidth() {
        // 5 Gb/s is encoded above 10 Gb/s but is slower.
        assert!(rate_rank(rate::R5) < rate_rank(rate::R10));
        assert!(rate_rank(1) < rate_rank(rate::MIN));
        assert!(rate_rank(0x3F) > rate_rank(rate::MAX));
        assert_eq!(mtu_rank(mtu::M4096), 4096);
        assert_eq!(mtu_rank(6), u32::MAX);
    }

    #[test]
    fn selector_admits() {
        let actual = rate_rank(rate::R40);
        assert!(Selector::GreaterThan.admits(actual, rate_rank(1)));
        assert!(!Selector::GreaterThan.admits(actual, rate_rank(rate::R120)));
        assert!(!Selector::LessThan.admits(actual, rate_rank(rate::R2_5)));
        assert!(Selector::Exactly.admits(actual, rate_rank(rate::R40)));
    }
}
