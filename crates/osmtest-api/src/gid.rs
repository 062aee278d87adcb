// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Global identifiers, unicast and multicast.

use alloc::string::String;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The default (link-local) subnet prefix.
pub const DEFAULT_SUBNET_PREFIX: u64 = 0xFE80_0000_0000_0000;

/// A 128-bit Global Identifier.
///
/// A unicast GID is a 64-bit subnet prefix followed by a 64-bit
/// interface id (the port GUID). A multicast GID (MGID) shares the
/// layout but starts with `0xFF`, followed by a flags nibble and a
/// scope nibble.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Gid {
    inner: [u8; 16],
}

impl Gid {
    pub const ZERO: Self = Self { inner: [0; 16] };

    /// The IPoIB IPv4 broadcast group for the default partition.
    pub const IPOIB_BROADCAST: Self =
        Self::from_const([0xff12, 0x401b, 0xffff, 0, 0, 0, 0xffff, 0xffff]);

    /// The IPoIB broadcast group as created by some older host stacks.
    pub const IPOIB_BROADCAST_ALT: Self =
        Self::from_const([0xff12, 0x401b, 0xffff, 0, 0, 0, 0, 0x0001]);

    /// The IPoIB broadcast group with site-local scope.
    pub const IPOIB_SITE_LOCAL: Self =
        Self::from_const([0xff15, 0x401b, 0xffff, 0, 0, 0, 0xffff, 0xffff]);

    /// The link-local all-nodes group.
    pub const ALL_NODES: Self = Self::from_const([0xff02, 0, 0, 0, 0, 0, 0, 1]);

    pub const fn from_const(words: [u16; 8]) -> Self {
        let mut inner = [0u8; 16];
        let mut i = 0;
        while i < 8 {
            let w = words[i].to_be_bytes();
            inner[i * 2] = w[0];
            inner[i * 2 + 1] = w[1];
            i += 1;
        }
        Self { inner }
    }

    /// Build a unicast GID from its subnet prefix and interface id.
    pub const fn from_parts(prefix: u64, interface_id: u64) -> Self {
        let p = prefix.to_be_bytes();
        let g = interface_id.to_be_bytes();
        Self {
            inner: [
                p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7], g[0], g[1],
                g[2], g[3], g[4], g[5], g[6], g[7],
            ],
        }
    }

    pub const fn bytes(&self) -> [u8; 16] {
        self.inner
    }

    pub const fn prefix(&self) -> u64 {
        let b = &self.inner;
        u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    pub const fn interface_id(&self) -> u64 {
        let b = &self.inner;
        u64::from_be_bytes([
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15],
        ])
    }

    pub const fn is_zero(&self) -> bool {
        self.prefix() == 0 && self.interface_id() == 0
    }

    pub const fn is_multicast(&self) -> bool {
        self.inner[0] == 0xFF
    }

    /// The MGID flags nibble. Bit 0 marks a transient group; the other
    /// bits are reserved.
    pub const fn mcast_flags(&self) -> u8 {
        self.inner[1] >> 4
    }

    /// The MGID scope nibble.
    pub const fn mcast_scope(&self) -> u8 {
        self.inner[1] & 0x0F
    }

    /// Bytes 2 and 3 of an MGID, which carry the signature of whoever
    /// allocated it (e.g. `0x401B` for IPoIB, `0xA01B` for the SA).
    pub const fn mcast_signature(&self) -> u16 {
        u16::from_be_bytes([self.inner[2], self.inner[3]])
    }

    /// Return a copy with the byte at `idx` replaced.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is not less than 16.
    pub const fn with_byte(mut self, idx: usize, val: u8) -> Self {
        self.inner[idx] = val;
        self
    }

    pub const fn with_interface_id(self, interface_id: u64) -> Self {
        Self::from_parts(self.prefix(), interface_id)
    }
}

impl From<[u8; 16]> for Gid {
    fn from(bytes: [u8; 16]) -> Self {
        Self { inner: bytes }
    }
}

impl From<Gid> for [u8; 16] {
    fn from(gid: Gid) -> Self {
        gid.inner
    }
}

impl FromStr for Gid {
    type Err = String;

    /// Parse the uncompressed colon form, eight groups of up to four
    /// hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = [0u16; 8];
        let mut n = 0;
        for part in s.split(':') {
            if n == 8 {
                return Err(format!("too many groups in GID: {s}"));
            }
            words[n] = u16::from_str_radix(part, 16)
                .map_err(|e| format!("bad GID group {part:?}: {e}"))?;
            n += 1;
        }

        if n != 8 {
            return Err(format!("expected 8 groups in GID: {s}"));
        }

        Ok(Self::from_const(words))
    }
}

impl Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.inner;
        for i in 0..8 {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}{:02x}", b[i * 2], b[i * 2 + 1])?;
        }
        Ok(())
    }
}

// There's no reason to view the raw bytes in a debug context.
impl Debug for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gid({self})")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn parts_round_trip() {
        let gid = Gid::from_parts(DEFAULT_SUBNET_PREFIX, 0x0002_c903_0000_1234);
        assert_eq!(gid.prefix(), DEFAULT_SUBNET_PREFIX);
        assert_eq!(gid.interface_id(), 0x0002_c903_0000_1234);
        assert!(!gid.is_multicast());
    }

    #[test]
    fn display_and_parse() {
        let s = Gid::IPOIB_BROADCAST.to_string();
        assert_eq!(s, "ff12:401b:ffff:0000:0000:0000:ffff:ffff");
        assert_eq!(s.parse::<Gid>().unwrap(), Gid::IPOIB_BROADCAST);
        assert!("ff12:401b".parse::<Gid>().is_err());
        assert!("ff12:401b:ffff:0:0:0:ffff:ffff:1".parse::<Gid>().is_err());
    }

    #[test]
    fn mgid_nibbles() {
        let g = Gid::IPOIB_SITE_LOCAL;
        assert!(g.is_multicast());
        assert_eq!(g.mcast_flags(), 0x1);
        assert_eq!(g.mcast_scope(), 0x5);
        assert_eq!(g.mcast_signature(), 0x401B);
    }
}
