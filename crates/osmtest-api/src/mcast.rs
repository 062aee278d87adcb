// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Multicast member records and the bit algebra of `scope_state`.
//!
//! The `scope_state` byte of an MCMemberRecord holds the group scope in
//! its high nibble and the requester's JoinState in its low nibble.
//! JoinState is four independent flags; a port's membership in a group
//! is the OR of every flag it has joined with and not since left.

use crate::gid::Gid;
use bitflags::bitflags;
use serde::Deserialize;
use serde::Serialize;

bitflags! {
    /// JoinState flags.
    ///
    /// The meaning of bits 2 and 3 has moved between revisions of the
    /// SA specification (send-only non-member versus send-only full
    /// member). The engine only ever treats them as opaque bits.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
        Serialize,
    )]
    pub struct JoinFlags: u8 {
        const FULL_MEMBER = 1 << 0;
        const NON_MEMBER = 1 << 1;
        const SEND_ONLY = 1 << 2;
        const SEND_ONLY_FULL = 1 << 3;
    }
}

/// Multicast scopes as carried in the high nibble of `scope_state` and
/// the second byte of an MGID.
pub mod scope {
    pub const LINK_LOCAL: u8 = 0x2;
    pub const SITE_LOCAL: u8 = 0x5;
    pub const ORG_LOCAL: u8 = 0x8;
    pub const GLOBAL: u8 = 0xE;
}

/// The scope nibble of a `scope_state` byte.
pub const fn scope(scope_state: u8) -> u8 {
    scope_state >> 4
}

/// The JoinState flags of a `scope_state` byte.
pub const fn join_flags(scope_state: u8) -> JoinFlags {
    JoinFlags::from_bits_truncate(scope_state & 0x0F)
}

/// Replace the JoinState of `scope_state`, keeping its scope.
pub const fn with_join_flags(scope_state: u8, flags: JoinFlags) -> u8 {
    (scope_state & 0xF0) | flags.bits()
}

/// Replace the scope of `scope_state`, keeping its JoinState.
pub const fn with_scope(scope_state: u8, scope: u8) -> u8 {
    (scope << 4) | (scope_state & 0x0F)
}

/// Compose a `scope_state` byte.
pub const fn scope_state(scope: u8, flags: JoinFlags) -> u8 {
    (scope << 4) | flags.bits()
}

/// The prefix byte every MGID starts with.
pub const MGID_PREFIX: u8 = 0xFF;

/// The signature the SA places in bytes 2-3 of MGIDs it allocates.
pub const SA_MGID_SIGNATURE: u16 = 0xA01B;

/// The signature IPoIB places in bytes 2-3 of its MGIDs.
pub const IPOIB_MGID_SIGNATURE: u16 = 0x401B;

/// Check an MGID allocated by the SA in response to a create with a
/// zero MGID. It must carry the multicast prefix, the transient flag
/// with the requested scope, and the SA signature.
pub fn mgid_allocation_ok(mgid: &Gid, requested_scope: u8) -> bool {
    let b = mgid.bytes();
    b[0] == MGID_PREFIX
        && b[1] == (0x10 | (requested_scope & 0x0F))
        && mgid.mcast_signature() == SA_MGID_SIGNATURE
}

/// Return true for the IPoIB broadcast groups, which the engine may
/// join but must never create or delete.
pub fn is_ipoib_broadcast(mgid: &Gid) -> bool {
    *mgid == Gid::IPOIB_BROADCAST || *mgid == Gid::IPOIB_BROADCAST_ALT
}

bitflags! {
    /// Component mask of an MCMemberRecord request.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
        Serialize,
    )]
    pub struct McCompMask: u64 {
        const MGID = 1 << 0;
        const PORT_GID = 1 << 1;
        const QKEY = 1 << 2;
        const MLID = 1 << 3;
        const MTU_SEL = 1 << 4;
        const MTU = 1 << 5;
        const TCLASS = 1 << 6;
        const PKEY = 1 << 7;
        const RATE_SEL = 1 << 8;
        const RATE = 1 << 9;
        const LIFE_SEL = 1 << 10;
        const LIFE = 1 << 11;
        const SL = 1 << 12;
        const FLOW = 1 << 13;
        const HOP = 1 << 14;
        const SCOPE = 1 << 15;
        const JOIN_STATE = 1 << 16;
        const PROXY = 1 << 17;

        /// The components a request creating a new group must supply.
        const CREATE = Self::MGID.bits()
            | Self::PORT_GID.bits()
            | Self::QKEY.bits()
            | Self::PKEY.bits()
            | Self::SL.bits()
            | Self::FLOW.bits()
            | Self::JOIN_STATE.bits()
            | Self::TCLASS.bits();

        /// The components any join or leave must supply.
        const MEMBER = Self::MGID.bits()
            | Self::PORT_GID.bits()
            | Self::JOIN_STATE.bits();
    }
}

/// An MCMemberRecord.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct McMemberRecord {
    pub mgid: Gid,
    pub port_gid: Gid,
    pub qkey: u32,
    pub mlid: u16,
    /// Selector and MTU.
    pub mtu: u8,
    pub tclass: u8,
    pub pkey: u16,
    /// Selector and rate.
    pub rate: u8,
    /// Selector and packet lifetime.
    pub pkt_life: u8,
    /// SL (top four bits), FlowLabel (20 bits) and HopLimit (low
    /// byte).
    pub sl_flow_hop: u32,
    pub scope_state: u8,
    pub proxy_join: bool,
}

impl McMemberRecord {
    pub const fn scope(&self) -> u8 {
        scope(self.scope_state)
    }

    pub const fn join_flags(&self) -> JoinFlags {
        join_flags(self.scope_state)
    }

    pub fn set_join_flags(&mut self, flags: JoinFlags) {
        self.scope_state = with_join_flags(self.scope_state, flags);
    }

    pub const fn sl(&self) -> u8 {
        (self.sl_flow_hop >> 28) as u8
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scope_state_accessors() {
        let ss = scope_state(scope::LINK_LOCAL, JoinFlags::FULL_MEMBER);
        assert_eq!(ss, 0x21);
        assert_eq!(scope(ss), scope::LINK_LOCAL);
        assert_eq!(join_flags(ss), JoinFlags::FULL_MEMBER);

        let ss = with_join_flags(
            ss,
            JoinFlags::FULL_MEMBER | JoinFlags::NON_MEMBER,
        );
        assert_eq!(ss, 0x23);
        assert_eq!(with_scope(ss, scope::SITE_LOCAL), 0x53);
    }

    #[test]
    fn partial_leave_algebra() {
        // Clearing NonMember from FullMember|NonMember leaves only
        // FullMember.
        let held = join_flags(0x23);
        let leave = join_flags(0x22);
        assert!(held.contains(leave));
        assert_eq!(held - leave, JoinFlags::FULL_MEMBER);

        // Asserting a bit never held is not a subset.
        let held = join_flags(0x21);
        assert!(!held.contains(join_flags(0x26)));
    }

    #[test]
    fn allocation_rule() {
        let good = Gid::from_const([0xff12, 0xa01b, 0xffff, 0, 0, 0, 0, 7]);
        assert!(mgid_allocation_ok(&good, scope::LINK_LOCAL));
        assert!(!mgid_allocation_ok(&good, scope::SITE_LOCAL));

        let wrong_sig = good.with_byte(3, 0x1c);
        assert!(!mgid_allocation_ok(&wrong_sig, scope::LINK_LOCAL));

        let wrong_prefix = good.with_byte(0, 0xfa);
        assert!(!mgid_allocation_ok(&wrong_prefix, scope::LINK_LOCAL));
    }

    #[test]
    fn comp_mask_sets() {
        assert!(McCompMask::CREATE.contains(McCompMask::MEMBER));
        let missing = McCompMask::CREATE - McCompMask::QKEY - McCompMask::PKEY;
        assert_eq!(
            McCompMask::CREATE - missing,
            McCompMask::QKEY | McCompMask::PKEY
        );
    }
}
