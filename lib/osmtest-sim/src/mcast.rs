// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Multicast groups and their members.
//!
//! A Set on a group that exists is a join; a Set on a zero or unknown
//! MGID is a create. A Delete clears JoinState bits, removing the
//! member once it holds none and the group once it has no members.

use osmtest::api::Gid;
use osmtest::api::JoinFlags;
use osmtest::api::MCAST_LID_BASE;
use osmtest::api::MGID_PREFIX;
use osmtest::api::MadStatus;
use osmtest::api::McCompMask as Comp;
use osmtest::api::McMemberRecord;
use osmtest::api::SA_MGID_SIGNATURE;
use osmtest::api::Selector;
use osmtest::api::decode_selector;
use osmtest::api::encode_selector;
use osmtest::api::is_ipoib_broadcast;
use osmtest::api::join_flags;
use osmtest::api::mtu_rank;
use osmtest::api::rate_rank;
use osmtest::api::scope_state;
use osmtest::api::with_join_flags;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

/// The Q_Key of the IPoIB broadcast group.
pub const IPOIB_QKEY: u32 = 0x0B1B;

type Result<T> = std::result::Result<T, MadStatus>;

/// The MTU, rate and packet lifetime groups are measured against.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub mtu: u8,
    pub rate: u8,
    pub pkt_life: u8,
}

/// One of the three selector-carrying fields.
#[derive(Clone, Copy, Debug)]
enum Field {
    Mtu,
    Rate,
    Life,
}

impl Field {
    fn comps(self) -> (Comp, Comp) {
        match self {
            Self::Mtu => (Comp::MTU_SEL, Comp::MTU),
            Self::Rate => (Comp::RATE_SEL, Comp::RATE),
            Self::Life => (Comp::LIFE_SEL, Comp::LIFE),
        }
    }

    fn raw(self, rec: &McMemberRecord) -> u8 {
        match self {
            Self::Mtu => rec.mtu,
            Self::Rate => rec.rate,
            Self::Life => rec.pkt_life,
        }
    }

    /// The value's place on an ordered scale, or `None` for a code
    /// that means nothing.
    fn rank(self, v: u8) -> Option<u32> {
        let r = match self {
            Self::Mtu => mtu_rank(v),
            Self::Rate => rate_rank(v),
            Self::Life => return Some(u32::from(v)),
        };
        (r != 0 && r != u32::MAX).then_some(r)
    }

    /// The selector and value a request asks for, if it asks.
    fn requested(
        self,
        comp: Comp,
        rec: &McMemberRecord,
    ) -> Option<(Selector, u8)> {
        let (sel_bit, val_bit) = self.comps();
        if !comp.contains(val_bit) {
            return None;
        }
        let (sel, v) = decode_selector(self.raw(rec));
        let sel = if comp.contains(sel_bit) { sel } else { Selector::Exactly };
        Some((sel, v))
    }

    /// The value a new group takes, given what the fabric can do.
    fn pick(
        self,
        comp: Comp,
        rec: &McMemberRecord,
        fabric: u8,
    ) -> Result<u8> {
        let Some((sel, v)) = self.requested(comp, rec) else {
            return Ok(fabric);
        };
        let want = self.rank(v).ok_or(MadStatus::REQ_INVALID)?;
        let have = self.rank(fabric).ok_or(MadStatus::REQ_INVALID)?;

        match sel {
            Selector::Largest => Ok(fabric),
            Selector::Exactly if want <= have => Ok(v),
            Selector::GreaterThan | Selector::LessThan
                if sel.admits(have, want) =>
            {
                Ok(fabric)
            }
            _ => Err(MadStatus::REQ_INVALID),
        }
    }

    /// Check a join's request against the value the group has.
    fn check(
        self,
        comp: Comp,
        rec: &McMemberRecord,
        group: u8,
    ) -> Result<()> {
        let Some((sel, v)) = self.requested(comp, rec) else {
            return Ok(());
        };
        let want = self.rank(v).ok_or(MadStatus::REQ_INVALID)?;
        let have = self.rank(group).ok_or(MadStatus::REQ_INVALID)?;
        if sel.admits(have, want) {
            Ok(())
        } else {
            Err(MadStatus::REQ_INVALID)
        }
    }
}

#[derive(Clone, Debug)]
struct Group {
    /// The group's parameters. Port GID and JoinState are unused.
    params: McMemberRecord,
    members: BTreeMap<Gid, JoinFlags>,
}

impl Group {
    /// The record describing `port`'s membership. Every selector
    /// field is set to exactly the group's value.
    fn member_record(
        &self,
        port: Gid,
        flags: JoinFlags,
    ) -> McMemberRecord {
        let p = &self.params;
        McMemberRecord {
            port_gid: port,
            mtu: encode_selector(Selector::Exactly, p.mtu),
            rate: encode_selector(Selector::Exactly, p.rate),
            pkt_life: encode_selector(Selector::Exactly, p.pkt_life),
            scope_state: with_join_flags(p.scope_state, flags),
            ..*p
        }
    }
}

/// Every group the SA holds.
#[derive(Debug)]
pub struct Groups {
    groups: BTreeMap<Gid, Group>,
    limits: Limits,
    /// How many MLIDs can be handed out, starting at the base.
    mlid_count: u16,
    rng: StdRng,
}

impl Groups {
    pub fn new(limits: Limits, mlid_count: u16, seed: u64) -> Self {
        Self {
            groups: BTreeMap::new(),
            limits,
            mlid_count,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains(&self, mgid: &Gid) -> bool {
        self.groups.contains_key(mgid)
    }

    /// Create a group outside of any request, with `member` as its
    /// only full member.
    pub fn precreate(
        &mut self,
        mgid: Gid,
        qkey: u32,
        member: Gid,
    ) -> Result<McMemberRecord> {
        let mlid = self.free_mlid()?;
        let params = McMemberRecord {
            mgid,
            qkey,
            mlid,
            mtu: self.limits.mtu,
            pkey: 0xFFFF,
            rate: self.limits.rate,
            pkt_life: self.limits.pkt_life,
            scope_state: scope_state(mgid.mcast_scope(), JoinFlags::empty()),
            ..Default::default()
        };
        let mut g = Group { params, members: BTreeMap::new() };
        g.members.insert(member, JoinFlags::FULL_MEMBER);
        let rec = g.member_record(member, JoinFlags::FULL_MEMBER);
        self.groups.insert(mgid, g);
        Ok(rec)
    }

    fn free_mlid(&self) -> Result<u16> {
        let top = u32::from(MCAST_LID_BASE) + u32::from(self.mlid_count);
        (u32::from(MCAST_LID_BASE)..top)
            .map(|m| m as u16)
            .find(|m| self.groups.values().all(|g| g.params.mlid != *m))
            .ok_or(MadStatus::NO_RESOURCES)
    }

    fn allocate_mgid(&mut self, scope: u8) -> Gid {
        loop {
            let mut b = [0u8; 16];
            b[0] = MGID_PREFIX;
            b[1] = 0x10 | (scope & 0x0F);
            b[2..4].copy_from_slice(&SA_MGID_SIGNATURE.to_be_bytes());
            self.rng.fill(&mut b[4..]);
            let mgid = Gid::from(b);
            if !self.groups.contains_key(&mgid) {
                return mgid;
            }
        }
    }

    /// An MGID a requester may create: the multicast prefix, flags of
    /// zero or one, and never the SA's own signature on a transient
    /// address. The IPoIB broadcast groups belong to the SA alone.
    fn mgid_ok(mgid: &Gid) -> bool {
        let b = mgid.bytes();
        let flags = mgid.mcast_flags();
        b[0] == MGID_PREFIX
            && flags <= 1
            && !(flags == 1 && mgid.mcast_signature() == SA_MGID_SIGNATURE)
            && !is_ipoib_broadcast(mgid)
    }

    /// A Set from `requester`.
    pub fn set(
        &mut self,
        requester: Gid,
        comp: Comp,
        rec: &McMemberRecord,
    ) -> Result<McMemberRecord> {
        let flags = join_flags(rec.scope_state);
        if flags.is_empty() {
            return Err(MadStatus::REQ_INVALID);
        }
        if !comp.contains(Comp::PORT_GID | Comp::JOIN_STATE) {
            return Err(MadStatus::INSUF_COMPS);
        }
        if rec.port_gid != requester && !rec.proxy_join {
            return Err(MadStatus::REQ_INVALID);
        }

        if !rec.mgid.is_zero() && self.groups.contains_key(&rec.mgid) {
            return self.join(comp, rec, flags);
        }
        self.create(comp, rec, flags)
    }

    fn join(
        &mut self,
        comp: Comp,
        rec: &McMemberRecord,
        flags: JoinFlags,
    ) -> Result<McMemberRecord> {
        if !comp.contains(Comp::MEMBER) {
            return Err(MadStatus::INSUF_COMPS);
        }
        let Some(g) = self.groups.get_mut(&rec.mgid) else {
            return Err(MadStatus::REQ_INVALID);
        };

        Field::Mtu.check(comp, rec, g.params.mtu)?;
        Field::Rate.check(comp, rec, g.params.rate)?;
        Field::Life.check(comp, rec, g.params.pkt_life)?;

        let held = g.members.entry(rec.port_gid).or_default();
        *held |= flags;
        let held = *held;
        Ok(response(g, rec, held))
    }

    fn create(
        &mut self,
        comp: Comp,
        rec: &McMemberRecord,
        flags: JoinFlags,
    ) -> Result<McMemberRecord> {
        if !flags.contains(JoinFlags::FULL_MEMBER) {
            return Err(MadStatus::REQ_INVALID);
        }
        if !comp.contains(Comp::CREATE - Comp::MGID) {
            return Err(MadStatus::INSUF_COMPS);
        }
        if !rec.mgid.is_zero() && !Self::mgid_ok(&rec.mgid) {
            return Err(MadStatus::REQ_INVALID);
        }

        let mtu = Field::Mtu.pick(comp, rec, self.limits.mtu)?;
        let rate = Field::Rate.pick(comp, rec, self.limits.rate)?;
        let pkt_life = Field::Life.pick(comp, rec, self.limits.pkt_life)?;
        let mlid = self.free_mlid()?;

        let (mgid, scope) = if rec.mgid.is_zero() {
            let scope = rec.scope();
            (self.allocate_mgid(scope), scope)
        } else {
            (rec.mgid, rec.mgid.mcast_scope())
        };

        let params = McMemberRecord {
            mgid,
            port_gid: Gid::ZERO,
            qkey: rec.qkey,
            mlid,
            mtu,
            tclass: rec.tclass,
            pkey: rec.pkey,
            rate,
            pkt_life,
            sl_flow_hop: rec.sl_flow_hop,
            scope_state: scope_state(scope, JoinFlags::empty()),
            proxy_join: false,
        };
        let mut g = Group { params, members: BTreeMap::new() };
        g.members.insert(rec.port_gid, flags);
        let rsp = response(&g, rec, flags);
        self.groups.insert(mgid, g);
        Ok(rsp)
    }

    /// A Delete from `requester`.
    pub fn delete(
        &mut self,
        requester: Gid,
        comp: Comp,
        rec: &McMemberRecord,
    ) -> Result<McMemberRecord> {
        let flags = join_flags(rec.scope_state);
        if flags.is_empty() {
            return Err(MadStatus::REQ_INVALID);
        }
        if !comp.contains(Comp::MEMBER) {
            return Err(MadStatus::INSUF_COMPS);
        }
        if rec.port_gid != requester && !rec.proxy_join {
            return Err(MadStatus::REQ_INVALID);
        }

        let g = self
            .groups
            .get_mut(&rec.mgid)
            .ok_or(MadStatus::REQ_INVALID)?;
        let held = g
            .members
            .get_mut(&rec.port_gid)
            .ok_or(MadStatus::REQ_INVALID)?;
        if !held.contains(flags) {
            return Err(MadStatus::REQ_INVALID);
        }

        held.remove(flags);
        let left = *held;
        if !left.is_empty() {
            return Ok(response(g, rec, left));
        }

        g.members.remove(&rec.port_gid);
        let rsp = response(g, rec, flags);
        if g.members.is_empty() {
            self.groups.remove(&rec.mgid);
        }
        Ok(rsp)
    }

    fn matches(comp: Comp, rec: &McMemberRecord, g: &Group) -> bool {
        (!comp.contains(Comp::MGID) || g.params.mgid == rec.mgid)
            && (!comp.contains(Comp::MLID) || g.params.mlid == rec.mlid)
            && (!comp.contains(Comp::PKEY) || g.params.pkey == rec.pkey)
            && (!comp.contains(Comp::QKEY) || g.params.qkey == rec.qkey)
    }

    /// The member records a Get or GetTable selects. An untrusted
    /// requester sees one record per group, with no member named.
    pub fn query(
        &self,
        comp: Comp,
        rec: &McMemberRecord,
        trusted: bool,
    ) -> Vec<McMemberRecord> {
        let by_port = comp.contains(Comp::PORT_GID);
        let mut out = vec![];

        for g in self.groups.values().filter(|g| Self::matches(comp, rec, g))
        {
            if !trusted && !by_port {
                out.push(g.member_record(Gid::ZERO, JoinFlags::empty()));
                continue;
            }

            for (port, flags) in &g.members {
                if by_port && *port != rec.port_gid {
                    continue;
                }
                out.push(g.member_record(*port, *flags));
            }
        }
        out
    }
}

/// The answer to a join or leave: the requester's membership, under
/// the scope nibble it asked with.
fn response(
    g: &Group,
    rec: &McMemberRecord,
    flags: JoinFlags,
) -> McMemberRecord {
    McMemberRecord {
        scope_state: with_join_flags(rec.scope_state, flags),
        proxy_join: rec.proxy_join,
        ..g.member_record(rec.port_gid, flags)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use osmtest::api::mgid_allocation_ok;
    use osmtest::api::mtu;
    use osmtest::api::rate;
    use osmtest::api::scope;

    const ME: Gid = Gid::from_parts(0xFE80_0000_0000_0000, 0x11);
    const YOU: Gid = Gid::from_parts(0xFE80_0000_0000_0000, 0x22);
    const MGID: Gid =
        Gid::from_const([0xff12, 0xa01c, 0xfe80, 0, 0, 0, 0x1234, 0x5678]);

    fn groups() -> Groups {
        let limits =
            Limits { mtu: mtu::M2048, rate: rate::R10, pkt_life: 18 };
        Groups::new(limits, 4, 7)
    }

    fn req(mgid: Gid, ss: u8) -> McMemberRecord {
        McMemberRecord {
            mgid,
            port_gid: ME,
            pkey: 0xFFFF,
            scope_state: ss,
            ..Default::default()
        }
    }

    #[test]
    fn allocated_mgid_follows_rule() {
        let mut g = groups();
        let rsp = g.set(ME, Comp::CREATE, &req(Gid::ZERO, 0x21)).unwrap();
        assert!(mgid_allocation_ok(&rsp.mgid, scope::LINK_LOCAL));
        assert_eq!(rsp.mlid, MCAST_LID_BASE);
        assert_eq!(rsp.scope_state, 0x21);
        assert_eq!(rsp.mtu, encode_selector(Selector::Exactly, mtu::M2048));
    }

    #[test]
    fn create_checks_run_in_order() {
        let mut g = groups();
        // Without a full member, the missing components do not matter.
        let res = g.set(ME, Comp::MEMBER, &req(MGID, 0x22));
        assert_eq!(res, Err(MadStatus::REQ_INVALID));

        let res = g.set(ME, Comp::CREATE - Comp::SL, &req(MGID, 0x21));
        assert_eq!(res, Err(MadStatus::INSUF_COMPS));

        let bad = MGID.with_byte(3, 0x1B);
        let res = g.set(ME, Comp::CREATE, &req(bad, 0x21));
        assert_eq!(res, Err(MadStatus::REQ_INVALID));
        assert!(g.is_empty());
    }

    #[test]
    fn ipoib_broadcast_is_never_created() {
        let mut g = groups();
        for mgid in [Gid::IPOIB_BROADCAST, Gid::IPOIB_BROADCAST_ALT] {
            let res = g.set(ME, Comp::CREATE, &req(mgid, 0x21));
            assert_eq!(res, Err(MadStatus::REQ_INVALID), "{mgid}");
        }
        assert!(g.is_empty());

        // Once precreated, a Set on it is an ordinary join.
        g.precreate(Gid::IPOIB_BROADCAST, IPOIB_QKEY, YOU).unwrap();
        g.set(ME, Comp::MEMBER, &req(Gid::IPOIB_BROADCAST, 0x21)).unwrap();
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn selectors_against_fabric() {
        let mut g = groups();
        let comp = Comp::CREATE | Comp::RATE_SEL | Comp::RATE;

        let mut r = req(Gid::ZERO, 0x21);
        r.rate = encode_selector(Selector::GreaterThan, rate::R60);
        assert_eq!(g.set(ME, comp, &r), Err(MadStatus::REQ_INVALID));

        r.rate = encode_selector(Selector::LessThan, rate::R60);
        let rsp = g.set(ME, comp, &r).unwrap();
        assert_eq!(rsp.rate & 0x3F, rate::R10);

        let comp = Comp::CREATE | Comp::MTU_SEL | Comp::MTU;
        let mut r = req(Gid::ZERO, 0x21);
        r.mtu = encode_selector(Selector::GreaterThan, 6);
        assert_eq!(g.set(ME, comp, &r), Err(MadStatus::REQ_INVALID));

        r.mtu = encode_selector(Selector::Exactly, mtu::M1024);
        let rsp = g.set(ME, comp, &r).unwrap();
        assert_eq!(rsp.mtu & 0x3F, mtu::M1024);

        let comp = Comp::CREATE | Comp::LIFE_SEL | Comp::LIFE;
        let mut r = req(Gid::ZERO, 0x21);
        r.pkt_life = encode_selector(Selector::LessThan, 0);
        assert_eq!(g.set(ME, comp, &r), Err(MadStatus::REQ_INVALID));
    }

    #[test]
    fn join_state_algebra() {
        let mut g = groups();
        g.set(ME, Comp::CREATE, &req(MGID, 0x23)).unwrap();

        let ss = |r: Result<McMemberRecord>| r.map(|r| r.scope_state);
        let m = Comp::MEMBER;
        assert_eq!(
            ss(g.delete(ME, m, &req(MGID, 0x26))),
            Err(MadStatus::REQ_INVALID)
        );
        assert_eq!(ss(g.delete(ME, m, &req(MGID, 0x22))), Ok(0x21));
        assert_eq!(ss(g.set(ME, m, &req(MGID, 0x24))), Ok(0x25));
        assert_eq!(ss(g.set(ME, m, &req(MGID, 0x22))), Ok(0x27));
        assert_eq!(ss(g.delete(ME, m, &req(MGID, 0x22))), Ok(0x25));

        // Clearing the last bits echoes them and removes the group.
        assert_eq!(ss(g.delete(ME, m, &req(MGID, 0x25))), Ok(0x25));
        assert!(!g.contains(&MGID));
        assert_eq!(
            ss(g.delete(ME, m, &req(MGID, 0x21))),
            Err(MadStatus::REQ_INVALID)
        );
    }

    #[test]
    fn proxy_membership() {
        let mut g = groups();
        let mut r = req(Gid::ZERO, 0x21);
        r.port_gid = YOU;
        assert_eq!(g.set(ME, Comp::CREATE, &r), Err(MadStatus::REQ_INVALID));

        r.proxy_join = true;
        let rsp = g.set(ME, Comp::CREATE, &r).unwrap();
        assert_eq!(rsp.port_gid, YOU);

        let mine = req(rsp.mgid, 0x21);
        assert_eq!(
            g.delete(ME, Comp::MEMBER, &mine),
            Err(MadStatus::REQ_INVALID)
        );

        let theirs = McMemberRecord { mgid: rsp.mgid, ..r };
        g.delete(ME, Comp::MEMBER, &theirs).unwrap();
        assert!(g.is_empty());
    }

    #[test]
    fn mlids_run_out() {
        let mut g = groups();
        for _ in 0..4 {
            g.set(ME, Comp::CREATE, &req(Gid::ZERO, 0x21)).unwrap();
        }
        let res = g.set(ME, Comp::CREATE, &req(Gid::ZERO, 0x21));
        assert_eq!(res, Err(MadStatus::NO_RESOURCES));
    }

    #[test]
    fn trust_decides_visibility() {
        let mut g = groups();
        g.precreate(Gid::IPOIB_BROADCAST, IPOIB_QKEY, YOU).unwrap();
        g.set(ME, Comp::MEMBER, &req(Gid::IPOIB_BROADCAST, 0x21)).unwrap();

        let any = McMemberRecord::default();
        let open = g.query(Comp::empty(), &any, false);
        assert_eq!(open.len(), 1);
        assert!(open[0].port_gid.is_zero());
        assert_eq!(g.query(Comp::empty(), &any, true).len(), 2);

        let mine = req(Gid::IPOIB_BROADCAST, 0x20);
        let got = g.query(Comp::MGID | Comp::PORT_GID, &mine, false);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].port_gid, ME);
    }
}
