// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The multicast membership engine.
//!
//! Every join and leave is one MCMemberRecord Set or Delete. The
//! helpers here issue them, check the answer, and keep track of which
//! groups the engine created and which JoinState bits it holds in
//! each, so the groups can be torn down afterwards.

use crate::api::FromSaRecord;
use crate::api::Gid;
use crate::api::JoinFlags;
use crate::api::McCompMask;
use crate::api::McMemberRecord;
use crate::api::Method;
use crate::api::Selector;
use crate::api::encode_selector;
use crate::api::is_ipoib_broadcast;
use crate::api::mgid_allocation_ok;
use crate::api::rate;
use crate::api::scope;
use crate::api::scope_state;
use crate::context::Expect;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::query::Query;
use crate::query::QueryError;
use crate::store::Expected;
use crate::store::Key;
use crate::store::Record;
use slog::debug;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

mod scenario;

pub use scenario::run;

/// A valid MGID the engine asks the SA to create.
pub const GOOD_MGID: Gid =
    Gid::from_const([0xff12, 0xa01c, 0xfe80, 0, 0, 0, 0x1234, 0x5678]);

/// An IPoIB-style MGID no one is expected to have joined.
pub const IPOIB_UNJOINED: Gid =
    Gid::from_const([0xff12, 0x401b, 0xffff, 0, 0, 0, 0xffff, 0xffee]);

/// The highest MLID the engine accepts from the SA.
pub const MLID_MAX: u16 = 0xFFFE;

/// A request with the local port as member, link-local scope and no
/// JoinState. Callers fill in the rest.
pub fn base_request(ctx: &ValidationContext<'_>) -> McMemberRecord {
    McMemberRecord {
        port_gid: ctx.local.gid(),
        pkey: 0xFFFF,
        rate: encode_selector(Selector::GreaterThan, rate::R2_5),
        scope_state: scope_state(scope::LINK_LOCAL, JoinFlags::empty()),
        ..Default::default()
    }
}

/// A request for `mgid` with the given `scope_state`.
pub fn request(
    ctx: &ValidationContext<'_>,
    mgid: Gid,
    scope_state: u8,
) -> McMemberRecord {
    McMemberRecord { mgid, scope_state, ..base_request(ctx) }
}

fn one(step: &str, recs: Vec<McMemberRecord>) -> Result<McMemberRecord> {
    let n = recs.len();
    match <[McMemberRecord; 1]>::try_from(recs) {
        Ok([rec]) => Ok(rec),
        Err(_) => Err(Error::violation(
            step,
            format!("expected one member record, got {n}"),
        )),
    }
}

/// Issue a request that may fail.
pub fn try_send(
    ctx: &mut ValidationContext<'_>,
    method: Method,
    comp: McCompMask,
    rec: McMemberRecord,
) -> std::result::Result<Vec<McMemberRecord>, QueryError> {
    let q = Query::mcmember(method, comp, rec);
    let recs = ctx.try_query(&q)?;
    Ok(recs
        .into_iter()
        .filter_map(McMemberRecord::from_sa_record)
        .collect())
}

fn send(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    method: Method,
    comp: McCompMask,
    rec: McMemberRecord,
) -> Result<McMemberRecord> {
    let q = Query::mcmember(method, comp, rec);
    let recs = ctx.query_as(step, &q)?;
    let rsp = one(step, recs)?;
    debug!(ctx.log, "member record";
        "step" => step,
        "mgid" => %rsp.mgid,
        "mlid" => format!("0x{:04X}", rsp.mlid),
        "scope_state" => format!("0x{:02X}", rsp.scope_state)
    );
    Ok(rsp)
}

/// Join, and require success.
pub fn join(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    comp: McCompMask,
    rec: McMemberRecord,
) -> Result<McMemberRecord> {
    send(ctx, step, Method::Set, comp, rec)
}

/// Leave, and require success. The IPoIB broadcast groups are never
/// left.
pub fn leave(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    comp: McCompMask,
    rec: McMemberRecord,
) -> Result<McMemberRecord> {
    refuse_ipoib(step, &rec.mgid)?;
    send(ctx, step, Method::Delete, comp, rec)
}

/// Fail a step that would create or delete an IPoIB broadcast group.
/// The engine may join those groups but does not own them.
pub fn refuse_ipoib(step: &str, mgid: &Gid) -> Result<()> {
    if !is_ipoib_broadcast(mgid) {
        return Ok(());
    }
    Err(Error::violation(
        step,
        format!("refusing to create or delete ipoib group {mgid}"),
    ))
}

pub fn join_fails(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    expect: Expect,
    comp: McCompMask,
    rec: McMemberRecord,
) -> Result<()> {
    let q = Query::mcmember(Method::Set, comp, rec);
    ctx.expect_failure(step, expect, &q).map(|_| ())
}

pub fn leave_fails(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    expect: Expect,
    comp: McCompMask,
    rec: McMemberRecord,
) -> Result<()> {
    let q = Query::mcmember(Method::Delete, comp, rec);
    ctx.expect_failure(step, expect, &q).map(|_| ())
}

/// Require the response to carry exactly `want` as its scope and
/// JoinState.
pub fn expect_state(step: &str, rsp: &McMemberRecord, want: u8) -> Result<()> {
    if rsp.scope_state == want {
        return Ok(());
    }
    Err(Error::violation(
        step,
        format!(
            "scope_state 0x{:02X}, expected 0x{want:02X}",
            rsp.scope_state
        ),
    ))
}

/// Require an MGID allocated by the SA to follow the allocation rule.
pub fn expect_allocated(
    step: &str,
    req: &McMemberRecord,
    rsp: &McMemberRecord,
) -> Result<()> {
    if mgid_allocation_ok(&rsp.mgid, req.scope()) {
        return Ok(());
    }
    Err(Error::violation(
        step,
        format!("allocated mgid {} breaks the allocation rule", rsp.mgid),
    ))
}

/// A group the engine created.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Created {
    pub mlid: u16,
    /// The JoinState bits the local port holds.
    pub flags: JoinFlags,
}

/// The groups the engine has created and still belongs to.
#[derive(Debug, Default)]
pub struct Tracker {
    groups: BTreeMap<Gid, Created>,
    mlids: BTreeSet<u16>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a successful join. The response carries every bit the
    /// member now holds. IPoIB broadcast groups are not tracked, so
    /// cleanup never leaves them.
    pub fn joined(&mut self, rsp: &McMemberRecord) {
        if is_ipoib_broadcast(&rsp.mgid) {
            return;
        }
        self.mlids.insert(rsp.mlid);
        let g = self
            .groups
            .entry(rsp.mgid)
            .or_insert(Created { mlid: rsp.mlid, flags: JoinFlags::empty() });
        g.flags = rsp.join_flags();
    }

    /// Note a successful leave of `flags` from `mgid`.
    pub fn left(&mut self, mgid: &Gid, flags: JoinFlags) {
        if let Some(g) = self.groups.get_mut(mgid) {
            g.flags.remove(flags);
            if g.flags.is_empty() {
                self.groups.remove(mgid);
            }
        }
    }

    pub fn get(&self, mgid: &Gid) -> Option<&Created> {
        self.groups.get(mgid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Gid, &Created)> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Every MLID the SA has granted the engine.
    pub fn mlids(&self) -> &BTreeSet<u16> {
        &self.mlids
    }
}

/// How many groups the SA holds.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GroupCount {
    pub total: usize,
    pub ipoib: usize,
}

/// Ask for every group and refresh the store's group records. Two
/// groups with one MGID break the SA's own rules.
pub fn query_groups(ctx: &mut ValidationContext<'_>) -> Result<GroupCount> {
    let step = "get all groups";
    let q = Query::mcmember(
        Method::GetTable,
        McCompMask::empty(),
        McMemberRecord::default(),
    );
    let groups: Vec<McMemberRecord> = ctx.query_opt(step, &q)?;

    ctx.subnet.retain(|k, _| !matches!(k, Key::Mcast(_)));

    let mut seen = BTreeSet::new();
    let mut count = GroupCount::default();
    for g in groups {
        if !seen.insert(g.mgid) {
            return Err(Error::violation(
                step,
                format!("mgid {} listed twice", g.mgid),
            ));
        }
        if is_ipoib_broadcast(&g.mgid) {
            count.ipoib += 1;
        }
        count.total += 1;

        if ctx.subnet.find(&Key::Mcast(g.mlid)).is_some() {
            return Err(Error::violation(
                step,
                format!("mlid 0x{:04X} listed twice", g.mlid),
            ));
        }
        let rec = Expected::new(g, McMemberRecord::default());
        ctx.subnet.insert(Record::Mcast(rec))?;
    }

    debug!(ctx.log, "groups";
        "total" => count.total,
        "ipoib" => count.ipoib
    );
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::*;

    fn rsp(mgid: Gid, mlid: u16, ss: u8) -> McMemberRecord {
        McMemberRecord { mgid, mlid, scope_state: ss, ..Default::default() }
    }

    #[test]
    fn tracker_follows_join_state() {
        let mut t = Tracker::new();
        t.joined(&rsp(GOOD_MGID, 0xC001, 0x21));
        t.joined(&rsp(GOOD_MGID, 0xC001, 0x23));
        assert_eq!(
            t.get(&GOOD_MGID).unwrap().flags,
            JoinFlags::FULL_MEMBER | JoinFlags::NON_MEMBER
        );

        t.left(&GOOD_MGID, JoinFlags::NON_MEMBER);
        assert_eq!(t.get(&GOOD_MGID).unwrap().flags, JoinFlags::FULL_MEMBER);

        t.left(&GOOD_MGID, JoinFlags::FULL_MEMBER);
        assert!(t.get(&GOOD_MGID).is_none());
        assert_eq!(t.len(), 0);
        assert!(t.mlids().contains(&0xC001));
    }

    #[test]
    fn tracker_skips_ipoib() {
        let mut t = Tracker::new();
        t.joined(&rsp(Gid::IPOIB_BROADCAST, 0xC000, 0x21));
        t.joined(&rsp(Gid::IPOIB_BROADCAST_ALT, 0xC001, 0x21));
        assert_eq!(t.len(), 0);
        assert!(t.mlids().is_empty());

        assert!(refuse_ipoib("create", &Gid::IPOIB_BROADCAST).is_err());
        assert!(refuse_ipoib("create", &GOOD_MGID).is_ok());
    }

    #[test]
    fn good_mgid_is_not_sa_allocated() {
        assert_eq!(GOOD_MGID.bytes()[0], 0xFF);
        assert!(!mgid_allocation_ok(&GOOD_MGID, scope::LINK_LOCAL));
        assert!(!is_ipoib_broadcast(&IPOIB_UNJOINED));
    }
}
