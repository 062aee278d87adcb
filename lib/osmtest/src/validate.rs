// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Checking the SA against the expected subnet.
//!
//! A bulk pass asks for every record of one kind and requires each
//! expected record to come back exactly once and to match under its
//! mask. A single-key pass asks for each expected record by its key
//! and requires exactly one answer. Both report every disagreement
//! they find before failing.

use crate::api::FromSaRecord;
use crate::api::Gid;
use crate::api::GuidInfoRecord;
use crate::api::LftRecord;
use crate::api::LinkRecord;
use crate::api::Method;
use crate::api::MftRecord;
use crate::api::NodeRecord;
use crate::api::PERMISSIVE_LID;
use crate::api::PKeyTableRecord;
use crate::api::PathRecord;
use crate::api::PortRecord;
use crate::api::SmInfoFilter;
use crate::api::SmInfoRecord;
use crate::api::SwitchInfoRecord;
use crate::compare::FieldMismatch;
use crate::compare::FieldValue;
use crate::compare::compare_link;
use crate::compare::compare_node;
use crate::compare::compare_path;
use crate::compare::compare_port;
use crate::context::Expect;
use crate::context::ValidationContext;
use crate::context::typed;
use crate::error::Error;
use crate::error::Failure;
use crate::error::Result;
use crate::query::NodeFilter;
use crate::query::PathFilter;
use crate::query::Query;
use crate::store::Expected;
use crate::store::ExpectedSubnet;
use crate::store::Key;
use crate::store::Observed;
use crate::store::Record;
use crate::trap;
use slog::debug;
use slog::info;
use slog::warn;

type Compared = std::result::Result<(), FieldMismatch>;

/// A record kind that can be validated against the store.
pub trait Validate: FromSaRecord {
    const KIND: &'static str;

    /// The natural key of a received record.
    fn key(&self) -> Key;

    fn is_kind(key: &Key) -> bool;

    fn expected(rec: &mut Record) -> Option<&mut Expected<Self>>;

    fn compare(exp: &Expected<Self>, rcv: &Self) -> Compared;

    /// The request for every record of this kind.
    fn bulk() -> Query;

    /// The request for the records filed under `key`.
    fn by_key(key: &Key) -> Option<Query>;
}

impl Validate for NodeRecord {
    const KIND: &'static str = "node";

    fn key(&self) -> Key {
        Key::Node(self.lid)
    }

    fn is_kind(key: &Key) -> bool {
        matches!(key, Key::Node(_))
    }

    fn expected(rec: &mut Record) -> Option<&mut Expected<Self>> {
        match rec {
            Record::Node(e) => Some(e),
            _ => None,
        }
    }

    fn compare(exp: &Expected<Self>, rcv: &Self) -> Compared {
        compare_node(&exp.expected, &exp.mask, rcv)
    }

    fn bulk() -> Query {
        Query::Nodes(NodeFilter::All)
    }

    fn by_key(key: &Key) -> Option<Query> {
        match key {
            Key::Node(lid) => Some(Query::Nodes(NodeFilter::Lid(*lid))),
            _ => None,
        }
    }
}

impl Validate for PortRecord {
    const KIND: &'static str = "port";

    fn key(&self) -> Key {
        Key::Port { lid: self.lid, port_num: self.port_num }
    }

    fn is_kind(key: &Key) -> bool {
        matches!(key, Key::Port { .. })
    }

    fn expected(rec: &mut Record) -> Option<&mut Expected<Self>> {
        match rec {
            Record::Port(e) => Some(e),
            _ => None,
        }
    }

    fn compare(exp: &Expected<Self>, rcv: &Self) -> Compared {
        compare_port(&exp.expected, &exp.mask, rcv)
    }

    fn bulk() -> Query {
        Query::Ports { lid: None, port_num: None }
    }

    fn by_key(key: &Key) -> Option<Query> {
        match key {
            Key::Port { lid, port_num } => Some(Query::Ports {
                lid: Some(*lid),
                port_num: Some(*port_num),
            }),
            _ => None,
        }
    }
}

impl Validate for PathRecord {
    const KIND: &'static str = "path";

    fn key(&self) -> Key {
        Key::Path { slid: self.slid, dlid: self.dlid }
    }

    fn is_kind(key: &Key) -> bool {
        matches!(key, Key::Path { .. })
    }

    fn expected(rec: &mut Record) -> Option<&mut Expected<Self>> {
        match rec {
            Record::Path(e) => Some(e),
            _ => None,
        }
    }

    fn compare(exp: &Expected<Self>, rcv: &Self) -> Compared {
        compare_path(&exp.expected, &exp.mask, rcv)
    }

    fn bulk() -> Query {
        Query::Paths(PathFilter::All)
    }

    fn by_key(key: &Key) -> Option<Query> {
        match key {
            Key::Path { slid, dlid } => {
                Some(Query::Paths(PathFilter::Lids {
                    slid: *slid,
                    dlid: *dlid,
                }))
            }
            _ => None,
        }
    }
}

impl Validate for LinkRecord {
    const KIND: &'static str = "link";

    fn key(&self) -> Key {
        Key::Link {
            from_lid: self.from_lid,
            from_port_num: self.from_port_num,
        }
    }

    fn is_kind(key: &Key) -> bool {
        matches!(key, Key::Link { .. })
    }

    fn expected(rec: &mut Record) -> Option<&mut Expected<Self>> {
        match rec {
            Record::Link(e) => Some(e),
            _ => None,
        }
    }

    fn compare(exp: &Expected<Self>, rcv: &Self) -> Compared {
        compare_link(&exp.expected, rcv)
    }

    fn bulk() -> Query {
        Query::Links { from_lid: None, to_lid: None }
    }

    /// Links are asked for by source LID, which returns every link
    /// leaving that node.
    fn by_key(key: &Key) -> Option<Query> {
        match key {
            Key::Link { from_lid, .. } => Some(Query::Links {
                from_lid: Some(*from_lid),
                to_lid: None,
            }),
            _ => None,
        }
    }
}

/// Account for one received record. `limit` is how many times a
/// record may legitimately be returned.
pub fn check_one<R: Validate>(
    subnet: &mut ExpectedSubnet,
    rcv: &R,
    limit: u32,
    failures: &mut Vec<Failure>,
) {
    let key = rcv.key();
    let Some(exp) = subnet.find_mut(&key).and_then(R::expected) else {
        failures.push(Failure::UnexpectedRecord { key });
        return;
    };

    if exp.count() >= limit {
        let count = exp.observe();
        failures.push(Failure::DuplicateRecord { key, count });
        return;
    }

    exp.observe();
    if let Err(mismatch) = R::compare(exp, rcv) {
        failures.push(Failure::FieldMismatch { key, mismatch });
    }
}

/// Report every record of kind `R` that was never observed.
pub fn find_missing<R: Validate>(
    subnet: &ExpectedSubnet,
    failures: &mut Vec<Failure>,
) {
    for (key, rec) in subnet.iter() {
        if R::is_kind(key) && rec.count() == 0 {
            failures.push(Failure::MissingRecord { key: key.clone() });
        }
    }
}

fn keys_of<R: Validate>(subnet: &ExpectedSubnet) -> Vec<Key> {
    subnet
        .iter()
        .map(|(k, _)| k)
        .filter(|k| R::is_kind(k))
        .cloned()
        .collect()
}

fn finish(
    ctx: &ValidationContext<'_>,
    kind: &str,
    failures: Vec<Failure>,
) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }

    for f in &failures {
        warn!(ctx.log, "validation failure";
            "kind" => kind,
            "failure" => %f
        );
    }
    Err(Error::Validation(failures))
}

/// Ask for the records of kind `R` one key at a time. Used when the SA
/// does not support a bulk request for the kind.
fn fetch_by_key<R: Validate>(
    ctx: &mut ValidationContext<'_>,
    step: &str,
) -> Result<Vec<R>> {
    let mut queries: Vec<Query> =
        keys_of::<R>(&ctx.subnet).iter().filter_map(R::by_key).collect();
    queries.dedup();

    let mut recs = vec![];
    for q in queries {
        recs.extend(ctx.query_opt::<R>(step, &q)?);
    }
    Ok(recs)
}

/// Validate every record of kind `R` with one bulk request.
pub fn validate_bulk<R: Validate>(
    ctx: &mut ValidationContext<'_>,
    limit: u32,
) -> Result<()> {
    let step = format!("validate {} records", R::KIND);
    ctx.subnet.prepare();

    let recs = match ctx.try_query(&R::bulk()) {
        Ok(recs) => typed::<R>(&step, recs)?,
        Err(e) if e.is_no_records() => vec![],
        Err(e) if e.is_unsupported() => {
            info!(ctx.log, "bulk request unsupported, asking per key";
                "kind" => R::KIND
            );
            fetch_by_key::<R>(ctx, &step)?
        }
        Err(e) => return Err(Error::query(step, e)),
    };

    let mut failures = vec![];
    for rcv in &recs {
        check_one(&mut ctx.subnet, rcv, limit, &mut failures);
    }
    find_missing::<R>(&ctx.subnet, &mut failures);

    debug!(ctx.log, "bulk pass done";
        "kind" => R::KIND,
        "received" => recs.len(),
        "failures" => failures.len()
    );
    finish(ctx, R::KIND, failures)
}

/// Validate every record of kind `R` by asking for it alone. Each
/// request must return exactly that record.
pub fn validate_single<R: Validate>(
    ctx: &mut ValidationContext<'_>,
) -> Result<()> {
    let step = format!("validate single {} record", R::KIND);
    let mut failures = vec![];

    for key in keys_of::<R>(&ctx.subnet) {
        let Some(q) = R::by_key(&key) else {
            continue;
        };

        let recs: Vec<R> = ctx.query_opt(&step, &q)?;
        match recs.as_slice() {
            [] => failures.push(Failure::MissingRecord { key }),
            [rcv] => check_exact(&mut ctx.subnet, &key, rcv, &mut failures),
            _ => failures.push(Failure::DuplicateRecord {
                key,
                count: recs.len() as u32,
            }),
        }
    }

    finish(ctx, R::KIND, failures)
}

/// Check a record returned for a request naming `key`.
fn check_exact<R: Validate>(
    subnet: &mut ExpectedSubnet,
    key: &Key,
    rcv: &R,
    failures: &mut Vec<Failure>,
) {
    if rcv.key() != *key {
        failures.push(Failure::UnexpectedRecord { key: rcv.key() });
        return;
    }

    let Some(exp) = subnet.find_mut(key).and_then(R::expected) else {
        failures.push(Failure::UnexpectedRecord { key: key.clone() });
        return;
    };

    if let Err(mismatch) = R::compare(exp, rcv) {
        failures.push(Failure::FieldMismatch { key: key.clone(), mismatch });
    }
}

/// Look every node up by its node GUID. The answer must include the
/// node at its expected LID.
pub fn validate_nodes_by_guid(
    ctx: &mut ValidationContext<'_>,
) -> Result<()> {
    let step = "validate node by guid";
    let guids: Vec<(Key, u64)> = ctx
        .subnet
        .nodes()
        .map(|n| (Key::Node(n.expected.lid), n.expected.info.node_guid))
        .collect();
    let mut failures = vec![];

    for (key, guid) in guids {
        let q = Query::Nodes(NodeFilter::NodeGuid(guid));
        let recs: Vec<NodeRecord> = ctx.query_opt(step, &q)?;
        match recs.iter().find(|r| r.key() == key) {
            Some(rcv) => {
                check_exact(&mut ctx.subnet, &key, rcv, &mut failures)
            }
            None => failures.push(Failure::MissingRecord { key }),
        }
    }

    finish(ctx, "node", failures)
}

/// Look every path up by its pair of port GUIDs. Every answer must
/// carry the requested interface ids. Paths whose GIDs are unknown
/// are skipped.
pub fn validate_paths_by_guid(
    ctx: &mut ValidationContext<'_>,
) -> Result<()> {
    let step = "validate path by guid";
    let pairs: Vec<(Key, u64, u64)> = ctx
        .subnet
        .paths()
        .map(|p| {
            let e = &p.expected;
            (e.key(), e.sgid.interface_id(), e.dgid.interface_id())
        })
        .filter(|(_, s, d)| *s != 0 && *d != 0)
        .collect();
    let mut failures = vec![];

    for (key, sguid, dguid) in pairs {
        let q = Query::Paths(PathFilter::Guids { sguid, dguid });
        let recs: Vec<PathRecord> = ctx.query_opt(step, &q)?;

        for rcv in &recs {
            if let Err(mismatch) = check_guids(rcv, sguid, dguid) {
                failures.push(Failure::FieldMismatch {
                    key: rcv.key(),
                    mismatch,
                });
            }
        }

        match recs.iter().find(|r| r.key() == key) {
            Some(rcv) => {
                check_exact(&mut ctx.subnet, &key, rcv, &mut failures)
            }
            None => failures.push(Failure::MissingRecord { key }),
        }
    }

    finish(ctx, "path", failures)
}

fn check_guids(rcv: &PathRecord, sguid: u64, dguid: u64) -> Compared {
    let check = |field, want: u64, gid: &Gid| {
        let got = gid.interface_id();
        if got == want {
            return Ok(());
        }
        Err(FieldMismatch {
            field,
            expected: FieldValue::U64(want),
            received: FieldValue::U64(got),
        })
    };

    check("sgid", sguid, &rcv.sgid)?;
    check("dgid", dguid, &rcv.dgid)
}

/// Path requests naming GIDs that cannot be a unicast endpoint of this
/// subnet. Each must fail.
fn path_by_gid_probes(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let sgid = ctx.local.gid();
    let probes = [
        ("path to ipoib broadcast", Gid::IPOIB_BROADCAST),
        ("path to foreign prefix", sgid.with_byte(7, 0xFF)),
        ("path to site local prefix", sgid.with_byte(1, 0xC0)),
        ("path to site local ipoib", Gid::IPOIB_SITE_LOCAL),
    ];

    for (step, dgid) in probes {
        let q = Query::Paths(PathFilter::Gids { sgid, dgid });
        ctx.expect_failure(step, Expect::Any, &q)?;
    }
    Ok(())
}

fn guid_info_probes(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let lids: Vec<u16> =
        ctx.subnet.nodes().map(|n| n.expected.lid).collect();
    for lid in lids {
        let q = Query::GuidInfo { lid: Some(lid) };
        ctx.query_opt::<GuidInfoRecord>("guid info by lid", &q)?;
    }
    Ok(())
}

/// The LID after the local port's base LID, the first alias an LMC
/// above zero gives it.
fn alias_lid(ctx: &ValidationContext<'_>, step: &str) -> Result<u16> {
    let lid = ctx.local.lid;
    lid.checked_add(1).ok_or_else(|| {
        Error::violation(step, format!("base lid 0x{lid:X} has no alias"))
    })
}

/// The LID after the local port's base LID answers for the local port
/// only when the LMC says it should. The permissive LID never names a
/// record.
fn lmc_probes(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let step = "port by lid after base lid";
    let lid = ctx.local.lid;
    let alias = alias_lid(ctx, step)?;
    let port_num = ctx.local.port_num;
    let q = Query::Ports { lid: Some(alias), port_num: Some(port_num) };

    if ctx.lmc == 0 {
        if let Ok(recs) = ctx.try_query(&q) {
            let ports = typed::<PortRecord>(step, recs)?;
            if ports.iter().any(|p| p.lid == lid) {
                return Err(Error::violation(
                    step,
                    format!("lid 0x{alias:X} aliases the local port"),
                ));
            }
        }
    } else {
        let ports: Vec<PortRecord> = ctx.query_as(step, &q)?;
        if !ports.iter().any(|p| p.lid == lid) {
            return Err(Error::violation(
                step,
                format!("lmc {} alias 0x{alias:X} not answered", ctx.lmc),
            ));
        }
    }

    let q =
        Query::Ports { lid: Some(PERMISSIVE_LID), port_num: Some(port_num) };
    ctx.expect_nothing("port by permissive lid", &q)?;

    let q = Query::GuidInfo { lid: Some(lid) };
    ctx.query_opt::<GuidInfoRecord>("guid info local lid", &q)?;
    let q = Query::GuidInfo { lid: Some(PERMISSIVE_LID) };
    ctx.expect_nothing("guid info permissive lid", &q)
}

/// The P_Key table is only for trusted requesters.
fn pkey_probes(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let q = Query::PKeyTable { lid: Some(ctx.local.lid) };
    let trusted = ctx.trusted_opts();
    let recs = ctx
        .try_query_with(&q, &trusted)
        .map_err(|e| Error::query("trusted pkey table", e))?;
    typed::<PKeyTableRecord>("trusted pkey table", recs)?;

    let untrusted = ctx.query_opts();
    ctx.expect_failure_with(
        "untrusted pkey table",
        Expect::Any,
        &q,
        &untrusted,
    )?;

    let q = Query::PKeyTable { lid: Some(PERMISSIVE_LID) };
    ctx.expect_nothing_with("pkey table permissive lid", &q, &trusted)
}

fn switch_probes(ctx: &mut ValidationContext<'_>, lid: u16) -> Result<()> {
    for lid in [None, Some(lid)] {
        let q = Query::SwitchInfo { lid };
        ctx.query_opt::<SwitchInfoRecord>("switch info", &q)?;
        let q = Query::Lft { lid };
        ctx.query_opt::<LftRecord>("linear forwarding table", &q)?;
        let q = Query::Mft { lid };
        ctx.query_opt::<MftRecord>("multicast forwarding table", &q)?;
    }

    let pairs =
        [(Some(lid), None), (None, Some(lid)), (Some(lid), Some(lid))];
    for (from_lid, to_lid) in pairs {
        let q = Query::Links { from_lid, to_lid };
        ctx.query_opt::<LinkRecord>("links by lid", &q)?;
    }
    Ok(())
}

fn sm_info_probes(ctx: &mut ValidationContext<'_>, lid: u16) -> Result<()> {
    let q = Query::SmInfo { method: Method::Set, filter: SmInfoFilter::All };
    ctx.expect_failure("set sm info", Expect::Any, &q)?;

    let mut filters = vec![
        SmInfoFilter::All,
        SmInfoFilter::Lid(lid),
        SmInfoFilter::Guid(ctx.local.port_guid),
    ];
    filters.extend((1..=15).map(SmInfoFilter::Priority));
    filters.extend((1..=3).map(SmInfoFilter::State));

    for filter in filters {
        let q = Query::SmInfo { method: Method::GetTable, filter };
        ctx.query_opt::<SmInfoRecord>("sm info", &q)?;
    }
    Ok(())
}

/// With a non-zero LMC, the LID after the base LID must answer like
/// the base LID.
fn alias_probes(ctx: &mut ValidationContext<'_>, alias: u16) -> Result<()> {
    let step = "node by alias lid";
    let q = Query::Nodes(NodeFilter::Lid(alias));
    let nodes: Vec<NodeRecord> = ctx.query_as(step, &q)?;
    if !nodes.iter().any(|n| n.lid == ctx.local.lid) {
        return Err(Error::violation(
            step,
            format!("alias 0x{alias:X} does not name the local node"),
        ));
    }

    let q = Query::GuidInfo { lid: Some(alias) };
    ctx.query_opt::<GuidInfoRecord>("guid info alias lid", &q)?;
    switch_probes(ctx, alias)?;
    sm_info_probes(ctx, alias)
}

fn path_lmc_probes(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let alias = alias_lid(ctx, "path between alias lids")?;
    let q = Query::Paths(PathFilter::Lids { slid: alias, dlid: alias });
    ctx.query_as::<PathRecord>("path between alias lids", &q)?;

    let q = Query::Paths(PathFilter::Lids {
        slid: PERMISSIVE_LID,
        dlid: PERMISSIVE_LID,
    });
    ctx.expect_failure("path between permissive lids", Expect::Any, &q)?;

    let q = Query::Paths(PathFilter::Lids {
        slid: alias,
        dlid: PERMISSIVE_LID,
    });
    ctx.expect_failure("path to permissive lid", Expect::Any, &q)?;
    Ok(())
}

fn check_paths(ctx: &ValidationContext<'_>) -> bool {
    !ctx.opts.ignore_path_records && ctx.subnet.num_paths() != 0
}

/// Run the full validation sequence against the expected subnet.
pub fn validate_against_db(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let lid = ctx.local.lid;

    validate_bulk::<NodeRecord>(ctx, 1)?;
    validate_single::<NodeRecord>(ctx)?;
    validate_nodes_by_guid(ctx)?;

    path_by_gid_probes(ctx)?;
    guid_info_probes(ctx)?;
    lmc_probes(ctx)?;
    pkey_probes(ctx)?;
    switch_probes(ctx, lid)?;

    let q = Query::Nodes(NodeFilter::Lid(PERMISSIVE_LID));
    ctx.expect_nothing("node by permissive lid", &q)?;

    sm_info_probes(ctx, lid)?;
    trap::inform_info_checks(ctx)?;

    if ctx.lmc != 0 {
        let alias = alias_lid(ctx, "node by alias lid")?;
        alias_probes(ctx, alias)?;
    }

    if check_paths(ctx) {
        let limit = 1u32 << (2 * u32::from(ctx.lmc));
        validate_bulk::<PathRecord>(ctx, limit)?;
        if ctx.lmc != 0 {
            path_lmc_probes(ctx)?;
        }
    }

    validate_bulk::<PortRecord>(ctx, 1)?;
    validate_single::<PortRecord>(ctx)?;

    if check_paths(ctx) {
        validate_single::<PathRecord>(ctx)?;
        validate_paths_by_guid(ctx)?;
    }

    validate_bulk::<LinkRecord>(ctx, 1)?;

    info!(ctx.log, "validation passed";
        "nodes" => ctx.subnet.num_nodes(),
        "ports" => ctx.subnet.num_ports(),
        "paths" => ctx.subnet.num_paths(),
        "links" => ctx.subnet.num_links()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::NodeInfo;
    use crate::api::SaRecord;
    use crate::compare::node_identity_mask;
    use crate::context::Options;
    use crate::query::LocalPort;
    use crate::query::QueryError;
    use crate::query::QueryOpts;
    use crate::query::SaClient;
    use slog::Logger;

    /// An SA that never answers.
    struct Silent(LocalPort);

    impl SaClient for Silent {
        fn query(
            &mut self,
            _query: &Query,
            _opts: &QueryOpts,
        ) -> std::result::Result<Vec<SaRecord>, QueryError> {
            Err(QueryError::Timeout)
        }

        fn local_port(&self) -> LocalPort {
            self.0
        }
    }

    fn node(lid: u16, guid: u64) -> NodeRecord {
        NodeRecord {
            lid,
            info: NodeInfo { node_guid: guid, ..Default::default() },
            desc: String::new(),
        }
    }

    fn subnet(nodes: &[NodeRecord]) -> ExpectedSubnet {
        let mut db = ExpectedSubnet::new();
        for n in nodes {
            db.insert(Record::Node(Expected::new(
                n.clone(),
                node_identity_mask(),
            )))
            .unwrap();
        }
        db
    }

    #[test]
    fn exactly_once() {
        let a = node(1, 0xA);
        let b = node(2, 0xB);
        let mut db = subnet(&[a.clone(), b.clone()]);
        let mut failures = vec![];

        check_one(&mut db, &a, 1, &mut failures);
        check_one(&mut db, &b, 1, &mut failures);
        find_missing::<NodeRecord>(&db, &mut failures);
        assert!(failures.is_empty());
        assert!(db.iter().all(|(_, r)| r.count() == 1));
    }

    #[test]
    fn duplicate_missing_unexpected() {
        let a = node(1, 0xA);
        let b = node(2, 0xB);
        let mut db = subnet(&[a.clone(), b]);
        let mut failures = vec![];

        check_one(&mut db, &a, 1, &mut failures);
        check_one(&mut db, &a, 1, &mut failures);
        check_one(&mut db, &node(7, 0x7), 1, &mut failures);
        find_missing::<NodeRecord>(&db, &mut failures);

        assert_eq!(
            failures,
            vec![
                Failure::DuplicateRecord { key: Key::Node(1), count: 2 },
                Failure::UnexpectedRecord { key: Key::Node(7) },
                Failure::MissingRecord { key: Key::Node(2) },
            ]
        );
    }

    #[test]
    fn repeat_limit() {
        let a = node(1, 0xA);
        let mut db = subnet(&[a.clone()]);
        let mut failures = vec![];

        for _ in 0..4 {
            check_one(&mut db, &a, 4, &mut failures);
        }
        assert!(failures.is_empty());

        check_one(&mut db, &a, 4, &mut failures);
        assert_eq!(
            failures,
            vec![Failure::DuplicateRecord { key: Key::Node(1), count: 5 }]
        );
    }

    #[test]
    fn mismatch_still_counts() {
        let a = node(1, 0xA);
        let mut db = subnet(&[a]);
        let mut failures = vec![];

        check_one(&mut db, &node(1, 0xB), 1, &mut failures);
        find_missing::<NodeRecord>(&db, &mut failures);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].is_mismatch());
    }

    #[test]
    fn guid_pair_check() {
        let mut rcv = PathRecord::default();
        rcv.sgid = Gid::from_parts(0xFE80_0000_0000_0000, 0x11);
        rcv.dgid = Gid::from_parts(0xFE80_0000_0000_0000, 0x22);
        assert!(check_guids(&rcv, 0x11, 0x22).is_ok());
        let err = check_guids(&rcv, 0x11, 0x33).unwrap_err();
        assert_eq!(err.field, "dgid");
    }

    #[test]
    fn top_lid_has_no_alias() {
        let local =
            LocalPort { lid: 0xFFFF, port_num: 1, ..Default::default() };
        let mut sa = Silent(local);
        let log = Logger::root(slog::Discard, slog::o!());
        let mut ctx = ValidationContext::new(&mut sa, Options::default(), log);

        for lmc in [0, 1] {
            ctx.lmc = lmc;
            let err = lmc_probes(&mut ctx).unwrap_err();
            assert!(matches!(err, Error::ProtocolViolation { .. }), "{err}");
        }
        let err = path_lmc_probes(&mut ctx).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }), "{err}");
        assert_eq!(ctx.stats.queries, 0);
    }
}
