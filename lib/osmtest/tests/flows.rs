// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Whole flows run against the simulated SA.

use osmtest::QueryError;
use osmtest::api::FromSaRecord;
use osmtest::api::JoinFlags;
use osmtest::api::McCompMask as Comp;
use osmtest::api::McMemberRecord;
use osmtest::api::NodeType;
use osmtest::api::Notice;
use osmtest::api::SaRecord;
use osmtest::api::Selector;
use osmtest::api::encode_selector;
use osmtest::api::is_ipoib_broadcast;
use osmtest::api::mtu;
use osmtest::api::rate;
use osmtest::api::scope;
use osmtest::api::scope_state;
use osmtest::mcast;
use osmtest::query::LocalPort;
use osmtest::report::RunSummary;
use osmtest_test_utils as common;

use common::*;

fn run_flow(sa: &mut SimSa, opts: Options) -> Result<(), Error> {
    let mut ctx = ValidationContext::new(sa, opts, discard_log());
    flow::run(&mut ctx)
}

#[test]
fn all_flow_passes() -> anyhow::Result<()> {
    let mut sa = sim(fabric());
    let groups = sa.group_count();
    run_flow(&mut sa, test_opts(Flow::All))?;

    // Everything the run created it also tore down.
    assert_eq!(sa.group_count(), groups);
    assert_eq!(sa.service_count(), 0);
    assert_eq!(sa.subscription_count(), 0);
    Ok(())
}

#[test]
fn all_flow_on_two_switches() -> anyhow::Result<()> {
    let mut sa = sim(two_switch_fabric());
    run_flow(&mut sa, test_opts(Flow::All))?;
    Ok(())
}

#[test]
fn multicast_modes() -> anyhow::Result<()> {
    for mmode in [1, 2, 3] {
        let mut sa = sim(fabric());
        let groups = sa.group_count();
        let opts = Options { mmode, ..test_opts(Flow::Multicast) };
        run_flow(&mut sa, opts)?;
        assert_eq!(sa.group_count(), groups, "mmode {mmode}");
    }
    Ok(())
}

/// A create request for a new link-local group with the local port as
/// full member.
fn full_create(ctx: &ValidationContext<'_>) -> McMemberRecord {
    let ss = scope_state(scope::LINK_LOCAL, JoinFlags::FULL_MEMBER);
    mcast::request(ctx, Gid::ZERO, ss)
}

#[test]
fn create_needs_qkey_and_pkey() {
    let mut sa = sim(fabric());
    let mut ctx =
        ValidationContext::new(&mut sa, test_opts(Flow::All), discard_log());
    let rec = full_create(&ctx);
    let comp = Comp::MGID
        | Comp::PORT_GID
        | Comp::JOIN_STATE
        | Comp::SL
        | Comp::FLOW
        | Comp::TCLASS;

    let err = mcast::try_send(&mut ctx, Method::Set, comp, rec).unwrap_err();
    assert!(err.is_status(MadStatus::INSUF_COMPS), "{err}");
}

#[test]
fn create_selectors_against_fabric_limits() {
    let mut sa = sim(fabric());
    let mut ctx =
        ValidationContext::new(&mut sa, test_opts(Flow::All), discard_log());
    let base = full_create(&ctx);

    let rate_comp = Comp::CREATE | Comp::RATE_SEL | Comp::RATE;
    let mtu_comp = Comp::CREATE | Comp::MTU_SEL | Comp::MTU;
    let cases = [
        (rate_comp, Selector::GreaterThan, rate::MAX, false),
        (rate_comp, Selector::LessThan, rate::MIN, false),
        (rate_comp, Selector::Exactly, rate::R10, true),
        (mtu_comp, Selector::GreaterThan, mtu::MAX, false),
        (mtu_comp, Selector::LessThan, mtu::MIN, false),
        (mtu_comp, Selector::Exactly, mtu::M2048, true),
        (mtu_comp, Selector::Exactly, mtu::M4096, false),
    ];

    for (comp, sel, v, ok) in cases {
        let mut rec = base;
        if comp.contains(Comp::RATE) {
            rec.rate = encode_selector(sel, v);
        } else {
            rec.mtu = encode_selector(sel, v);
        }

        let res = mcast::try_send(&mut ctx, Method::Set, comp, rec);
        match (res, ok) {
            (Ok(recs), true) => {
                assert_eq!(recs.len(), 1);
                let rsp = recs[0];
                if comp.contains(Comp::RATE) {
                    assert_eq!(rsp.rate & 0x3F, v);
                } else {
                    assert_eq!(rsp.mtu & 0x3F, v);
                }
            }
            (Err(e), false) => {
                assert!(e.is_status(MadStatus::REQ_INVALID), "{sel} {v}: {e}")
            }
            (res, _) => panic!("{sel} {v}: unexpected {res:?}"),
        }
    }
}

/// Forwards to the sim, keeping every multicast request it passes on.
/// With `self_leave` set, a non-proxy leave of a group created by
/// proxy is answered with that status instead.
struct Recording<'a> {
    sa: &'a mut SimSa,
    sent: Vec<(Method, McMemberRecord)>,
    proxied: Vec<Gid>,
    self_leave: Option<MadStatus>,
}

impl<'a> Recording<'a> {
    fn new(sa: &'a mut SimSa) -> Self {
        Self { sa, sent: vec![], proxied: vec![], self_leave: None }
    }
}

impl SaClient for Recording<'_> {
    fn query(
        &mut self,
        query: &Query,
        opts: &QueryOpts,
    ) -> Result<Vec<SaRecord>, QueryError> {
        let Query::McMember { method, rec, .. } = query else {
            return self.sa.query(query, opts);
        };
        self.sent.push((*method, *rec));

        let by_self = *method == Method::Delete && !rec.proxy_join;
        if let Some(status) = self.self_leave {
            if by_self && self.proxied.contains(&rec.mgid) {
                return Err(QueryError::Remote(status));
            }
        }

        let recs = self.sa.query(query, opts)?;
        if *method == Method::Set && rec.proxy_join {
            let mgids = recs
                .iter()
                .cloned()
                .filter_map(McMemberRecord::from_sa_record)
                .map(|r| r.mgid);
            self.proxied.extend(mgids);
        }
        Ok(recs)
    }

    fn wait_report(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notice>, QueryError> {
        self.sa.wait_report(timeout)
    }

    fn local_port(&self) -> LocalPort {
        self.sa.local_port()
    }
}

#[test]
fn proxy_leave_as_self_needs_req_invalid() {
    let mut sa = sim(fabric());
    let mut rec = Recording::new(&mut sa);
    rec.self_leave = Some(MadStatus::INSUF_COMPS);

    let opts = test_opts(Flow::Multicast);
    let mut ctx = ValidationContext::new(&mut rec, opts, discard_log());
    let err = flow::run(&mut ctx).unwrap_err();
    match err {
        Error::WrongErrorKind { step, .. } => {
            assert_eq!(step, "proxy leave as self")
        }
        _ => panic!("unexpected error: {err}"),
    }
}

#[test]
fn multicast_flow_leaves_ipoib_alone() -> anyhow::Result<()> {
    for mmode in [1, 3] {
        let mut sa = sim(fabric());
        let mut rec = Recording::new(&mut sa);
        let opts = Options { mmode, ..test_opts(Flow::Multicast) };
        let mut ctx = ValidationContext::new(&mut rec, opts, discard_log());
        flow::run(&mut ctx)?;

        let joined = rec.sent.iter().any(|(m, r)| {
            *m == Method::Set && is_ipoib_broadcast(&r.mgid)
        });
        assert!(joined, "mmode {mmode}");
        let left = rec.sent.iter().any(|(m, r)| {
            *m == Method::Delete && is_ipoib_broadcast(&r.mgid)
        });
        assert!(!left, "mmode {mmode}");
    }
    Ok(())
}

#[test]
fn ipoib_group_cannot_be_recreated() {
    let mut sa = sim(fabric());
    let groups = sa.group_count();
    let member = sa
        .fabric()
        .nodes()
        .iter()
        .filter(|n| n.info.node_type() == Some(NodeType::Ca))
        .nth(1)
        .map(|n| sa.fabric().gid(n.info.port_guid))
        .unwrap();

    let mut ctx =
        ValidationContext::new(&mut sa, test_opts(Flow::All), discard_log());

    // The engine will not leave the group, even on behalf of its member.
    let gone = McMemberRecord {
        mgid: Gid::IPOIB_BROADCAST,
        port_gid: member,
        scope_state: 0x21,
        proxy_join: true,
        ..Default::default()
    };
    let queries = ctx.stats.queries;
    let err =
        mcast::leave(&mut ctx, "leave ipoib", Comp::MEMBER, gone).unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation { .. }), "{err}");
    assert_eq!(ctx.stats.queries, queries);

    // Remove it behind the engine's back, then ask for it again.
    mcast::try_send(&mut ctx, Method::Delete, Comp::MEMBER, gone).unwrap();
    let ss = scope_state(scope::LINK_LOCAL, JoinFlags::FULL_MEMBER);
    let create = mcast::request(&ctx, Gid::IPOIB_BROADCAST, ss);
    let err = mcast::try_send(&mut ctx, Method::Set, Comp::CREATE, create)
        .unwrap_err();
    assert!(err.is_status(MadStatus::REQ_INVALID), "{err}");

    drop(ctx);
    assert_eq!(sa.group_count(), groups - 1);
}

#[test]
fn service_flow_passes() -> anyhow::Result<()> {
    let mut sa = sim(fabric());
    run_flow(&mut sa, test_opts(Flow::Service))?;
    assert_eq!(sa.service_count(), 0);
    Ok(())
}

#[test]
fn event_forwarding_takes_reports() -> anyhow::Result<()> {
    let mut sa = sim(fabric());
    sa.raise_trap(Notice {
        is_generic: true,
        trap_num: 0x0100,
        ..Default::default()
    });
    run_flow(&mut sa, test_opts(Flow::EventForwarding))?;
    assert_eq!(sa.subscription_count(), 0);
    Ok(())
}

#[test]
fn trap_flow_sees_gid_changes() -> anyhow::Result<()> {
    let mut sa = sim(fabric());
    let guid = sa.fabric().nodes()[1].info.port_guid;
    sa.raise_gid_trap(trap::GID_OUT_OF_SERVICE, guid);
    // Not subscribed to by the flow, so never reported.
    sa.raise_trap(Notice { trap_num: 0x0100, ..Default::default() });
    sa.raise_gid_trap(trap::GID_IN_SERVICE, guid);

    run_flow(&mut sa, test_opts(Flow::Trap))?;
    assert_eq!(sa.subscription_count(), 0);
    Ok(())
}

#[test]
fn stress_levels() -> anyhow::Result<()> {
    for stress in [1, 2, 3] {
        let mut sa = sim(fabric());
        let opts = Options { stress, ..test_opts(Flow::Stress) };
        let mut ctx = ValidationContext::new(&mut sa, opts, discard_log());
        flow::run(&mut ctx)?;
        assert!(ctx.stats.queries >= 10, "level {stress}");
    }

    let mut sa = sim(fabric());
    let opts = Options { stress: 4, ..test_opts(Flow::Stress) };
    let err = run_flow(&mut sa, opts).unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation { .. }), "{err}");
    Ok(())
}

#[test]
fn qos_dump_lists_every_port() -> anyhow::Result<()> {
    let path = scratch_path("qos.dump");
    let mut sa = sim(fabric());
    let opts =
        Options { qos_dump: Some(path.clone()), ..test_opts(Flow::Qos) };
    run_flow(&mut sa, opts)?;

    let dump = std::fs::read_to_string(&path)?;
    let headers = dump.lines().filter(|l| l.starts_with("# port")).count();
    assert_eq!(headers, 7);

    std::fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn summary_of_a_run() -> anyhow::Result<()> {
    let mut sa = sim(fabric());
    let mut ctx =
        ValidationContext::new(&mut sa, test_opts(Flow::All), discard_log());
    let outcome = flow::run(&mut ctx);
    assert!(outcome.is_ok());

    let summary = RunSummary::new(&ctx, &outcome);
    assert!(summary.passed);
    assert_eq!(summary.counts.nodes, 3);
    assert!(summary.stats.queries > 0);

    let mut out = vec![];
    summary.write(&mut out)?;
    let v: serde_json::Value = serde_json::from_slice(&out)?;
    assert_eq!(v["flow"], "All");
    assert_eq!(v["error"], serde_json::Value::Null);
    Ok(())
}

#[test]
fn summary_of_a_failed_run() {
    let mut sa = sim(fabric());
    let lid = node_lid(sa.fabric(), 0);
    sa.inject(Key::Node(lid), Fault::Duplicate);

    let mut ctx =
        ValidationContext::new(&mut sa, test_opts(Flow::All), discard_log());
    let outcome = flow::run(&mut ctx);
    let summary = RunSummary::new(&ctx, &outcome);
    assert!(!summary.passed);
    assert!(summary.error.is_some());
    assert!(summary.failures.iter().any(Failure::is_duplicate));
}
