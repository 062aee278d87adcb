// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The simulated SA: an [`SaClient`] answering from a [`Fabric`].

use crate::fabric::Fabric;
use crate::fabric::FabricError;
use crate::fault::Fault;
use crate::fault::Faults;
use crate::inform::Subscriptions;
use crate::mcast::Groups;
use crate::mcast::IPOIB_QKEY;
use crate::mcast::Limits;
use crate::service::Services;
use osmtest::api::ClassPortInfo;
use osmtest::api::DEFAULT_SM_KEY;
use osmtest::api::Gid;
use osmtest::api::MadStatus;
use osmtest::api::Method;
use osmtest::api::NodeType;
use osmtest::api::Notice;
use osmtest::api::PathRecord;
use osmtest::api::SaRecord;
use osmtest::api::SmInfoFilter;
use osmtest::api::SmInfoRecord;
use osmtest::api::sm_state;
use osmtest::api::vlarb_block;
use osmtest::query::LocalPort;
use osmtest::query::NodeFilter;
use osmtest::query::PathFilter;
use osmtest::query::Query;
use osmtest::query::QueryError;
use osmtest::query::QueryOpts;
use osmtest::query::SaClient;
use osmtest::store::Key;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::trace;
use std::time::Duration;
use std::time::Instant;

type Result<T> = std::result::Result<T, MadStatus>;

/// The SA's capability mask: traps and notices, plus the optional
/// records it serves.
const SA_CAP_MASK: u16 = 0x0602;

/// The response time value the SA advertises.
const SA_RESP_TIME: u32 = 18;

/// The priority the simulated SM runs with.
const SM_PRIORITY: u8 = 1;

/// Generic trap type of a subnet management trap.
const TRAP_TYPE_SM: u8 = 4;

/// Producer type of the subnet manager.
const PRODUCER_SM: u32 = 4;

#[derive(Clone, Copy, Debug)]
pub struct SimConfig {
    /// Seed for every random choice the SA makes.
    pub seed: u64,
    /// The SM_Key trusted requests must carry.
    pub sm_key: u64,
    /// How many MLIDs the SA can hand out.
    pub mlid_count: u16,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { seed: 0, sm_key: DEFAULT_SM_KEY, mlid_count: 64 }
    }
}

/// Which LIDs an optional LID field selects.
#[derive(Clone, Copy, Debug)]
enum LidFilter {
    Any,
    Base(u16),
    /// The LID names no port.
    Nothing,
}

impl LidFilter {
    fn admits(self, lid: u16) -> bool {
        match self {
            Self::Any => true,
            Self::Base(base) => lid == base,
            Self::Nothing => false,
        }
    }
}

fn admits<T: PartialEq>(want: Option<T>, have: T) -> bool {
    want.is_none_or(|w| w == have)
}

fn records<T: Into<SaRecord>>(
    recs: impl IntoIterator<Item = T>,
) -> Vec<SaRecord> {
    recs.into_iter().map(Into::into).collect()
}

fn is_bulk(q: &Query) -> bool {
    matches!(
        q,
        Query::Nodes(NodeFilter::All)
            | Query::Ports { lid: None, port_num: None }
            | Query::Paths(PathFilter::All)
    )
}

/// An SA answering from a simulated fabric. The local port is the
/// first CA of the fabric, which also hosts the master SM.
pub struct SimSa {
    fabric: Fabric,
    local: LocalPort,
    cfg: SimConfig,
    groups: Groups,
    services: Services,
    informs: Subscriptions,
    faults: Faults,
    bulk: bool,
    log: Logger,
}

impl SimSa {
    pub fn new(
        fabric: Fabric,
        cfg: SimConfig,
        log: Logger,
    ) -> std::result::Result<Self, FabricError> {
        let mut cas = fabric
            .nodes()
            .iter()
            .filter(|n| n.info.node_type() == Some(NodeType::Ca));
        let sm = cas.next().ok_or(FabricError::NoLocalPort)?;
        let local = LocalPort {
            lid: sm.lid,
            port_num: sm.info.port_num.max(1),
            port_guid: sm.info.port_guid,
            subnet_prefix: fabric.subnet_prefix(),
            sm_lid: sm.lid,
        };

        // The broadcast group is already there, joined by some other
        // port of the fabric.
        let member = match cas.next() {
            Some(n) => fabric.gid(n.info.port_guid),
            None => fabric.gid(!local.port_guid),
        };
        let limits = Limits {
            mtu: fabric.mtu(),
            rate: fabric.rate(),
            pkt_life: fabric.pkt_life(),
        };
        let mut groups = Groups::new(limits, cfg.mlid_count, cfg.seed);
        groups
            .precreate(Gid::IPOIB_BROADCAST, IPOIB_QKEY, member)
            .map_err(|_| FabricError::LidsExhausted)?;

        info!(log, "simulated sa up";
            "nodes" => fabric.nodes().len(),
            "ports" => fabric.ports().len(),
            "lmc" => fabric.lmc(),
            "local_lid" => local.lid
        );

        Ok(Self {
            fabric,
            local,
            cfg,
            groups,
            services: Services::new(),
            informs: Subscriptions::new(),
            faults: Faults::default(),
            bulk: true,
            log,
        })
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    /// Fault the record filed under `key` in every later response.
    pub fn inject(&mut self, key: Key, fault: Fault) {
        debug!(self.log, "fault injected"; "key" => %key, "fault" => ?fault);
        self.faults.inject(key, fault);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Refuse requests for whole node, port and path tables, as an SA
    /// without bulk support would.
    pub fn disable_bulk(&mut self) {
        self.bulk = false;
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.informs.len()
    }

    /// Queue a trap for forwarding to its subscribers.
    pub fn raise_trap(&mut self, notice: Notice) {
        self.informs.raise(notice);
    }

    /// Queue trap 64 or 65 about the port with `port_guid`.
    pub fn raise_gid_trap(&mut self, trap_num: u16, port_guid: u64) {
        let notice = Notice {
            is_generic: true,
            trap_type: TRAP_TYPE_SM,
            trap_num,
            issuer_lid: self.local.sm_lid,
            producer_type: PRODUCER_SM,
            gid: self.fabric.gid(port_guid),
        };
        self.raise_trap(notice);
    }

    fn lid_filter(&self, lid: Option<u16>) -> LidFilter {
        match lid {
            None => LidFilter::Any,
            Some(lid) => match self.fabric.resolve(lid) {
                Some(base) => LidFilter::Base(base),
                None => LidFilter::Nothing,
            },
        }
    }

    fn sm_info(&self, trusted: bool) -> SmInfoRecord {
        SmInfoRecord {
            lid: self.local.sm_lid,
            guid: self.local.port_guid,
            sm_key: if trusted { self.cfg.sm_key } else { 0 },
            act_count: 0x100,
            pri_state: (SM_PRIORITY << 4) | sm_state::MASTER,
        }
    }

    fn sm_infos(
        &self,
        method: Method,
        filter: SmInfoFilter,
        trusted: bool,
    ) -> Result<Vec<SaRecord>> {
        if method == Method::Set || method == Method::Delete {
            return Err(MadStatus::REQ_INVALID);
        }

        let sm = self.sm_info(trusted);
        let keep = match filter {
            SmInfoFilter::All => true,
            SmInfoFilter::Lid(lid) => self.fabric.resolve(lid) == Some(sm.lid),
            SmInfoFilter::Guid(guid) => guid == sm.guid,
            SmInfoFilter::Priority(p) => p == sm.priority(),
            SmInfoFilter::State(s) => s == sm.state(),
        };
        Ok(if keep { vec![sm.into()] } else { vec![] })
    }

    fn path_between(&self, sguid: u64, dguid: u64) -> Result<PathRecord> {
        let src = self.fabric.node_by_port_guid(sguid);
        let dst = self.fabric.node_by_port_guid(dguid);
        match (src, dst) {
            (Some(s), Some(d)) => Ok(self.fabric.path(s, d)),
            _ => Err(MadStatus::INVALID_GID),
        }
    }

    fn paths(&self, filter: &PathFilter) -> Result<Vec<SaRecord>> {
        match *filter {
            // A port with an LMC is reachable over every pair of its
            // LIDs; every one of those paths is reported at its base.
            PathFilter::All => {
                let reps = 1usize << (2 * u32::from(self.fabric.lmc()));
                Ok(self
                    .fabric
                    .paths()
                    .into_iter()
                    .flat_map(|p| std::iter::repeat_n(p, reps))
                    .map(SaRecord::from)
                    .collect())
            }

            PathFilter::Lids { slid, dlid } => {
                let src = self
                    .fabric
                    .resolve(slid)
                    .and_then(|l| self.fabric.node_at(l));
                let dst = self
                    .fabric
                    .resolve(dlid)
                    .and_then(|l| self.fabric.node_at(l));
                match (src, dst) {
                    (Some(s), Some(d)) => {
                        Ok(vec![self.fabric.path(s, d).into()])
                    }
                    _ => Err(MadStatus::NO_RECORDS),
                }
            }

            PathFilter::Guids { sguid, dguid } => {
                Ok(vec![self.path_between(sguid, dguid)?.into()])
            }

            PathFilter::Gids { sgid, dgid } => {
                if sgid.is_multicast() || dgid.is_multicast() {
                    return Err(MadStatus::REQ_INVALID);
                }
                if !self.fabric.knows_gid(&sgid)
                    || !self.fabric.knows_gid(&dgid)
                {
                    return Err(MadStatus::INVALID_GID);
                }
                let (sguid, dguid) = (sgid.interface_id(), dgid.interface_id());
                Ok(vec![self.path_between(sguid, dguid)?.into()])
            }
        }
    }

    fn answer(&mut self, q: &Query, trusted: bool) -> Result<Vec<SaRecord>> {
        if !self.bulk && is_bulk(q) {
            return Err(MadStatus::UNSUP_METHOD_ATTR);
        }

        let fabric = &self.fabric;
        let recs = match q {
            Query::ClassPortInfo => vec![
                ClassPortInfo {
                    base_ver: 1,
                    class_ver: 2,
                    cap_mask: SA_CAP_MASK,
                    cap_mask2_resp_time: SA_RESP_TIME,
                }
                .into(),
            ],

            Query::Nodes(filter) => {
                let nodes = fabric.nodes().iter().filter(|n| match *filter {
                    NodeFilter::All => true,
                    NodeFilter::Lid(lid) => fabric.resolve(lid) == Some(n.lid),
                    NodeFilter::NodeGuid(guid) => n.info.node_guid == guid,
                });
                records(nodes.cloned())
            }

            Query::Ports { lid, port_num } => {
                let lids = self.lid_filter(*lid);
                let ports = fabric.ports().iter().filter(|p| {
                    lids.admits(p.lid) && admits(*port_num, p.port_num)
                });
                records(ports.copied())
            }

            Query::Paths(filter) => self.paths(filter)?,

            Query::Links { from_lid, to_lid } => {
                let from = self.lid_filter(*from_lid);
                let to = self.lid_filter(*to_lid);
                let links = fabric
                    .links()
                    .iter()
                    .filter(|l| from.admits(l.from_lid) && to.admits(l.to_lid));
                records(links.copied())
            }

            Query::GuidInfo { lid } => {
                let lids = self.lid_filter(*lid);
                let infos = fabric
                    .nodes()
                    .iter()
                    .filter(|n| lids.admits(n.lid))
                    .filter_map(|n| fabric.guid_info(n.lid));
                records(infos)
            }

            Query::PKeyTable { lid } => {
                if !trusted {
                    return Err(MadStatus::REQ_INVALID);
                }
                let lids = self.lid_filter(*lid);
                let tables = fabric
                    .nodes()
                    .iter()
                    .filter(|n| lids.admits(n.lid))
                    .flat_map(|n| fabric.pkey_tables(n.lid));
                records(tables)
            }

            Query::SwitchInfo { lid } => {
                let lids = self.lid_filter(*lid);
                let sws = fabric.switches().filter(|s| lids.admits(s.lid));
                records(sws.map(|s| fabric.switch_info(s)))
            }

            Query::Lft { lid } => {
                let lids = self.lid_filter(*lid);
                let sws = fabric.switches().filter(|s| lids.admits(s.lid));
                records(sws.flat_map(|s| fabric.lft(s)))
            }

            Query::Mft { lid } => {
                let lids = self.lid_filter(*lid);
                let sws = fabric.switches().filter(|s| lids.admits(s.lid));
                records(sws.map(|s| fabric.mft(s)))
            }

            Query::SlVl { lid, in_port, out_port } => {
                let lids = self.lid_filter(*lid);
                let tables = fabric
                    .nodes()
                    .iter()
                    .filter(|n| lids.admits(n.lid))
                    .flat_map(|n| fabric.sl2vl(n.lid))
                    .filter(|t| {
                        admits(*in_port, t.in_port)
                            && admits(*out_port, t.out_port)
                    });
                records(tables)
            }

            Query::VlArb { lid, port_num, block } => {
                let blocks = match block {
                    Some(b) if (vlarb_block::LOW_0_31
                        ..=vlarb_block::HIGH_32_63)
                        .contains(b) =>
                    {
                        *b..=*b
                    }
                    Some(_) => return Err(MadStatus::REQ_INVALID),
                    None => vlarb_block::LOW_0_31..=vlarb_block::HIGH_32_63,
                };
                let lids = self.lid_filter(*lid);
                let mut out = vec![];
                for p in fabric.ports().iter().filter(|p| {
                    lids.admits(p.lid) && admits(*port_num, p.port_num)
                }) {
                    for b in blocks.clone() {
                        out.push(fabric.vlarb(p, b).into());
                    }
                }
                out
            }

            Query::SmInfo { method, filter } => {
                self.sm_infos(*method, *filter, trusted)?
            }

            Query::InformInfo { method, info } => match method {
                Method::Set => vec![self.informs.set(info)?.into()],
                Method::Get => return Err(MadStatus::NO_RECORDS),
                _ => return Err(MadStatus::REQ_INVALID),
            },

            Query::InformInfoRecords {
                method,
                subscriber_gid,
                subscriber_enum,
            } => match method {
                Method::Get | Method::GetTable => records(
                    self.informs.records(*subscriber_gid, *subscriber_enum),
                ),
                _ => return Err(MadStatus::REQ_INVALID),
            },

            Query::McMember { method, comp_mask, rec } => {
                let requester = self.local.gid();
                match method {
                    Method::Set => vec![
                        self.groups.set(requester, *comp_mask, rec)?.into(),
                    ],
                    Method::Delete => vec![
                        self.groups.delete(requester, *comp_mask, rec)?.into(),
                    ],
                    Method::Get | Method::GetTable => {
                        records(self.groups.query(*comp_mask, rec, trusted))
                    }
                }
            }

            Query::Service { method, comp_mask, rec } => {
                let now = Instant::now();
                self.services.expire(now);
                match method {
                    Method::Set => {
                        let rsp = self.services.register(*comp_mask, rec, now)?;
                        vec![rsp.into()]
                    }
                    Method::Delete => {
                        records(self.services.delete(*comp_mask, rec)?)
                    }
                    Method::Get | Method::GetTable => {
                        records(self.services.query(*comp_mask, rec))
                    }
                }
            }
        };

        let recs = self.faults.apply(recs);
        if q.method() == Method::Get {
            match recs.len() {
                0 => return Err(MadStatus::NO_RECORDS),
                1 => (),
                _ => return Err(MadStatus::TOO_MANY_RECORDS),
            }
        }
        Ok(recs)
    }
}

impl SaClient for SimSa {
    fn query(
        &mut self,
        query: &Query,
        opts: &QueryOpts,
    ) -> std::result::Result<Vec<SaRecord>, QueryError> {
        // A request with the wrong key is dropped without an answer.
        if opts.sm_key != 0 && opts.sm_key != self.cfg.sm_key {
            debug!(self.log, "dropping request with wrong sm_key";
                "req" => %query
            );
            return Err(QueryError::Timeout);
        }

        let trusted = opts.sm_key == self.cfg.sm_key;
        trace!(self.log, "sa request"; "req" => %query, "trusted" => trusted);
        match self.answer(query, trusted) {
            Ok(recs) => {
                trace!(self.log, "sa response"; "records" => recs.len());
                Ok(recs)
            }
            Err(status) => {
                trace!(self.log, "sa response"; "status" => %status);
                Err(QueryError::Remote(status))
            }
        }
    }

    fn wait_report(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<Option<Notice>, QueryError> {
        Ok(self.informs.next_report(self.local.gid()))
    }

    fn local_port(&self) -> LocalPort {
        self.local
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fabric::FabricBuilder;
    use osmtest::api::FromSaRecord;
    use osmtest::api::InformInfo;
    use osmtest::api::NodeRecord;
    use osmtest::api::PortRecord;
    use osmtest::api::trap;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn sa(lmc: u8) -> SimSa {
        let fabric = FabricBuilder::new()
            .lmc(lmc)
            .ca("hca-a")
            .ca("hca-b")
            .switch("sw", 4)
            .link(0, 1, 2, 1)
            .link(1, 1, 2, 2)
            .build()
            .unwrap();
        SimSa::new(fabric, SimConfig::default(), log()).unwrap()
    }

    fn typed<R: FromSaRecord>(recs: Vec<SaRecord>) -> Vec<R> {
        recs.into_iter().filter_map(R::from_sa_record).collect()
    }

    #[test]
    fn wrong_key_times_out() {
        let mut sa = sa(0);
        let q = Query::ClassPortInfo;
        let opts = QueryOpts::default().with_sm_key(9999);
        assert_eq!(sa.query(&q, &opts), Err(QueryError::Timeout));
        assert!(sa.query(&q, &QueryOpts::default()).is_ok());
        assert!(sa.query(&q, &QueryOpts::default().trusted()).is_ok());
    }

    #[test]
    fn aliases_resolve_to_base() {
        let mut sa = sa(1);
        let local = sa.local_port();
        let opts = QueryOpts::default();

        let q = Query::Nodes(NodeFilter::Lid(local.lid + 1));
        let nodes: Vec<NodeRecord> = typed(sa.query(&q, &opts).unwrap());
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].lid, local.lid);

        let q = Query::Ports { lid: Some(local.lid), port_num: Some(0) };
        let ports: Vec<PortRecord> = typed(sa.query(&q, &opts).unwrap());
        assert!(ports.is_empty());
    }

    #[test]
    fn bulk_paths_repeat_per_lid_pair() {
        let mut sa = sa(1);
        let q = Query::Paths(PathFilter::All);
        let recs = sa.query(&q, &QueryOpts::default()).unwrap();
        assert_eq!(recs.len(), 9 * 4);
    }

    #[test]
    fn path_probes_fail() {
        let mut sa = sa(0);
        let sgid = sa.local_port().gid();
        let opts = QueryOpts::default();

        let cases = [
            (Gid::IPOIB_BROADCAST, MadStatus::REQ_INVALID),
            (sgid.with_byte(7, 0xFF), MadStatus::INVALID_GID),
            (sgid.with_byte(1, 0xC0), MadStatus::INVALID_GID),
        ];
        for (dgid, status) in cases {
            let q = Query::Paths(PathFilter::Gids { sgid, dgid });
            let err = sa.query(&q, &opts).unwrap_err();
            assert!(err.is_status(status), "{dgid}: {err}");
        }

        let q = Query::Paths(PathFilter::Lids { slid: 0xFFFF, dlid: 0xFFFF });
        assert!(sa.query(&q, &opts).unwrap_err().is_no_records());
    }

    #[test]
    fn pkey_table_needs_trust() {
        let mut sa = sa(0);
        let q = Query::PKeyTable { lid: Some(sa.local_port().lid) };
        let err = sa.query(&q, &QueryOpts::default()).unwrap_err();
        assert!(err.is_status(MadStatus::REQ_INVALID));
        let recs = sa.query(&q, &QueryOpts::default().trusted()).unwrap();
        assert_eq!(recs.len(), 1);
    }

    #[test]
    fn no_bulk_without_support() {
        let mut sa = sa(0);
        sa.disable_bulk();
        let q = Query::Nodes(NodeFilter::All);
        let err = sa.query(&q, &QueryOpts::default()).unwrap_err();
        assert!(err.is_unsupported());

        let q = Query::Links { from_lid: None, to_lid: None };
        assert_eq!(sa.query(&q, &QueryOpts::default()).unwrap().len(), 4);
    }

    #[test]
    fn sm_info_filters() {
        let mut sa = sa(0);
        let opts = QueryOpts::default();
        let q = |filter| Query::SmInfo { method: Method::GetTable, filter };

        let hits = |sa: &mut SimSa, f| sa.query(&q(f), &opts).unwrap().len();
        assert_eq!(hits(&mut sa, SmInfoFilter::All), 1);
        assert_eq!(hits(&mut sa, SmInfoFilter::State(sm_state::MASTER)), 1);
        assert_eq!(hits(&mut sa, SmInfoFilter::Priority(SM_PRIORITY + 1)), 0);

        let set =
            Query::SmInfo { method: Method::Set, filter: SmInfoFilter::All };
        assert!(sa.query(&set, &opts).is_err());
    }

    #[test]
    fn reports_reach_subscribers() {
        let mut sa = sa(0);
        let gid = sa.local_port().gid();
        let opts = QueryOpts::default();
        let info = InformInfo {
            gid,
            trap_num: trap::GID_IN_SERVICE,
            subscribe: true,
            ..Default::default()
        };
        sa.query(&Query::InformInfo { method: Method::Set, info }, &opts)
            .unwrap();
        assert_eq!(sa.subscription_count(), 1);

        let guid = sa.fabric().nodes()[1].info.port_guid;
        sa.raise_gid_trap(trap::GID_IN_SERVICE, guid);
        let n = sa.wait_report(Duration::ZERO).unwrap().unwrap();
        assert_eq!(n.gid.interface_id(), guid);
        assert_eq!(sa.wait_report(Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn get_needs_exactly_one() {
        let mut sa = sa(0);
        let opts = QueryOpts::default();
        let q = Query::InformInfoRecords {
            method: Method::Get,
            subscriber_gid: None,
            subscriber_enum: None,
        };
        let err = sa.query(&q, &opts).unwrap_err();
        assert!(err.is_status(MadStatus::NO_RECORDS));
    }
}
