// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The multicast flow: a long run of joins and leaves, each of which
//! must succeed or fail in one exact way.

use super::GOOD_MGID;
use super::GroupCount;
use super::IPOIB_UNJOINED;
use super::MLID_MAX;
use super::Tracker;
use super::expect_allocated;
use super::expect_state;
use super::join;
use super::join_fails;
use super::leave;
use super::leave_fails;
use super::query_groups;
use super::refuse_ipoib;
use super::request;
use super::try_send;
use crate::api::Gid;
use crate::api::JoinFlags;
use crate::api::MCAST_LID_BASE;
use crate::api::MadStatus;
use crate::api::McCompMask as Comp;
use crate::api::McMemberRecord;
use crate::api::Method;
use crate::api::NodeRecord;
use crate::api::NodeType;
use crate::api::Selector;
use crate::api::encode_selector;
use crate::api::join_flags;
use crate::api::mtu;
use crate::api::rate;
use crate::context::Expect;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::print::print_groups_into;
use crate::query::NodeFilter;
use crate::query::Query;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use slog::warn;

const REQ_INVALID: Expect = Expect::Status(MadStatus::REQ_INVALID);
const INSUF_COMPS: Expect = Expect::Status(MadStatus::INSUF_COMPS);

/// A zero MGID: asks the SA to allocate one.
const NEW: Gid = Gid::ZERO;

fn sel(s: Selector, v: u8) -> u8 {
    encode_selector(s, v)
}

/// Per-run state.
struct Run<'c, 'a> {
    ctx: &'c mut ValidationContext<'a>,
    log: Logger,
    created: Tracker,
    start: GroupCount,
    /// The MTU and rate the fabric supports, as the SA reports them.
    phys: Option<(u8, u8)>,
}

/// Run the multicast flow. Every group it creates is left again
/// before it returns successfully.
pub fn run(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let log = ctx.log.new(o!("flow" => "multicast"));
    let start = query_groups(ctx)?;
    info!(log, "groups before the flow";
        "total" => start.total,
        "ipoib" => start.ipoib
    );

    let mut run =
        Run { ctx, log, created: Tracker::new(), start, phys: None };

    run.ipoib_rejoin()?;
    run.get_probes()?;
    run.insufficient_components()?;
    run.unrealistic_selectors()?;
    run.creates_rejected()?;
    run.allocated_creates()?;
    run.given_mgid_creates()?;
    run.join_state_at_creation()?;
    run.join_state_algebra()?;
    run.selectors_on_existing()?;
    run.leave_to_nothing()?;
    run.full_create_delete()?;
    run.mtu_on_created()?;
    run.proxy()?;
    if run.ctx.opts.mmode > 2 {
        run.exhaust_mlids()?;
    }
    run.cleanup()?;

    info!(run.log, "multicast flow passed");
    Ok(())
}

impl Run<'_, '_> {
    fn req(&self, mgid: Gid, ss: u8) -> McMemberRecord {
        request(&*self.ctx, mgid, ss)
    }

    /// Create or join, require success, and remember the group.
    fn create(
        &mut self,
        step: &str,
        comp: Comp,
        rec: McMemberRecord,
    ) -> Result<McMemberRecord> {
        refuse_ipoib(step, &rec.mgid)?;
        let rsp = join(self.ctx, step, comp, rec)?;
        if rec.mgid.is_zero() {
            expect_allocated(step, &rec, &rsp)?;
        }
        self.created.joined(&rsp);
        Ok(rsp)
    }

    fn count_unchanged(&mut self, step: &str) -> Result<()> {
        let mmode = self.ctx.opts.mmode;
        let now = query_groups(self.ctx)?;
        if (mmode == 1 || mmode == 3) && now.total != self.start.total {
            return Err(Error::violation(
                step,
                format!(
                    "{} groups, expected {}",
                    now.total, self.start.total
                ),
            ));
        }
        Ok(())
    }

    /// Join the IPoIB broadcast group, then join again asking for the
    /// MTU and rate the SA suggested.
    fn ipoib_rejoin(&mut self) -> Result<()> {
        if self.start.ipoib == 0 {
            info!(self.log, "no ipoib group, skipping rejoin");
            return Ok(());
        }

        let mut rec = self.req(Gid::IPOIB_BROADCAST, 0x21);
        let rsp = join(self.ctx, "join ipoib", Comp::MEMBER, rec)?;

        rec.mtu = rsp.mtu;
        rec.rate = rsp.rate;
        let comp = Comp::MEMBER
            | Comp::MTU_SEL
            | Comp::MTU
            | Comp::RATE_SEL
            | Comp::RATE;
        let step = "rejoin ipoib with its mtu and rate";
        let rsp = join(self.ctx, step, comp, rec)?;

        let phys = (rsp.mtu & 0x3F, rsp.rate & 0x3F);
        debug!(self.log, "ipoib group";
            "mtu" => phys.0,
            "rate" => phys.1
        );
        self.phys = Some(phys);

        let rec = self.req(Gid::IPOIB_BROADCAST, 0x20);
        let q = Query::mcmember(Method::Get, Comp::MGID | Comp::PORT_GID, rec);
        let recs: Vec<McMemberRecord> =
            self.ctx.query_as("get ipoib membership", &q)?;
        if recs.len() != 1 {
            return Err(Error::violation(
                "get ipoib membership",
                format!("expected one member record, got {}", recs.len()),
            ));
        }
        Ok(())
    }

    /// Get needs a valid MLID or a full port GID.
    fn get_probes(&mut self) -> Result<()> {
        let mut rec = self.req(NEW, 0x20);
        rec.mlid = 0;
        let q = Query::mcmember(Method::Get, Comp::MLID, rec);
        // No failure kind is required here: an SA may report no match
        // or a malformed request.
        self.ctx.expect_failure("get by invalid mlid", Expect::Any, &q)?;

        let mut rec = self.req(NEW, 0x20);
        rec.port_gid = rec.port_gid.with_interface_id(0);
        let q = Query::mcmember(Method::Get, Comp::PORT_GID, rec);
        // Likewise any failure: the GID names no port.
        self.ctx.expect_failure("get by zero port guid", Expect::Any, &q)?;
        Ok(())
    }

    fn insufficient_components(&mut self) -> Result<()> {
        let cases = [
            ("create without qkey and pkey", Comp::QKEY | Comp::PKEY, NEW),
            ("create without sl", Comp::SL, NEW),
            ("create without flow label", Comp::FLOW, NEW.with_byte(15, 1)),
            ("create without tclass", Comp::TCLASS, NEW),
            ("create without qkey and tclass", Comp::QKEY | Comp::TCLASS, NEW),
        ];

        for (step, missing, mgid) in cases {
            let rec = self.req(mgid, 0x21);
            let comp = Comp::CREATE - missing;
            join_fails(self.ctx, step, INSUF_COMPS, comp, rec)?;
        }
        Ok(())
    }

    /// Rates, MTUs and lifetimes no group on this fabric can have.
    fn unrealistic_selectors(&mut self) -> Result<()> {
        let rate_comp = Comp::CREATE | Comp::RATE_SEL | Comp::RATE;
        let rates = [
            ("create with rate above 60G", Selector::GreaterThan, rate::R60),
            ("create with rate above 120G", Selector::GreaterThan, rate::R120),
            ("create with rate below 2.5G", Selector::LessThan, rate::R2_5),
        ];
        for (step, s, r) in rates {
            let mut rec = self.req(NEW, 0x21);
            rec.rate = sel(s, r);
            join_fails(self.ctx, step, REQ_INVALID, rate_comp, rec)?;
        }

        let mtu_comp = Comp::CREATE | Comp::MTU_SEL | Comp::MTU;
        let mtus = [
            ("create with mtu above 4096", Selector::GreaterThan, mtu::M4096),
            ("create with mtu below 256", Selector::LessThan, mtu::M256),
            ("create with invalid mtu", Selector::GreaterThan, 6),
        ];
        for (step, s, m) in mtus {
            let mut rec = self.req(NEW, 0x21);
            rec.mtu = sel(s, m);
            join_fails(self.ctx, step, REQ_INVALID, mtu_comp, rec)?;
        }

        let mut rec = self.req(NEW, 0x21);
        rec.pkt_life = sel(Selector::LessThan, 0);
        let comp = Comp::CREATE | Comp::LIFE_SEL | Comp::LIFE;
        let step = "create with lifetime below 0";
        join_fails(self.ctx, step, REQ_INVALID, comp, rec)
    }

    /// Creates missing a required component leave no group behind.
    fn creates_rejected(&mut self) -> Result<()> {
        let rec = self.req(NEW, 0x21);
        join_fails(
            self.ctx,
            "create without sl",
            INSUF_COMPS,
            Comp::CREATE - Comp::SL,
            rec,
        )?;
        self.count_unchanged("groups after rejected create")?;

        join_fails(
            self.ctx,
            "create without qkey and pkey",
            INSUF_COMPS,
            Comp::CREATE - Comp::QKEY - Comp::PKEY,
            rec,
        )?;
        join_fails(
            self.ctx,
            "create without tclass",
            INSUF_COMPS,
            Comp::CREATE - Comp::TCLASS,
            rec,
        )
    }

    /// Creates with a zero MGID. The SA allocates the MGID and must
    /// follow the allocation rule.
    fn allocated_creates(&mut self) -> Result<()> {
        let rate_comp = Comp::CREATE | Comp::RATE_SEL | Comp::RATE;
        let mtu_comp = Comp::CREATE | Comp::MTU_SEL | Comp::MTU;

        let mut rec = self.req(NEW, 0x21);
        rec.rate = sel(Selector::GreaterThan, rate::R2_5);
        let rsp = self.create("create with rate above 2.5G", rate_comp, rec)?;
        if self.phys.is_none() {
            self.phys = Some((rsp.mtu & 0x3F, rsp.rate & 0x3F));
        }

        let mut rec = self.req(NEW, 0x21);
        rec.rate = sel(Selector::LessThan, rate::R60);
        self.create("create with rate below 60G", rate_comp, rec)?;

        let mut rec = self.req(NEW, 0x21);
        rec.mtu = sel(Selector::LessThan, mtu::M4096);
        self.create("create with mtu below 4096", mtu_comp, rec)?;

        let mut rec = self.req(NEW, 0x21);
        rec.mtu = sel(Selector::GreaterThan, mtu::M256);
        self.create("create with mtu above 256", mtu_comp, rec)?;

        let (mtu_phys, rate_phys) =
            self.phys.unwrap_or((mtu::M256, rate::R2_5));

        let mut rec = self.req(NEW, 0x21);
        rec.mtu = sel(Selector::Exactly, mtu_phys);
        rec.rate = sel(Selector::Exactly, rate_phys);
        let comp = mtu_comp | rate_comp;
        self.create("create with exact mtu and rate", comp, rec)?;

        let mut rec = self.req(NEW, 0x21);
        rec.rate = sel(Selector::Exactly, rate_phys);
        self.create("create with exact rate", rate_comp, rec)?;

        let mut rec = self.req(NEW, 0x21);
        rec.mtu = sel(Selector::Exactly, mtu_phys);
        self.create("create with exact mtu", mtu_comp, rec)?;

        let mut rec = self.req(NEW, 0x21);
        rec.pkt_life = sel(Selector::GreaterThan, 0);
        let comp = Comp::CREATE | Comp::LIFE_SEL | Comp::LIFE;
        self.create("create with lifetime above 0", comp, rec)?;
        Ok(())
    }

    /// Creates naming their MGID, good and bad.
    fn given_mgid_creates(&mut self) -> Result<()> {
        let rec = self.req(GOOD_MGID, 0x22);
        join_fails(
            self.ctx,
            "non member join of a new group",
            REQ_INVALID,
            Comp::CREATE,
            rec,
        )?;

        let step = "create given mgid";
        let rec = self.req(GOOD_MGID, 0x21);
        let rsp = self.create(step, Comp::CREATE, rec)?;
        if rsp.mgid != GOOD_MGID {
            return Err(Error::violation(
                step,
                format!("asked for {GOOD_MGID}, got {}", rsp.mgid),
            ));
        }

        let with_scope = Comp::CREATE | Comp::SCOPE;
        let bad = [
            ("create with bad prefix", 0, 0xFA, Comp::CREATE),
            ("create with sa signature", 3, 0x1B, with_scope),
            ("create with prefix 0xEF", 0, 0xEF, Comp::CREATE),
            ("create with bad flags", 1, 0x22, Comp::CREATE),
        ];
        for (step, idx, byte, comp) in bad {
            let rec = self.req(GOOD_MGID.with_byte(idx, byte), 0x21);
            join_fails(self.ctx, step, REQ_INVALID, comp, rec)?;
        }

        let rec = self.req(GOOD_MGID.with_byte(1, 0x1F), 0x21);
        self.create("create with reserved scope", Comp::CREATE, rec)?;

        let rec = self.req(Gid::ALL_NODES, 0x21);
        self.create("create link local all nodes", Comp::CREATE, rec)?;
        Ok(())
    }

    /// A new group needs a full member.
    fn join_state_at_creation(&mut self) -> Result<()> {
        let rec = self.req(GOOD_MGID.with_byte(12, 0xFF), 0x22);
        join_fails(
            self.ctx,
            "create as non member",
            REQ_INVALID,
            Comp::CREATE,
            rec,
        )?;

        let rec = self.req(GOOD_MGID, 0x23);
        self.create("join as full and non member", Comp::CREATE, rec)?;

        let rec = self.req(GOOD_MGID.with_byte(12, 0xFC), 0x24);
        join_fails(
            self.ctx,
            "create as send only",
            REQ_INVALID,
            Comp::CREATE,
            rec,
        )?;

        let special = GOOD_MGID.with_byte(12, 0xFB);
        let rec = self.req(special, 0x2F);
        self.create("create with every join state", Comp::CREATE, rec)?;

        let step = "non member join of full group";
        let rec = self.req(special, 0x22);
        let rsp = self.create(step, Comp::MEMBER, rec)?;
        if rsp.scope_state & 0x07 != 0x07 {
            return Err(Error::violation(
                step,
                format!("scope_state 0x{:02X} lost bits", rsp.scope_state),
            ));
        }
        Ok(())
    }

    /// Joins add bits, leaves clear exactly the bits asked for, and a
    /// leave of a bit not held fails.
    fn join_state_algebra(&mut self) -> Result<()> {
        let steps: [(&str, Method, u8, Option<u8>); 7] = [
            ("join full member", Method::Set, 0x21, None),
            ("add non member", Method::Set, 0x22, Some(0x23)),
            ("leave bits not held", Method::Delete, 0x26, None),
            ("leave non member", Method::Delete, 0x22, Some(0x21)),
            ("add send only", Method::Set, 0x24, Some(0x25)),
            ("join full member again", Method::Set, 0x21, Some(0x25)),
            ("add non member again", Method::Set, 0x22, Some(0x27)),
        ];

        for (step, method, ss, want) in steps {
            let rec = self.req(GOOD_MGID, ss);
            if method == Method::Delete && want.is_none() {
                leave_fails(self.ctx, step, REQ_INVALID, Comp::MEMBER, rec)?;
                continue;
            }

            let rsp = match method {
                Method::Delete => {
                    let rsp = leave(self.ctx, step, Comp::MEMBER, rec)?;
                    self.created.left(&GOOD_MGID, join_flags(ss));
                    rsp
                }
                _ => self.create(step, Comp::MEMBER, rec)?,
            };

            if let Some(want) = want {
                expect_state(step, &rsp, want)?;
            }
        }
        Ok(())
    }

    /// Selector components on a join of an existing group are checked
    /// against the group.
    fn selectors_on_existing(&mut self) -> Result<()> {
        let mut rec = self.req(GOOD_MGID, 0x21);
        rec.rate = sel(Selector::LessThan, rate::R2_5);
        join_fails(
            self.ctx,
            "join with rate below 2.5G",
            REQ_INVALID,
            Comp::MEMBER | Comp::RATE_SEL | Comp::RATE,
            rec,
        )?;

        if self.start.ipoib == 0 {
            return Ok(());
        }

        let mtu_comp = Comp::MEMBER | Comp::MTU_SEL | Comp::MTU;
        let mut rec = self.req(Gid::IPOIB_BROADCAST, 0x21);
        rec.mtu = sel(Selector::GreaterThan, mtu::M4096);
        join_fails(
            self.ctx,
            "join ipoib with mtu above 4096",
            REQ_INVALID,
            mtu_comp,
            rec,
        )?;

        rec.mtu = sel(Selector::LessThan, mtu::M256);
        join_fails(
            self.ctx,
            "join ipoib with mtu below 256",
            REQ_INVALID,
            mtu_comp,
            rec,
        )
    }

    /// Clearing the last bit removes the membership, and with it the
    /// group.
    fn leave_to_nothing(&mut self) -> Result<()> {
        let step = "leave non member";
        let rec = self.req(GOOD_MGID, 0x22);
        let rsp = leave(self.ctx, step, Comp::MEMBER, rec)?;
        self.created.left(&GOOD_MGID, JoinFlags::NON_MEMBER);
        expect_state(step, &rsp, 0x25)?;

        let step = "leave every remaining bit";
        let rec = self.req(GOOD_MGID, 0x25);
        let rsp = leave(self.ctx, step, Comp::MEMBER, rec)?;
        self.created.left(&GOOD_MGID, join_flags(0x25));
        expect_state(step, &rsp, 0x25)?;

        let rec = self.req(GOOD_MGID, 0x22);
        join_fails(
            self.ctx,
            "non member join of deleted group",
            REQ_INVALID,
            Comp::MEMBER,
            rec,
        )
    }

    fn full_create_delete(&mut self) -> Result<()> {
        let unjoined = self.req(IPOIB_UNJOINED, 0x21);
        leave_fails(
            self.ctx,
            "leave group never joined",
            REQ_INVALID,
            Comp::CREATE,
            unjoined,
        )?;

        let mgid = GOOD_MGID.with_byte(12, 0xAA);
        let comp = Comp::CREATE | Comp::LIFE | Comp::LIFE_SEL;
        let mut rec = self.req(mgid, 0x21);
        rec.pkt_life = sel(Selector::GreaterThan, 0);
        self.create("create for full delete", comp, rec)?;
        leave(self.ctx, "full delete", comp, rec)?;
        self.created.left(&mgid, JoinFlags::FULL_MEMBER);

        leave_fails(
            self.ctx,
            "leave group never joined",
            REQ_INVALID,
            Comp::CREATE,
            unjoined,
        )
    }

    fn mtu_on_created(&mut self) -> Result<()> {
        let mut rec = self.req(NEW, 0x21);
        rec.mtu = sel(Selector::Exactly, mtu::M1024);
        let comp = Comp::CREATE | Comp::MTU_SEL | Comp::MTU;
        let rsp = self.create("create with mtu 1024", comp, rec)?;

        let mut rec = self.req(rsp.mgid, 0x21);
        rec.mtu = sel(Selector::GreaterThan, mtu::M4096);
        join_fails(
            self.ctx,
            "join 1024 group with mtu above 4096",
            REQ_INVALID,
            Comp::MEMBER | Comp::MTU_SEL | Comp::MTU,
            rec,
        )
    }

    /// Create a group on behalf of another port. Only that port can
    /// leave it.
    fn proxy(&mut self) -> Result<()> {
        let q = Query::Nodes(NodeFilter::All);
        let nodes: Vec<NodeRecord> =
            self.ctx.query_as("find remote port", &q)?;
        let local_guid = self.ctx.local.port_guid;
        let remote = nodes.iter().find(|n| {
            n.info.node_type() == Some(NodeType::Ca)
                && n.info.port_guid != local_guid
        });
        let Some(remote) = remote else {
            info!(self.log, "no remote CA port, skipping proxy join");
            return Ok(());
        };

        let prefix = self.ctx.local.subnet_prefix;
        let remote_gid = Gid::from_parts(prefix, remote.info.port_guid);
        let mut rec = self.req(NEW, 0x21);
        rec.port_gid = remote_gid;
        rec.proxy_join = true;
        let rsp = join(self.ctx, "proxy create", Comp::CREATE, rec)?;
        expect_allocated("proxy create", &rec, &rsp)?;

        let mut rec = self.req(rsp.mgid, 0x21);
        leave_fails(
            self.ctx,
            "proxy leave as self",
            REQ_INVALID,
            Comp::MEMBER,
            rec,
        )?;

        rec.port_gid = remote_gid;
        rec.proxy_join = true;
        leave(self.ctx, "proxy leave", Comp::MEMBER, rec)?;
        Ok(())
    }

    /// Create groups until the SA runs out of MLIDs.
    fn exhaust_mlids(&mut self) -> Result<()> {
        let step = "create until out of mlids";
        let comp = Comp::CREATE | Comp::MLID;
        let mut rec = self.req(NEW, 0x21);
        rec.mlid = MLID_MAX;

        for _ in MCAST_LID_BASE..=MLID_MAX {
            let rsp = match try_send(self.ctx, Method::Set, comp, rec) {
                Ok(recs) => match recs.as_slice() {
                    [rsp] => *rsp,
                    _ => {
                        return Err(Error::violation(
                            step,
                            format!("expected one record, got {}", recs.len()),
                        ));
                    }
                },
                Err(e) if e.is_status(MadStatus::NO_RESOURCES) => {
                    info!(self.log, "mlids exhausted";
                        "groups" => self.created.len()
                    );
                    return Ok(());
                }
                Err(e) => return Err(Error::query(step, e)),
            };

            if rsp.mlid < MCAST_LID_BASE || rsp.mlid > MLID_MAX {
                return Err(Error::violation(
                    step,
                    format!("granted mlid 0x{:04X} out of range", rsp.mlid),
                ));
            }
            self.created.joined(&rsp);
        }

        Ok(())
    }

    /// Leave every group the flow created, then check that none of
    /// them is left.
    fn cleanup(&mut self) -> Result<()> {
        let groups: Vec<(Gid, JoinFlags)> =
            self.created.iter().map(|(g, c)| (*g, c.flags)).collect();
        let mut failed = 0;

        for (mgid, flags) in groups {
            let rec = self.req(mgid, 0x20 | flags.bits());
            match leave(self.ctx, "cleanup", Comp::MEMBER, rec) {
                Ok(_) => self.created.left(&mgid, flags),
                Err(e) => {
                    warn!(self.log, "cleanup failed";
                        "mgid" => %mgid,
                        "err" => %e
                    );
                    failed += 1;
                }
            }
        }

        let step = "groups after cleanup";
        self.count_unchanged(step)?;

        let left: Vec<McMemberRecord> = self
            .ctx
            .subnet
            .groups()
            .filter(|g| self.created.mlids().contains(&g.expected.mlid))
            .map(|g| g.expected)
            .collect();

        if failed != 0 || !left.is_empty() {
            let mut table = vec![];
            if print_groups_into(&mut table, &left).is_ok() {
                debug!(self.log, "groups left";
                    "table" => String::from_utf8_lossy(&table).into_owned()
                );
            }
            return Err(Error::violation(
                step,
                format!(
                    "{} leaves failed, {} created groups remain",
                    failed,
                    left.len()
                ),
            ));
        }

        Ok(())
    }
}
