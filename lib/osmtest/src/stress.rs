// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Load generation. Each level hammers the SA with one kind of query
//! until its limit, and fails on the first answer that is wrong.

use crate::api::NodeRecord;
use crate::api::PathRecord;
use crate::api::PortRecord;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::explore;
use crate::query::NodeFilter;
use crate::query::PathFilter;
use crate::query::Query;
use itertools::Itertools;
use slog::Logger;
use slog::info;
use slog::o;
use std::time::Instant;

/// How often progress is logged, in queries.
const REPORT_EVERY: u64 = 1000;

/// Tracks and reports throughput.
struct Meter {
    log: Logger,
    start: Instant,
    queries: u64,
    records: u64,
}

impl Meter {
    fn new(log: Logger) -> Self {
        Self { log, start: Instant::now(), queries: 0, records: 0 }
    }

    fn tick(&mut self, records: usize) {
        self.queries += 1;
        self.records += records as u64;
        if self.queries % REPORT_EVERY == 0 {
            self.report("progress");
        }
    }

    fn report(&self, msg: &str) {
        let secs = self.start.elapsed().as_secs_f64().max(f64::EPSILON);
        info!(self.log, "{}", msg;
            "queries" => self.queries,
            "records" => self.records,
            "queries_per_sec" => format!("{:.1}", self.queries as f64 / secs)
        );
    }
}

/// Level 1: one small query, over and over.
fn small(ctx: &mut ValidationContext<'_>, m: &mut Meter) -> Result<()> {
    let step = "stress local port";
    let q = Query::Ports {
        lid: Some(ctx.local.lid),
        port_num: Some(ctx.local.port_num),
    };

    for _ in 0..ctx.opts.stress_limits.small {
        let recs: Vec<PortRecord> = ctx.query_as(step, &q)?;
        if recs.len() != 1 {
            return Err(Error::violation(
                step,
                format!("expected one port record, got {}", recs.len()),
            ));
        }
        m.tick(recs.len());
    }
    Ok(())
}

/// Level 2: whole tables, nodes and ports in turn. Every answer must
/// be as large as the first one.
fn large(ctx: &mut ValidationContext<'_>, m: &mut Meter) -> Result<()> {
    let nodes_q = Query::Nodes(NodeFilter::All);
    let ports_q = Query::Ports { lid: None, port_num: None };
    let mut sizes: [Option<usize>; 2] = [None, None];

    for i in 0..ctx.opts.stress_limits.large {
        let idx = (i % 2) as usize;
        let (step, n) = if idx == 0 {
            let recs: Vec<NodeRecord> =
                ctx.query_as("stress all nodes", &nodes_q)?;
            ("stress all nodes", recs.len())
        } else {
            let recs: Vec<PortRecord> =
                ctx.query_as("stress all ports", &ports_q)?;
            ("stress all ports", recs.len())
        };

        match sizes[idx] {
            Some(first) if first != n => {
                return Err(Error::violation(
                    step,
                    format!("{n} records, the first answer had {first}"),
                ));
            }
            Some(_) => (),
            None => sizes[idx] = Some(n),
        }
        m.tick(n);
    }
    Ok(())
}

/// Level 3: a path between every pair of known ports, by GUID, round
/// robin.
fn paths(ctx: &mut ValidationContext<'_>, m: &mut Meter) -> Result<()> {
    explore::create_db(ctx)?;

    let step = "stress path by guids";
    let guids: Vec<u64> = ctx
        .subnet
        .nodes()
        .map(|n| n.expected.info.port_guid)
        .filter(|g| *g != 0)
        .collect();
    let pairs: Vec<(u64, u64)> =
        guids.iter().copied().cartesian_product(guids.clone()).collect();
    if pairs.is_empty() {
        return Err(Error::violation(step, "no ports to find paths between"));
    }

    let limit = ctx.opts.stress_limits.path;
    for (sguid, dguid) in pairs.iter().copied().cycle().take(limit as usize) {
        let q = Query::Paths(PathFilter::Guids { sguid, dguid });
        let recs: Vec<PathRecord> = ctx.query_as(step, &q)?;
        if recs.is_empty() {
            return Err(Error::violation(
                step,
                format!("no path 0x{sguid:016X} to 0x{dguid:016X}"),
            ));
        }
        m.tick(recs.len());
    }
    Ok(())
}

/// Run the stress level chosen in the options.
pub fn run(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let level = ctx.opts.stress;
    let log = ctx.log.new(o!("flow" => "stress", "level" => level));
    let mut m = Meter::new(log);

    match level {
        1 => small(ctx, &mut m)?,
        2 => large(ctx, &mut m)?,
        3 => paths(ctx, &mut m)?,
        _ => {
            return Err(Error::violation(
                "stress",
                format!("unknown stress level {level}"),
            ));
        }
    }

    m.report("stress flow passed");
    Ok(())
}
