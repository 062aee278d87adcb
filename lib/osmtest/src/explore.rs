// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Building the expected subnet, from an inventory or by walking the
//! SA.

use crate::api::LinkRecord;
use crate::api::NodeRecord;
use crate::api::PathRecord;
use crate::api::PortRecord;
use crate::compare::node_identity_mask;
use crate::compare::path_identity_mask;
use crate::compare::port_identity_mask;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::inventory;
use crate::query::NodeFilter;
use crate::query::PathFilter;
use crate::query::Query;
use crate::store::Expected;
use crate::store::Key;
use crate::store::Record;
use itertools::Itertools;
use slog::debug;
use slog::info;
use slog::warn;

/// Populate the expected subnet: from the inventory file when one was
/// given, otherwise by live discovery.
pub fn create_db(ctx: &mut ValidationContext<'_>) -> Result<()> {
    ctx.subnet.clear();

    match ctx.opts.inventory.clone() {
        Some(path) => {
            ctx.subnet = inventory::read_file(&path, &ctx.log)?;
            get_local_lmc(ctx)?;
            info!(ctx.log, "read inventory";
                "path" => %path.display(),
                "nodes" => ctx.subnet.num_nodes(),
                "ports" => ctx.subnet.num_ports(),
                "paths" => ctx.subnet.num_paths(),
                "links" => ctx.subnet.num_links()
            );
            Ok(())
        }

        None => explore(ctx),
    }
}

/// Discover the subnet through the SA.
pub fn explore(ctx: &mut ValidationContext<'_>) -> Result<()> {
    get_local_lmc(ctx)?;
    explore_nodes(ctx)?;
    explore_ports(ctx)?;

    if ctx.lmc != 0 {
        info!(ctx.log, "skipping path discovery"; "lmc" => ctx.lmc);
    } else if ctx.opts.ignore_path_records {
        info!(ctx.log, "skipping path discovery by request");
    } else {
        explore_paths(ctx)?;
    }

    explore_links(ctx)?;

    info!(ctx.log, "explored subnet";
        "nodes" => ctx.subnet.num_nodes(),
        "ports" => ctx.subnet.num_ports(),
        "paths" => ctx.subnet.num_paths(),
        "links" => ctx.subnet.num_links()
    );
    Ok(())
}

/// Read the LMC of the local port.
pub fn get_local_lmc(ctx: &mut ValidationContext<'_>) -> Result<u8> {
    let q = Query::Ports {
        lid: Some(ctx.local.lid),
        port_num: Some(ctx.local.port_num),
    };
    let ports: Vec<PortRecord> = ctx.query_as("local port lmc", &q)?;
    let port = match ports.as_slice() {
        [one] => one,
        _ => {
            return Err(Error::violation(
                "local port lmc",
                format!("expected one port record, got {}", ports.len()),
            ));
        }
    };

    ctx.lmc = port.info.lmc();
    debug!(ctx.log, "local port"; "lid" => ctx.local.lid, "lmc" => ctx.lmc);
    Ok(ctx.lmc)
}

/// One NodeRecord query per LID. LMC aliases of a node already found
/// come back under the same base LID and are skipped.
fn explore_nodes(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let mask = node_identity_mask();

    for lid in 1..=ctx.opts.max_lid {
        let q = Query::Nodes(NodeFilter::Lid(lid));
        let nodes: Vec<NodeRecord> =
            ctx.query_opt("explore node by lid", &q)?;

        for node in nodes {
            if ctx.subnet.find(&Key::Node(node.lid)).is_some() {
                continue;
            }
            debug!(ctx.log, "found node";
                "lid" => node.lid,
                "guid" => format!("0x{:016X}", node.info.node_guid),
                "desc" => &node.desc
            );
            let rec = Expected::new(node, mask.clone());
            ctx.subnet.insert(Record::Node(rec))?;
        }
    }

    Ok(())
}

/// Port 0 is the switch management port; CAs answer `NO_RECORDS` for
/// it.
fn explore_ports(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let mask = port_identity_mask();
    let nodes: Vec<(u16, u8)> = ctx
        .subnet
        .nodes()
        .map(|n| (n.expected.lid, n.expected.info.num_ports))
        .collect();

    for (lid, num_ports) in nodes {
        for port_num in 0..=num_ports {
            let q = Query::Ports { lid: Some(lid), port_num: Some(port_num) };
            let ports: Vec<PortRecord> =
                ctx.query_opt("explore port by lid", &q)?;

            for port in ports {
                let key = Key::Port { lid: port.lid, port_num: port.port_num };
                if ctx.subnet.find(&key).is_some() {
                    continue;
                }
                ctx.subnet.insert(Record::Port(Expected::new(port, mask)))?;
            }
        }
    }

    Ok(())
}

/// Every ordered pair of nodes, including a node with itself. A failed
/// pair does not stop the walk; the first failure is returned once
/// every pair has been tried.
fn explore_paths(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let mask = path_identity_mask();
    let lids: Vec<u16> =
        ctx.subnet.nodes().map(|n| n.expected.lid).collect();
    let mut first_err = None;

    let pairs = lids.iter().copied().cartesian_product(lids.clone());
    for (slid, dlid) in pairs {
        let q = Query::Paths(PathFilter::Lids { slid, dlid });
        let res = ctx.query_as::<PathRecord>("explore path by lids", &q);
        let paths = match res {
            Ok(paths) => paths,
            Err(e) => {
                warn!(ctx.log, "path query failed";
                    "slid" => slid,
                    "dlid" => dlid,
                    "err" => %e
                );
                first_err.get_or_insert(e);
                continue;
            }
        };

        for path in paths {
            let key = Key::Path { slid: path.slid, dlid: path.dlid };
            if ctx.subnet.find(&key).is_some() {
                continue;
            }
            ctx.subnet.insert(Record::Path(Expected::new(path, mask)))?;
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn explore_links(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let q = Query::Links { from_lid: None, to_lid: None };
    let links: Vec<LinkRecord> = ctx.query_opt("explore links", &q)?;

    for link in links {
        let key = Key::Link {
            from_lid: link.from_lid,
            from_port_num: link.from_port_num,
        };
        if ctx.subnet.find(&key).is_some() {
            continue;
        }
        let rec = Expected::new(link, LinkRecord::default());
        ctx.subnet.insert(Record::Link(rec))?;
    }

    Ok(())
}
