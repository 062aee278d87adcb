// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Dump the SL to VL mapping and VL arbitration tables of every known
//! port.

use crate::api::SlVlRecord;
use crate::api::VlArbRecord;
use crate::api::vlarb_block;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::print::print_sl2vl_into;
use crate::print::print_vlarb_into;
use crate::query::Query;
use slog::info;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;

/// The tables read from one port.
#[derive(Clone, Debug, Default)]
pub struct PortQos {
    pub lid: u16,
    pub port_num: u8,
    pub sl2vl: Vec<SlVlRecord>,
    pub vlarb: Vec<VlArbRecord>,
}

/// Read the tables of every port in the expected subnet. Ports that
/// have no tables (a CA answering `NO_RECORDS`) come back empty.
pub fn collect(ctx: &mut ValidationContext<'_>) -> Result<Vec<PortQos>> {
    let ports: BTreeSet<(u16, u8)> = ctx
        .subnet
        .ports()
        .map(|p| (p.expected.lid, p.expected.port_num))
        .collect();
    let mut out = Vec::with_capacity(ports.len());

    for (lid, port_num) in ports {
        let q =
            Query::SlVl { lid: Some(lid), in_port: None, out_port: None };
        let mut sl2vl: Vec<SlVlRecord> =
            ctx.query_opt("sl2vl table", &q)?;
        // A switch answers for every port pair; keep the ones leaving
        // this port.
        sl2vl.retain(|r| r.out_port == port_num);

        let mut vlarb = vec![];
        for block in vlarb_block::LOW_0_31..=vlarb_block::HIGH_32_63 {
            let q = Query::VlArb {
                lid: Some(lid),
                port_num: Some(port_num),
                block: Some(block),
            };
            let recs: Vec<VlArbRecord> =
                ctx.query_opt("vlarb table", &q)?;
            vlarb.extend(recs);
        }

        out.push(PortQos { lid, port_num, sl2vl, vlarb });
    }

    Ok(out)
}

/// Write the dump of `ports` into `w`: one block per port, a header
/// line and the tables.
pub fn write_dump(
    w: &mut impl Write,
    ports: &[PortQos],
) -> std::io::Result<()> {
    for p in ports {
        writeln!(w, "# port lid 0x{:04X} num {}", p.lid, p.port_num)?;
        print_sl2vl_into(w, &p.sl2vl)?;
        writeln!(w)?;
        print_vlarb_into(w, &p.vlarb)?;
    }
    Ok(())
}

/// Run the QoS flow.
pub fn run(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let ports = collect(ctx)?;
    let io_err = |source: std::io::Error| Error::Io {
        what: "qos dump".into(),
        source,
    };

    match ctx.opts.qos_dump.clone() {
        Some(path) => {
            let mut f = File::create(&path).map_err(io_err)?;
            write_dump(&mut f, &ports).map_err(io_err)?;
            info!(ctx.log, "wrote qos dump";
                "path" => %path.display(),
                "ports" => ports.len()
            );
        }
        None => {
            let mut buf = vec![];
            write_dump(&mut buf, &ports).map_err(io_err)?;
            info!(ctx.log, "qos tables";
                "ports" => ports.len(),
                "dump" => String::from_utf8_lossy(&buf).into_owned()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dump_has_one_block_per_port() {
        let ports = vec![
            PortQos { lid: 1, port_num: 1, ..Default::default() },
            PortQos {
                lid: 2,
                port_num: 3,
                sl2vl: vec![SlVlRecord {
                    lid: 2,
                    in_port: 1,
                    out_port: 3,
                    vls: [0; 16],
                }],
                vlarb: vec![],
            },
        ];

        let mut out = vec![];
        write_dump(&mut out, &ports).unwrap();
        let out = String::from_utf8(out).unwrap();
        let headers: Vec<&str> =
            out.lines().filter(|l| l.starts_with("# port")).collect();
        assert_eq!(
            headers,
            ["# port lid 0x0001 num 1", "# port lid 0x0002 num 3"]
        );
        assert!(out.contains("0x0002"));
    }
}
