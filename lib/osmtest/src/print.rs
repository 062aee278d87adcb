// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print SA records in human-friendly manner.
//!
//! These are used for the QoS dump, for the multicast flow's leftover
//! report, and by the command line tool to summarize failures.

use crate::api::McMemberRecord;
use crate::api::SlVlRecord;
use crate::api::VlArbRecord;
use crate::api::decode_selector;
use crate::error::Failure;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a horizontal rule.
fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "")
}

/// Print SL to VL mapping tables into a given writer. One row per
/// (in port, out port) pair, one column per SL.
pub fn print_sl2vl_into(
    writer: &mut impl Write,
    recs: &[SlVlRecord],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    write!(t, "LID\tIN\tOUT")?;
    for sl in 0..16 {
        write!(t, "\tSL{sl}")?;
    }
    writeln!(t)?;
    write_hr(&mut t)?;

    for rec in recs {
        write!(t, "0x{:04X}\t{}\t{}", rec.lid, rec.in_port, rec.out_port)?;
        for vl in rec.vls {
            write!(t, "\t{vl}")?;
        }
        writeln!(t)?;
    }
    t.flush()
}

/// Print VL arbitration table blocks into a given writer. Entries
/// with zero weight are unused and left out.
pub fn print_vlarb_into(
    writer: &mut impl Write,
    recs: &[VlArbRecord],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    for rec in recs {
        writeln!(
            t,
            "VLArb LID 0x{:04X} port {} block {}",
            rec.lid, rec.port_num, rec.block_num
        )?;
        write_hr(&mut t)?;
        writeln!(t, "ENTRY\tVL\tWEIGHT")?;
        for (i, e) in rec.entries.iter().enumerate() {
            if e.weight == 0 {
                continue;
            }
            writeln!(t, "{i}\t{}\t{}", e.vl, e.weight)?;
        }
        writeln!(t)?;
    }
    t.flush()
}

/// Print multicast groups into a given writer.
pub fn print_groups_into(
    writer: &mut impl Write,
    groups: &[McMemberRecord],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "MGID\tMLID\tPKEY\tQKEY\tMTU\tRATE\tSCOPE_STATE")?;

    for g in groups {
        let (_, mtu) = decode_selector(g.mtu);
        let (_, rate) = decode_selector(g.rate);
        writeln!(
            t,
            "{}\t0x{:04X}\t0x{:04X}\t0x{:08X}\t{}\t{}\t0x{:02X}",
            g.mgid, g.mlid, g.pkey, g.qkey, mtu, rate, g.scope_state,
        )?;
    }
    t.flush()
}

/// Print validation failures.
pub fn print_failures(failures: &[Failure]) -> std::io::Result<()> {
    print_failures_into(&mut std::io::stdout(), failures)
}

/// Print validation failures into a given writer.
pub fn print_failures_into(
    writer: &mut impl Write,
    failures: &[Failure],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "RECORD\tFAILURE")?;
    write_hr(&mut t)?;

    for f in failures {
        let what = match f {
            Failure::UnexpectedRecord { .. } => "unexpected".to_string(),
            Failure::DuplicateRecord { count, .. } => {
                format!("returned {count} times")
            }
            Failure::MissingRecord { .. } => "missing".to_string(),
            Failure::FieldMismatch { mismatch, .. } => mismatch.to_string(),
        };
        writeln!(t, "{}\t{what}", f.key())?;
    }
    t.flush()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Gid;
    use crate::api::VlArbEntry;
    use crate::store::Key;

    #[test]
    fn vlarb_skips_unused_entries() {
        let mut rec = VlArbRecord {
            lid: 1,
            port_num: 1,
            block_num: 1,
            ..Default::default()
        };
        rec.entries[0] = VlArbEntry { vl: 0, weight: 64 };
        rec.entries[3] = VlArbEntry { vl: 1, weight: 32 };

        let mut out = vec![];
        print_vlarb_into(&mut out, &[rec]).unwrap();
        let out = String::from_utf8(out).unwrap();
        let rows: Vec<&str> = out
            .lines()
            .filter(|l| l.starts_with(|c: char| c.is_ascii_digit()))
            .collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].starts_with('3'));
    }

    #[test]
    fn groups_table() {
        let g = McMemberRecord {
            mgid: Gid::IPOIB_BROADCAST,
            mlid: 0xC000,
            pkey: 0xFFFF,
            scope_state: 0x21,
            ..Default::default()
        };

        let mut out = vec![];
        print_groups_into(&mut out, &[g]).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("MGID"));
        assert!(out.contains("0xC000"));
        assert!(out.contains("0x21"));
    }

    #[test]
    fn failures_table() {
        let failures = vec![
            Failure::MissingRecord { key: Key::Node(3) },
            Failure::DuplicateRecord { key: Key::Node(4), count: 2 },
        ];

        let mut out = vec![];
        print_failures_into(&mut out, &failures).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("missing"));
        assert!(out.contains("returned 2 times"));
    }
}
