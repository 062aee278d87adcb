// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use super::InventoryError;
use crate::api::Gid;
use crate::api::LinkRecord;
use crate::api::NodeRecord;
use crate::api::PathRecord;
use crate::api::PortRecord;
use crate::api::PortState;
use crate::store::Expected;
use crate::store::ExpectedSubnet;
use crate::store::Record;
use slog::Logger;
use slog::warn;
use std::str::FromStr;

type Result<T> = core::result::Result<T, InventoryError>;

/// One significant line of the file.
struct Line<'a> {
    num: usize,
    keyword: String,
    values: Vec<&'a str>,
}

impl Line<'_> {
    fn bad(&self) -> InventoryError {
        InventoryError::BadValue {
            line: self.num,
            keyword: self.keyword.clone(),
            value: self.values.join(" "),
        }
    }

    fn raw(&self, idx: usize) -> Result<u64> {
        let v = self.values.get(idx).ok_or_else(|| self.bad())?;
        parse_num(v).ok_or_else(|| self.bad())
    }

    fn num<T: TryFrom<u64>>(&self) -> Result<T> {
        T::try_from(self.raw(0)?).map_err(|_| self.bad())
    }

    /// A GID written as two 64-bit halves.
    fn gid(&self) -> Result<Gid> {
        Ok(Gid::from_parts(self.raw(0)?, self.raw(1)?))
    }

    fn port_state(&self) -> Result<u8> {
        let v = self.values.first().ok_or_else(|| self.bad())?;
        match parse_num(v) {
            Some(n) => u8::try_from(n).map_err(|_| self.bad()),
            None => PortState::from_str(v)
                .map(|s| s as u8)
                .map_err(|_| self.bad()),
        }
    }
}

/// Parse `0x`-prefixed hex or plain decimal.
fn parse_num(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
    last: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Self { inner: text.lines().enumerate(), last: 0 }
    }

    /// The next line that is neither blank nor a comment.
    fn next_line(&mut self) -> Option<Line<'a>> {
        for (idx, raw) in self.inner.by_ref() {
            self.last = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut words = trimmed.split_whitespace();
            let keyword = words.next().unwrap_or_default().to_ascii_lowercase();
            return Some(Line {
                num: idx + 1,
                keyword,
                values: words.collect(),
            });
        }

        None
    }

    /// The next line of a block, which must exist.
    fn block_line(&mut self, block: &'static str) -> Result<Line<'a>> {
        self.next_line().ok_or(InventoryError::UnexpectedEof {
            line: self.last,
            block,
        })
    }
}

/// Parse an inventory into a new expected subnet.
pub fn parse(text: &str, log: &Logger) -> Result<ExpectedSubnet> {
    let mut subnet = ExpectedSubnet::new();
    parse_into(&mut subnet, text, log)?;
    Ok(subnet)
}

/// Parse an inventory, adding its records to `subnet`.
pub fn parse_into(
    subnet: &mut ExpectedSubnet,
    text: &str,
    log: &Logger,
) -> Result<()> {
    let mut lines = Lines::new(text);

    while let Some(line) = lines.next_line() {
        let rec = match line.keyword.as_str() {
            "define_node" => parse_node(&mut lines, log)?,
            "define_port" => Some(parse_port(&mut lines, log)?),
            "define_path" => Some(parse_path(&mut lines)?),
            "define_link" => Some(parse_link(&mut lines)?),
            _ => {
                return Err(InventoryError::UnknownTopLevel {
                    line: line.num,
                    keyword: line.keyword.clone(),
                });
            }
        };

        if let Some(rec) = rec {
            subnet.insert(rec).map_err(|source| InventoryError::Store {
                line: lines.last,
                source,
            })?;
        }
    }

    Ok(())
}

/// Set a field and its mask from the line's value.
macro_rules! field {
    ($line:ident, $exp:expr, $mask:expr) => {{
        $exp = $line.num()?;
        $mask = !0;
    }};
}

fn parse_node(lines: &mut Lines<'_>, log: &Logger) -> Result<Option<Record>> {
    const BLOCK: &str = "node";
    let mut e = NodeRecord::default();
    let mut m = NodeRecord::default();
    let mut have_lid = false;

    loop {
        let l = lines.block_line(BLOCK)?;
        match l.keyword.as_str() {
            "end" => break,
            "lid" => {
                field!(l, e.lid, m.lid);
                have_lid = true;
            }
            "base_version" => {
                field!(l, e.info.base_version, m.info.base_version)
            }
            "class_version" => {
                field!(l, e.info.class_version, m.info.class_version)
            }
            "node_type" => field!(l, e.info.node_type, m.info.node_type),
            "num_ports" => field!(l, e.info.num_ports, m.info.num_ports),
            "sys_guid" => field!(l, e.info.sys_guid, m.info.sys_guid),
            "node_guid" => field!(l, e.info.node_guid, m.info.node_guid),
            "port_guid" => field!(l, e.info.port_guid, m.info.port_guid),
            "partition_cap" => {
                field!(l, e.info.partition_cap, m.info.partition_cap)
            }
            "device_id" => field!(l, e.info.device_id, m.info.device_id),
            "revision" => field!(l, e.info.revision, m.info.revision),
            "port_num" => field!(l, e.info.port_num, m.info.port_num),
            "vendor_id" => field!(l, e.info.vendor_id, m.info.vendor_id),
            other => {
                warn!(log, "skipping unknown node keyword";
                    "line" => l.num, "keyword" => other);
            }
        }
    }

    if !have_lid {
        warn!(log, "dropping node record without a lid";
            "line" => lines.last);
        return Ok(None);
    }

    Ok(Some(Record::Node(Expected::new(e, m))))
}

fn parse_port(lines: &mut Lines<'_>, log: &Logger) -> Result<Record> {
    const BLOCK: &str = "port";
    let mut e = PortRecord::default();
    let mut m = PortRecord::default();
    let mut have_lid = false;

    loop {
        let l = lines.block_line(BLOCK)?;
        let (ei, mi) = (&mut e.info, &mut m.info);
        match l.keyword.as_str() {
            "end" => break,
            "lid" => {
                field!(l, e.lid, m.lid);
                have_lid = true;
            }
            "port_num" => field!(l, e.port_num, m.port_num),
            "m_key" => field!(l, ei.m_key, mi.m_key),
            "subnet_prefix" => field!(l, ei.subnet_prefix, mi.subnet_prefix),
            "base_lid" => field!(l, ei.base_lid, mi.base_lid),
            "master_sm_base_lid" => {
                field!(l, ei.master_sm_base_lid, mi.master_sm_base_lid)
            }
            "capability_mask" => {
                field!(l, ei.capability_mask, mi.capability_mask)
            }
            "diag_code" => field!(l, ei.diag_code, mi.diag_code),
            "m_key_lease_period" => {
                field!(l, ei.m_key_lease_period, mi.m_key_lease_period)
            }
            "local_port_num" => {
                field!(l, ei.local_port_num, mi.local_port_num)
            }
            "link_width_enabled" => {
                field!(l, ei.link_width_enabled, mi.link_width_enabled)
            }
            "link_width_supported" => {
                field!(l, ei.link_width_supported, mi.link_width_supported)
            }
            "link_width_active" => {
                field!(l, ei.link_width_active, mi.link_width_active)
            }
            "link_speed_supported" => {
                ei.set_link_speed_supported(l.num()?);
                mi.state_info1 |= 0xF0;
            }
            "port_state" => {
                ei.set_port_state(l.port_state()?);
                mi.state_info1 |= 0x0F;
            }
            "state_info2" => field!(l, ei.state_info2, mi.state_info2),
            "mpb" => {
                ei.set_mpb(l.num()?);
                mi.mkey_lmc |= 0xC0;
            }
            "lmc" => {
                ei.set_lmc(l.num()?);
                mi.mkey_lmc |= 0x07;
            }
            "link_speed" => field!(l, ei.link_speed, mi.link_speed),
            "mtu_smsl" => field!(l, ei.mtu_smsl, mi.mtu_smsl),
            "vl_cap" => field!(l, ei.vl_cap, mi.vl_cap),
            "vl_high_limit" => field!(l, ei.vl_high_limit, mi.vl_high_limit),
            "vl_arb_high_cap" => {
                field!(l, ei.vl_arb_high_cap, mi.vl_arb_high_cap)
            }
            "vl_arb_low_cap" => {
                field!(l, ei.vl_arb_low_cap, mi.vl_arb_low_cap)
            }
            "mtu_cap" => field!(l, ei.mtu_cap, mi.mtu_cap),
            "vl_stall_life" => field!(l, ei.vl_stall_life, mi.vl_stall_life),
            "vl_enforce" => field!(l, ei.vl_enforce, mi.vl_enforce),
            "m_key_violations" => {
                field!(l, ei.m_key_violations, mi.m_key_violations)
            }
            "p_key_violations" => {
                field!(l, ei.p_key_violations, mi.p_key_violations)
            }
            "q_key_violations" => {
                field!(l, ei.q_key_violations, mi.q_key_violations)
            }
            "guid_cap" => field!(l, ei.guid_cap, mi.guid_cap),
            "subnet_timeout" => {
                field!(l, ei.subnet_timeout, mi.subnet_timeout)
            }
            "resp_time_value" => {
                field!(l, ei.resp_time_value, mi.resp_time_value)
            }
            "error_threshold" => {
                field!(l, ei.error_threshold, mi.error_threshold)
            }
            other => {
                warn!(log, "skipping unknown port keyword";
                    "line" => l.num, "keyword" => other);
            }
        }
    }

    if !have_lid {
        return Err(InventoryError::MissingField {
            line: lines.last,
            block: BLOCK,
            field: "lid",
        });
    }

    Ok(Record::Port(Expected::new(e, m)))
}

fn parse_path(lines: &mut Lines<'_>) -> Result<Record> {
    const BLOCK: &str = "path";
    let mut e = PathRecord::default();
    let mut m = PathRecord::default();
    let all_ones = Gid::from([0xFF; 16]);

    loop {
        let l = lines.block_line(BLOCK)?;
        match l.keyword.as_str() {
            "end" => break,
            "dgid" => {
                e.dgid = l.gid()?;
                m.dgid = all_ones;
            }
            "sgid" => {
                e.sgid = l.gid()?;
                m.sgid = all_ones;
            }
            "dlid" => field!(l, e.dlid, m.dlid),
            "slid" => field!(l, e.slid, m.slid),
            "pkey" => field!(l, e.pkey, m.pkey),
            _ => {
                return Err(InventoryError::UnknownKeyword {
                    line: l.num,
                    block: BLOCK,
                    keyword: l.keyword.clone(),
                });
            }
        }
    }

    for (field, val) in [("slid", e.slid), ("dlid", e.dlid)] {
        if val == 0 {
            return Err(InventoryError::MissingField {
                line: lines.last,
                block: BLOCK,
                field,
            });
        }
    }

    Ok(Record::Path(Expected::new(e, m)))
}

fn parse_link(lines: &mut Lines<'_>) -> Result<Record> {
    const BLOCK: &str = "link";
    let mut e = LinkRecord::default();

    loop {
        let l = lines.block_line(BLOCK)?;
        match l.keyword.as_str() {
            "end" => break,
            "from_lid" => e.from_lid = l.num()?,
            "from_port_num" => e.from_port_num = l.num()?,
            "to_port_num" => e.to_port_num = l.num()?,
            "to_lid" => e.to_lid = l.num()?,

            // The four-value form: from_lid from_port_num to_port_num
            // to_lid on one line.
            kw if parse_num(kw).is_some() => {
                let mut values = vec![kw];
                values.extend(l.values.iter().copied());
                let quad = Line { num: l.num, keyword: "link".into(), values };
                e.from_lid = narrow(&quad, 0)?;
                e.from_port_num = narrow(&quad, 1)?;
                e.to_port_num = narrow(&quad, 2)?;
                e.to_lid = narrow(&quad, 3)?;
            }

            _ => {
                return Err(InventoryError::UnknownKeyword {
                    line: l.num,
                    block: BLOCK,
                    keyword: l.keyword.clone(),
                });
            }
        }
    }

    for (field, val) in [("from_lid", e.from_lid), ("to_lid", e.to_lid)] {
        if val == 0 {
            return Err(InventoryError::MissingField {
                line: lines.last,
                block: BLOCK,
                field,
            });
        }
    }

    // The mask is unused; links compare exactly.
    Ok(Record::Link(Expected::new(e, LinkRecord::default())))
}

fn narrow<T: TryFrom<u64>>(line: &Line<'_>, idx: usize) -> Result<T> {
    T::try_from(line.raw(idx)?).map_err(|_| line.bad())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::Key;
    use crate::store::Observed;

    fn log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    const SAMPLE: &str = "\
# a comment
DEFINE_NODE
lid                     0x1
node_type               0x2
NODE_GUID               0x0002C90300000001
# desc                  sw-1
END

DEFINE_PORT
lid                     0x1
port_num                0x0
port_state              ACTIVE
lmc                     0x0
frobnicate              0x1
END

DEFINE_PATH
dgid                    0xFE80000000000000 0x0002C90300000002
sgid                    0xFE80000000000000 0x0002C90300000001
dlid                    0x2
slid                    0x1
pkey                    0xFFFF
END

DEFINE_LINK
from_lid                0x1
from_port_num           0x1
to_port_num             0x1
to_lid                  0x2
END

DEFINE_LINK
2 1 1 1
END
";

    #[test]
    fn parse_sample() {
        let db = parse(SAMPLE, &log()).unwrap();
        assert_eq!(db.num_nodes(), 1);
        assert_eq!(db.num_ports(), 1);
        assert_eq!(db.num_paths(), 1);
        assert_eq!(db.num_links(), 2);

        let node = db.nodes().next().unwrap();
        assert_eq!(node.expected.info.node_guid, 0x0002_C903_0000_0001);
        assert_eq!(node.mask.lid, 0xFFFF);
        assert_eq!(node.mask.info.node_guid, !0);
        assert_eq!(node.mask.info.device_id, 0);
        assert_eq!(node.count(), 0);

        let port = db.ports().next().unwrap();
        assert_eq!(port.expected.info.port_state(), PortState::Active as u8);
        assert_eq!(port.mask.info.state_info1, 0x0F);
        assert_eq!(port.mask.info.mkey_lmc, 0x07);

        let path = db.find(&Key::Path { slid: 1, dlid: 2 });
        assert!(path.is_some());

        let link = db.find(&Key::Link { from_lid: 2, from_port_num: 1 });
        match link {
            Some(Record::Link(l)) => assert_eq!(l.expected.to_lid, 1),
            other => panic!("unexpected link lookup result {other:?}"),
        }
    }

    #[test]
    fn eof_inside_block() {
        let err = parse("DEFINE_NODE\nlid 0x1\n", &log()).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::UnexpectedEof { line: 2, block: "node" }
        ));
    }

    #[test]
    fn unknown_keywords() {
        let err = parse("DEFINE_PATH\nslid 1\nbogus 2\nEND\n", &log())
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::UnknownKeyword { line: 3, block: "path", .. }
        ));

        let err = parse("DEFINE_SWITCH\nEND\n", &log()).unwrap_err();
        assert!(matches!(err, InventoryError::UnknownTopLevel { line: 1, .. }));
    }

    #[test]
    fn missing_required_fields() {
        // A node without a lid is dropped, not an error.
        let db = parse("DEFINE_NODE\nnode_guid 0x5\nEND\n", &log()).unwrap();
        assert!(db.is_empty());

        let err = parse("DEFINE_PORT\nport_num 1\nEND\n", &log()).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::MissingField { field: "lid", .. }
        ));

        let err = parse("DEFINE_PATH\nslid 1\nEND\n", &log()).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::MissingField { field: "dlid", .. }
        ));
    }

    #[test]
    fn duplicate_key_is_fatal() {
        let text = "DEFINE_NODE\nlid 3\nEND\nDEFINE_NODE\nlid 3\nEND\n";
        let err = parse(text, &log()).unwrap_err();
        assert!(matches!(err, InventoryError::Store { line: 6, .. }));
    }

    #[test]
    fn bad_values() {
        let err = parse("DEFINE_NODE\nlid 0x10000\nEND\n", &log())
            .unwrap_err();
        assert!(matches!(err, InventoryError::BadValue { line: 2, .. }));

        let err = parse("DEFINE_PORT\nlid 1\nport_state SLEEPY\nEND\n", &log())
            .unwrap_err();
        assert!(matches!(err, InventoryError::BadValue { line: 3, .. }));
    }
}
