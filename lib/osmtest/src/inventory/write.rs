// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::api::Gid;
use crate::api::LinkRecord;
use crate::api::NodeRecord;
use crate::api::NodeType;
use crate::api::PathRecord;
use crate::api::PortRecord;
use crate::api::PortState;
use crate::store::ExpectedSubnet;
use std::fmt::UpperHex;
use std::io;
use std::io::Write;

fn kv(w: &mut impl Write, key: &str, val: impl UpperHex) -> io::Result<()> {
    writeln!(w, "{key:<24}0x{val:X}")
}

fn kv_gid(w: &mut impl Write, key: &str, gid: &Gid) -> io::Result<()> {
    writeln!(
        w,
        "{key:<24}0x{:016X} 0x{:016X}",
        gid.prefix(),
        gid.interface_id()
    )
}

/// An informational field, written as a comment.
fn note(w: &mut impl Write, key: &str, val: &str) -> io::Result<()> {
    writeln!(w, "# {key:<22}{val}")
}

fn banner(w: &mut impl Write, title: &str) -> io::Result<()> {
    writeln!(w, "#")?;
    writeln!(w, "# {title}")?;
    writeln!(w, "#")
}

/// Write every record of `subnet` in inventory form, in key order.
pub fn write(
    w: &mut impl Write,
    subnet: &ExpectedSubnet,
    ignore_paths: bool,
) -> io::Result<()> {
    banner(w, "Node Records")?;
    for n in subnet.nodes() {
        write_node(w, &n.expected)?;
    }

    banner(w, "Port Records")?;
    for p in subnet.ports() {
        write_port(w, &p.expected)?;
    }

    if !ignore_paths {
        banner(w, "Path Records")?;
        for p in subnet.paths() {
            write_path(w, &p.expected)?;
        }
    }

    banner(w, "Link Records")?;
    for l in subnet.links() {
        write_link(w, &l.expected)?;
    }

    Ok(())
}

fn write_node(w: &mut impl Write, rec: &NodeRecord) -> io::Result<()> {
    let ni = &rec.info;
    writeln!(w, "DEFINE_NODE")?;
    kv(w, "lid", rec.lid)?;
    kv(w, "base_version", ni.base_version)?;
    kv(w, "class_version", ni.class_version)?;
    kv(w, "node_type", ni.node_type)?;
    if let Some(nt) = ni.node_type() {
        note(w, "node_type", &nt.to_string())?;
    }
    kv(w, "num_ports", ni.num_ports)?;
    kv(w, "sys_guid", ni.sys_guid)?;
    kv(w, "node_guid", ni.node_guid)?;
    kv(w, "port_guid", ni.port_guid)?;
    kv(w, "partition_cap", ni.partition_cap)?;
    kv(w, "device_id", ni.device_id)?;
    kv(w, "revision", ni.revision)?;
    kv(w, "port_num", ni.port_num)?;
    kv(w, "vendor_id", ni.vendor_id)?;
    note(w, "node_desc", &rec.desc)?;
    writeln!(w, "END\n")
}

fn write_port(w: &mut impl Write, rec: &PortRecord) -> io::Result<()> {
    let pi = &rec.info;
    writeln!(w, "DEFINE_PORT")?;
    kv(w, "lid", rec.lid)?;
    kv(w, "port_num", rec.port_num)?;
    kv(w, "m_key", pi.m_key)?;
    kv(w, "subnet_prefix", pi.subnet_prefix)?;
    kv(w, "base_lid", pi.base_lid)?;
    kv(w, "master_sm_base_lid", pi.master_sm_base_lid)?;
    kv(w, "capability_mask", pi.capability_mask)?;
    kv(w, "diag_code", pi.diag_code)?;
    kv(w, "m_key_lease_period", pi.m_key_lease_period)?;
    kv(w, "local_port_num", pi.local_port_num)?;
    kv(w, "link_width_enabled", pi.link_width_enabled)?;
    kv(w, "link_width_supported", pi.link_width_supported)?;
    kv(w, "link_width_active", pi.link_width_active)?;
    kv(w, "link_speed_supported", pi.link_speed_supported())?;
    kv(w, "port_state", pi.port_state())?;
    if let Ok(state) = PortState::try_from(pi.port_state()) {
        note(w, "port_state", &state.to_string())?;
    }
    kv(w, "state_info2", pi.state_info2)?;
    kv(w, "mpb", pi.mpb())?;
    kv(w, "lmc", pi.lmc())?;
    kv(w, "link_speed", pi.link_speed)?;
    kv(w, "mtu_smsl", pi.mtu_smsl)?;
    kv(w, "vl_cap", pi.vl_cap)?;
    kv(w, "vl_high_limit", pi.vl_high_limit)?;
    kv(w, "vl_arb_high_cap", pi.vl_arb_high_cap)?;
    kv(w, "vl_arb_low_cap", pi.vl_arb_low_cap)?;
    kv(w, "mtu_cap", pi.mtu_cap)?;
    kv(w, "vl_stall_life", pi.vl_stall_life)?;
    kv(w, "vl_enforce", pi.vl_enforce)?;
    kv(w, "m_key_violations", pi.m_key_violations)?;
    kv(w, "p_key_violations", pi.p_key_violations)?;
    kv(w, "q_key_violations", pi.q_key_violations)?;
    kv(w, "guid_cap", pi.guid_cap)?;
    kv(w, "subnet_timeout", pi.subnet_timeout & 0x1F)?;
    kv(w, "resp_time_value", pi.resp_time_value)?;
    kv(w, "error_threshold", pi.error_threshold)?;
    writeln!(w, "END\n")
}

fn write_path(w: &mut impl Write, rec: &PathRecord) -> io::Result<()> {
    writeln!(w, "DEFINE_PATH")?;
    kv_gid(w, "dgid", &rec.dgid)?;
    kv_gid(w, "sgid", &rec.sgid)?;
    kv(w, "dlid", rec.dlid)?;
    kv(w, "slid", rec.slid)?;
    kv(w, "pkey", rec.pkey)?;
    writeln!(w, "END\n")
}

fn write_link(w: &mut impl Write, rec: &LinkRecord) -> io::Result<()> {
    writeln!(w, "DEFINE_LINK")?;
    kv(w, "from_lid", rec.from_lid)?;
    kv(w, "from_port_num", rec.from_port_num)?;
    kv(w, "to_port_num", rec.to_port_num)?;
    kv(w, "to_lid", rec.to_lid)?;
    writeln!(w, "END\n")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::NodeInfo;
    use crate::store::Expected;
    use crate::store::Record;

    #[test]
    fn layout() {
        let mut db = ExpectedSubnet::new();
        db.insert(Record::Node(Expected::new(
            NodeRecord {
                lid: 0x1A,
                info: NodeInfo {
                    node_type: NodeType::Switch as u8,
                    node_guid: 0xABCD,
                    ..Default::default()
                },
                desc: "spine-0".into(),
            },
            NodeRecord::default(),
        )))
        .unwrap();

        let mut out = vec![];
        write(&mut out, &db, true).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("DEFINE_NODE\nlid                     0x1A\n"));
        assert!(text.contains("node_guid               0xABCD\n"));
        assert!(text.contains("# node_type             SWITCH\n"));
        assert!(text.contains("# node_desc             spine-0\n"));
        assert!(!text.contains("Path Records"));
        assert!(text.contains("# Link Records"));
    }
}
