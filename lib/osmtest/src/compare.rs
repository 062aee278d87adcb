// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Masked record comparison.
//!
//! Every expected record carries a mask of the same shape as the
//! record. A received record matches when, for every field,
//! `(mask & expected) == (mask & received)`. A zero mask field is a
//! wildcard. The first field to differ is reported by name.

use crate::api::Gid;
use crate::api::LinkRecord;
use crate::api::NodeInfo;
use crate::api::NodeRecord;
use crate::api::PathRecord;
use crate::api::PortInfo;
use crate::api::PortRecord;
use serde::Serialize;
use std::fmt;
use std::fmt::Display;

/// A value that can be ANDed with a mask of its own type.
pub trait Masked: Copy + Eq {
    fn and(self, mask: Self) -> Self;
}

macro_rules! masked_int {
    ($($ty:ty),*) => {
        $(
            impl Masked for $ty {
                fn and(self, mask: Self) -> Self {
                    self & mask
                }
            }
        )*
    };
}

masked_int!(u8, u16, u32, u64);

impl Masked for Gid {
    fn and(self, mask: Self) -> Self {
        let a = self.bytes();
        let m = mask.bytes();
        let mut out = [0u8; 16];
        for (o, (a, m)) in out.iter_mut().zip(a.iter().zip(m.iter())) {
            *o = a & m;
        }
        Gid::from(out)
    }
}

/// Compare `a` and `b` under `mask`.
pub fn masked_eq<T: Masked>(mask: T, a: T, b: T) -> bool {
    a.and(mask) == b.and(mask)
}

/// A field value as reported in a mismatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Gid(Gid),
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8(v) => write!(f, "0x{v:X}"),
            Self::U16(v) => write!(f, "0x{v:X}"),
            Self::U32(v) => write!(f, "0x{v:X}"),
            Self::U64(v) => write!(f, "0x{v:016X}"),
            Self::Gid(v) => write!(f, "{v}"),
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        Self::U8(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::U64(v)
    }
}

impl From<Gid> for FieldValue {
    fn from(v: Gid) -> Self {
        Self::Gid(v)
    }
}

/// The first masked field that differs between an expected and a
/// received record. Values are reported with the mask applied.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub expected: FieldValue,
    pub received: FieldValue,
}

impl Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "field {} mismatch: expected {} received {}",
            self.field, self.expected, self.received
        )
    }
}

/// Check one field.
pub fn check<T: Masked + Into<FieldValue>>(
    field: &'static str,
    expected: T,
    mask: T,
    received: T,
) -> Result<(), FieldMismatch> {
    if masked_eq(mask, expected, received) {
        return Ok(());
    }

    Err(FieldMismatch {
        field,
        expected: expected.and(mask).into(),
        received: received.and(mask).into(),
    })
}

/// Check the bits of a packed byte selected by `bits`. Used where one
/// byte carries two sub-fields that are named separately.
fn check_bits(
    field: &'static str,
    bits: u8,
    expected: u8,
    mask: u8,
    received: u8,
) -> Result<(), FieldMismatch> {
    check(field, expected, mask & bits, received)
}

pub fn compare_node_info(
    exp: &NodeInfo,
    mask: &NodeInfo,
    rcv: &NodeInfo,
) -> Result<(), FieldMismatch> {
    check(
        "base_version",
        exp.base_version,
        mask.base_version,
        rcv.base_version,
    )?;
    check(
        "class_version",
        exp.class_version,
        mask.class_version,
        rcv.class_version,
    )?;
    check("node_type", exp.node_type, mask.node_type, rcv.node_type)?;
    check("num_ports", exp.num_ports, mask.num_ports, rcv.num_ports)?;
    check("sys_guid", exp.sys_guid, mask.sys_guid, rcv.sys_guid)?;
    check("node_guid", exp.node_guid, mask.node_guid, rcv.node_guid)?;
    check("port_guid", exp.port_guid, mask.port_guid, rcv.port_guid)?;
    check(
        "partition_cap",
        exp.partition_cap,
        mask.partition_cap,
        rcv.partition_cap,
    )?;
    check("device_id", exp.device_id, mask.device_id, rcv.device_id)?;
    check("revision", exp.revision, mask.revision, rcv.revision)?;
    check("port_num", exp.port_num, mask.port_num, rcv.port_num)?;
    check("vendor_id", exp.vendor_id, mask.vendor_id, rcv.vendor_id)
}

/// Compare a NodeRecord. The description string is informational and
/// never compared.
pub fn compare_node(
    exp: &NodeRecord,
    mask: &NodeRecord,
    rcv: &NodeRecord,
) -> Result<(), FieldMismatch> {
    check("lid", exp.lid, mask.lid, rcv.lid)?;
    compare_node_info(&exp.info, &mask.info, &rcv.info)
}

pub fn compare_port_info(
    exp: &PortInfo,
    mask: &PortInfo,
    rcv: &PortInfo,
) -> Result<(), FieldMismatch> {
    check("m_key", exp.m_key, mask.m_key, rcv.m_key)?;
    check(
        "subnet_prefix",
        exp.subnet_prefix,
        mask.subnet_prefix,
        rcv.subnet_prefix,
    )?;
    check("base_lid", exp.base_lid, mask.base_lid, rcv.base_lid)?;
    check(
        "master_sm_base_lid",
        exp.master_sm_base_lid,
        mask.master_sm_base_lid,
        rcv.master_sm_base_lid,
    )?;
    check(
        "capability_mask",
        exp.capability_mask,
        mask.capability_mask,
        rcv.capability_mask,
    )?;
    check("diag_code", exp.diag_code, mask.diag_code, rcv.diag_code)?;
    check(
        "m_key_lease_period",
        exp.m_key_lease_period,
        mask.m_key_lease_period,
        rcv.m_key_lease_period,
    )?;
    check(
        "local_port_num",
        exp.local_port_num,
        mask.local_port_num,
        rcv.local_port_num,
    )?;
    check(
        "link_width_enabled",
        exp.link_width_enabled,
        mask.link_width_enabled,
        rcv.link_width_enabled,
    )?;
    check(
        "link_width_supported",
        exp.link_width_supported,
        mask.link_width_supported,
        rcv.link_width_supported,
    )?;
    check(
        "link_width_active",
        exp.link_width_active,
        mask.link_width_active,
        rcv.link_width_active,
    )?;
    check_bits(
        "link_speed_supported",
        0xF0,
        exp.state_info1,
        mask.state_info1,
        rcv.state_info1,
    )?;
    check_bits(
        "port_state",
        0x0F,
        exp.state_info1,
        mask.state_info1,
        rcv.state_info1,
    )?;
    check("state_info2", exp.state_info2, mask.state_info2, rcv.state_info2)?;
    check_bits("mpb", 0xC0, exp.mkey_lmc, mask.mkey_lmc, rcv.mkey_lmc)?;
    check_bits("lmc", 0x07, exp.mkey_lmc, mask.mkey_lmc, rcv.mkey_lmc)?;
    check("link_speed", exp.link_speed, mask.link_speed, rcv.link_speed)?;
    check("mtu_smsl", exp.mtu_smsl, mask.mtu_smsl, rcv.mtu_smsl)?;
    check("vl_cap", exp.vl_cap, mask.vl_cap, rcv.vl_cap)?;
    check(
        "vl_high_limit",
        exp.vl_high_limit,
        mask.vl_high_limit,
        rcv.vl_high_limit,
    )?;
    check(
        "vl_arb_high_cap",
        exp.vl_arb_high_cap,
        mask.vl_arb_high_cap,
        rcv.vl_arb_high_cap,
    )?;
    check(
        "vl_arb_low_cap",
        exp.vl_arb_low_cap,
        mask.vl_arb_low_cap,
        rcv.vl_arb_low_cap,
    )?;
    check("mtu_cap", exp.mtu_cap, mask.mtu_cap, rcv.mtu_cap)?;
    check(
        "vl_stall_life",
        exp.vl_stall_life,
        mask.vl_stall_life,
        rcv.vl_stall_life,
    )?;
    check("vl_enforce", exp.vl_enforce, mask.vl_enforce, rcv.vl_enforce)?;
    check(
        "m_key_violations",
        exp.m_key_violations,
        mask.m_key_violations,
        rcv.m_key_violations,
    )?;
    check(
        "p_key_violations",
        exp.p_key_violations,
        mask.p_key_violations,
        rcv.p_key_violations,
    )?;
    check(
        "q_key_violations",
        exp.q_key_violations,
        mask.q_key_violations,
        rcv.q_key_violations,
    )?;
    check("guid_cap", exp.guid_cap, mask.guid_cap, rcv.guid_cap)?;
    // Only the low five bits of subnet_timeout are defined.
    check(
        "subnet_timeout",
        exp.subnet_timeout,
        mask.subnet_timeout & 0x1F,
        rcv.subnet_timeout,
    )?;
    check(
        "resp_time_value",
        exp.resp_time_value,
        mask.resp_time_value,
        rcv.resp_time_value,
    )?;
    check(
        "error_threshold",
        exp.error_threshold,
        mask.error_threshold,
        rcv.error_threshold,
    )
}

pub fn compare_port(
    exp: &PortRecord,
    mask: &PortRecord,
    rcv: &PortRecord,
) -> Result<(), FieldMismatch> {
    check("lid", exp.lid, mask.lid, rcv.lid)?;
    check("port_num", exp.port_num, mask.port_num, rcv.port_num)?;
    compare_port_info(&exp.info, &mask.info, &rcv.info)
}

pub fn compare_path(
    exp: &PathRecord,
    mask: &PathRecord,
    rcv: &PathRecord,
) -> Result<(), FieldMismatch> {
    check("dgid", exp.dgid, mask.dgid, rcv.dgid)?;
    check("sgid", exp.sgid, mask.sgid, rcv.sgid)?;
    check("dlid", exp.dlid, mask.dlid, rcv.dlid)?;
    check("slid", exp.slid, mask.slid, rcv.slid)?;
    check(
        "hop_flow_raw",
        exp.hop_flow_raw,
        mask.hop_flow_raw,
        rcv.hop_flow_raw,
    )?;
    check("tclass", exp.tclass, mask.tclass, rcv.tclass)?;
    check("num_path", exp.num_path, mask.num_path, rcv.num_path)?;
    check("pkey", exp.pkey, mask.pkey, rcv.pkey)?;
    check(
        "qos_class_sl",
        exp.qos_class_sl,
        mask.qos_class_sl,
        rcv.qos_class_sl,
    )?;
    check("mtu", exp.mtu, mask.mtu, rcv.mtu)?;
    check("rate", exp.rate, mask.rate, rcv.rate)?;
    check("pkt_life", exp.pkt_life, mask.pkt_life, rcv.pkt_life)?;
    check("preference", exp.preference, mask.preference, rcv.preference)
}

/// Links carry no mask; every field is part of the identity.
pub fn compare_link(
    exp: &LinkRecord,
    rcv: &LinkRecord,
) -> Result<(), FieldMismatch> {
    check("from_lid", exp.from_lid, !0, rcv.from_lid)?;
    check("from_port_num", exp.from_port_num, !0, rcv.from_port_num)?;
    check("to_port_num", exp.to_port_num, !0, rcv.to_port_num)?;
    check("to_lid", exp.to_lid, !0, rcv.to_lid)
}

/// The mask applied to a discovered NodeRecord: every static hardware
/// field. The port number differs with the port the record was read
/// through and is left out.
pub fn node_identity_mask() -> NodeRecord {
    NodeRecord {
        lid: !0,
        info: NodeInfo {
            base_version: !0,
            class_version: !0,
            node_type: !0,
            num_ports: !0,
            sys_guid: !0,
            node_guid: !0,
            port_guid: !0,
            partition_cap: !0,
            device_id: !0,
            revision: !0,
            port_num: 0,
            vendor_id: !0,
        },
        desc: String::new(),
    }
}

/// The mask applied to a discovered PortInfoRecord.
pub fn port_identity_mask() -> PortRecord {
    PortRecord {
        lid: !0,
        port_num: !0,
        info: PortInfo {
            subnet_prefix: !0,
            base_lid: !0,
            capability_mask: !0,
            local_port_num: !0,
            link_width_supported: !0,
            // link_speed_supported and lmc only
            state_info1: 0xF0,
            mkey_lmc: 0x07,
            mtu_cap: !0,
            vl_cap: !0,
            guid_cap: !0,
            ..Default::default()
        },
    }
}

/// The mask applied to a discovered PathRecord: the fields the
/// inventory records.
pub fn path_identity_mask() -> PathRecord {
    PathRecord {
        dgid: Gid::from([0xFF; 16]),
        sgid: Gid::from([0xFF; 16]),
        dlid: !0,
        slid: !0,
        pkey: !0,
        ..Default::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn masked_equality_laws() {
        let vals: [u32; 4] = [0, 0x12, 0xFF00_0012, u32::MAX];
        for &a in &vals {
            for &b in &vals {
                assert!(masked_eq(0, a, b));
                assert_eq!(masked_eq(!0, a, b), a == b);

                // Transitivity under a fixed mask.
                for &c in &vals {
                    let m = 0x0000_00FF;
                    if masked_eq(m, a, b) && masked_eq(m, b, c) {
                        assert!(masked_eq(m, a, c));
                    }
                }
            }
        }
    }

    #[test]
    fn gid_mask() {
        let a = Gid::from_parts(0xFE80_0000_0000_0000, 0x1111);
        let b = Gid::from_parts(0xFE80_0000_0000_0001, 0x1111);
        let prefix_only = Gid::from_parts(!0, 0);
        let iid_only = Gid::from_parts(0, !0);
        assert!(!masked_eq(prefix_only, a, b));
        assert!(masked_eq(iid_only, a, b));
    }

    #[test]
    fn first_mismatch_is_named() {
        let mut exp = NodeRecord::default();
        exp.lid = 3;
        exp.info.node_guid = 0xAA;
        exp.info.device_id = 0x1003;
        let mask = node_identity_mask();

        let mut rcv = exp.clone();
        rcv.info.device_id = 0x1004;
        rcv.desc = "whatever".into();
        let err = compare_node(&exp, &mask, &rcv).unwrap_err();
        assert_eq!(err.field, "device_id");
        assert_eq!(err.expected, FieldValue::U16(0x1003));
        assert_eq!(err.received, FieldValue::U16(0x1004));

        // The port number is not part of the identity.
        let mut rcv = exp.clone();
        rcv.info.port_num = 2;
        assert!(compare_node(&exp, &mask, &rcv).is_ok());
    }

    #[test]
    fn packed_fields_are_checked_separately() {
        let mut exp = PortRecord::default();
        exp.info.set_port_state(4);
        exp.info.set_link_speed_supported(1);

        let mut mask = PortRecord::default();
        mask.info.state_info1 = 0x0F;

        // Only the speed nibble differs; the mask covers only state.
        let mut rcv = exp;
        rcv.info.set_link_speed_supported(3);
        assert!(compare_port(&exp, &mask, &rcv).is_ok());

        rcv.info.set_port_state(1);
        let err = compare_port(&exp, &mask, &rcv).unwrap_err();
        assert_eq!(err.field, "port_state");
    }
}
