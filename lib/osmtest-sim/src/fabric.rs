// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The simulated fabric: its nodes, their ports, the links between
//! them, and every table the SA derives from those.
//!
//! A CA in this fabric has one port, and that port owns a block of
//! `2^lmc` LIDs. A switch owns a single LID shared by all of its
//! ports. Paths are never stored; they are derived for every ordered
//! pair of nodes whenever they are asked for.

use osmtest::api::DEFAULT_SUBNET_PREFIX;
use osmtest::api::Gid;
use osmtest::api::GuidInfoRecord;
use osmtest::api::LftRecord;
use osmtest::api::LinkRecord;
use osmtest::api::MftRecord;
use osmtest::api::NodeInfo;
use osmtest::api::NodeRecord;
use osmtest::api::NodeType;
use osmtest::api::PERMISSIVE_LID;
use osmtest::api::PKeyTableRecord;
use osmtest::api::PathRecord;
use osmtest::api::PortInfo;
use osmtest::api::PortRecord;
use osmtest::api::PortState;
use osmtest::api::Selector;
use osmtest::api::SlVlRecord;
use osmtest::api::SwitchInfoRecord;
use osmtest::api::VlArbEntry;
use osmtest::api::VlArbRecord;
use osmtest::api::encode_selector;
use osmtest::api::mtu;
use osmtest::api::rate;
use osmtest::api::vlarb_block;
use osmtest::context::UNICAST_LID_MAX;
use osmtest::inventory;
use osmtest::inventory::InventoryError;
use osmtest::store::ExpectedSubnet;
use slog::Logger;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// The vendor every simulated device claims.
pub const VENDOR_ID: u32 = 0x0002C9;

/// The packet lifetime of every path, as a six-bit exponent.
pub const DEFAULT_PKT_LIFE: u8 = 18;

const GUID_BASE: u64 = 0x0002_C903_0000_0000;
const CA_DEVICE_ID: u16 = 0x1003;
const SWITCH_DEVICE_ID: u16 = 0xC738;
const FULL_PKEY: u16 = 0xFFFF;

/// Entries in one LFT block.
const LFT_BLOCK_LEN: usize = 64;

/// LFT entry for a LID the switch cannot reach.
const LFT_UNREACHABLE: u8 = 0xFF;

mod cap {
    pub const IS_SM: u32 = 1 << 1;
    pub const CA: u32 = 0x0251_0A68;
    pub const SWITCH_PORT0: u32 = 0x0040_0048;
}

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("the fabric has no CA to act as the local port")]
    NoLocalPort,

    #[error("lmc {0} is out of range")]
    BadLmc(u8),

    #[error("link names node {0}, which does not exist")]
    NoSuchNode(usize),

    #[error("link names port {port} of node {node}, which has {num_ports}")]
    NoSuchPort { node: usize, port: u8, num_ports: u8 },

    #[error("port {port} of node {node} is linked twice")]
    PortInUse { node: usize, port: u8 },

    #[error("out of unicast lids")]
    LidsExhausted,

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

#[derive(Clone, Debug)]
pub struct Fabric {
    subnet_prefix: u64,
    lmc: u8,
    mtu: u8,
    rate: u8,
    pkt_life: u8,
    nodes: Vec<NodeRecord>,
    ports: Vec<PortRecord>,
    links: Vec<LinkRecord>,
}

impl Fabric {
    /// Build a fabric out of the records of an expected subnet. Paths
    /// in the subnet are ignored; the fabric derives its own.
    pub fn from_subnet(subnet: &ExpectedSubnet) -> Result<Self, FabricError> {
        let nodes: Vec<NodeRecord> =
            subnet.nodes().map(|n| n.expected.clone()).collect();
        let ports: Vec<PortRecord> =
            subnet.ports().map(|p| p.expected).collect();
        let links: Vec<LinkRecord> =
            subnet.links().map(|l| l.expected).collect();

        let local = nodes
            .iter()
            .find(|n| n.info.node_type() == Some(NodeType::Ca))
            .ok_or(FabricError::NoLocalPort)?;
        let lmc = ports
            .iter()
            .find(|p| p.lid == local.lid)
            .map(|p| p.info.lmc())
            .unwrap_or(0);
        let subnet_prefix = ports
            .iter()
            .map(|p| p.info.subnet_prefix)
            .find(|p| *p != 0)
            .unwrap_or(DEFAULT_SUBNET_PREFIX);

        Ok(Self {
            subnet_prefix,
            lmc,
            mtu: mtu::M2048,
            rate: rate::R10,
            pkt_life: DEFAULT_PKT_LIFE,
            nodes,
            ports,
            links,
        })
    }

    /// Parse an inventory and build the fabric it describes.
    pub fn from_inventory(
        text: &str,
        log: &Logger,
    ) -> Result<Self, FabricError> {
        let subnet = inventory::parse(text, log)?;
        Self::from_subnet(&subnet)
    }

    pub fn read_inventory(
        path: &Path,
        log: &Logger,
    ) -> Result<Self, FabricError> {
        let subnet = inventory::read_file(path, log)?;
        Self::from_subnet(&subnet)
    }

    pub fn subnet_prefix(&self) -> u64 {
        self.subnet_prefix
    }

    pub fn lmc(&self) -> u8 {
        self.lmc
    }

    /// The MTU every path and group can carry at most.
    pub fn mtu(&self) -> u8 {
        self.mtu
    }

    pub fn rate(&self) -> u8 {
        self.rate
    }

    pub fn pkt_life(&self) -> u8 {
        self.pkt_life
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn ports(&self) -> &[PortRecord] {
        &self.ports
    }

    pub fn links(&self) -> &[LinkRecord] {
        &self.links
    }

    pub fn gid(&self, port_guid: u64) -> Gid {
        Gid::from_parts(self.subnet_prefix, port_guid)
    }

    /// The base LID that `lid` answers for. An LMC alias resolves to
    /// the base LID of its port.
    pub fn resolve(&self, lid: u16) -> Option<u16> {
        if lid == 0 || lid == PERMISSIVE_LID {
            return None;
        }

        let lid = u32::from(lid);
        self.ports
            .iter()
            .find(|p| {
                let base = u32::from(p.lid);
                (base..base + (1u32 << p.info.lmc())).contains(&lid)
            })
            .map(|p| p.lid)
    }

    pub fn node_at(&self, base: u16) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.lid == base)
    }

    pub fn node_by_port_guid(&self, port_guid: u64) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.info.port_guid == port_guid)
    }

    pub fn ports_at(&self, base: u16) -> impl Iterator<Item = &PortRecord> {
        self.ports.iter().filter(move |p| p.lid == base)
    }

    pub fn switches(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter().filter(|n| n.info.is_switch())
    }

    /// Return true if `gid` names a port of this fabric.
    pub fn knows_gid(&self, gid: &Gid) -> bool {
        gid.prefix() == self.subnet_prefix
            && self.node_by_port_guid(gid.interface_id()).is_some()
    }

    /// The single path from `src` to `dst`, between their base LIDs.
    pub fn path(&self, src: &NodeRecord, dst: &NodeRecord) -> PathRecord {
        PathRecord {
            dgid: self.gid(dst.info.port_guid),
            sgid: self.gid(src.info.port_guid),
            dlid: dst.lid,
            slid: src.lid,
            num_path: 0x80,
            pkey: FULL_PKEY,
            mtu: encode_selector(Selector::Exactly, self.mtu),
            rate: encode_selector(Selector::Exactly, self.rate),
            pkt_life: encode_selector(Selector::Exactly, self.pkt_life),
            ..Default::default()
        }
    }

    /// One path for every ordered pair of nodes, a node with itself
    /// included.
    pub fn paths(&self) -> Vec<PathRecord> {
        let mut out = Vec::with_capacity(self.nodes.len().pow(2));
        for src in &self.nodes {
            for dst in &self.nodes {
                out.push(self.path(src, dst));
            }
        }
        out
    }

    /// The first GUIDInfo block of the port at `base`. Only CA ports
    /// carry a GUID table.
    pub fn guid_info(&self, base: u16) -> Option<GuidInfoRecord> {
        let node = self.node_at(base)?;
        if node.info.is_switch() {
            return None;
        }

        let mut guids = [0; 8];
        guids[0] = node.info.port_guid;
        Some(GuidInfoRecord { lid: base, block_num: 0, guids })
    }

    /// The first P_Key block of every port at `base`. Each port holds
    /// only the full default partition.
    pub fn pkey_tables(&self, base: u16) -> Vec<PKeyTableRecord> {
        self.ports_at(base)
            .map(|p| {
                let mut pkeys = [0; 32];
                pkeys[0] = FULL_PKEY;
                PKeyTableRecord {
                    lid: base,
                    port_num: p.port_num,
                    block_num: 0,
                    pkeys,
                }
            })
            .collect()
    }

    /// The highest LID in use, aliases included.
    pub fn lid_top(&self) -> u16 {
        self.ports
            .iter()
            .map(|p| {
                let span = (1u32 << p.info.lmc()) - 1;
                (u32::from(p.lid) + span).min(u32::from(UNICAST_LID_MAX))
            })
            .max()
            .unwrap_or(0) as u16
    }

    pub fn switch_info(&self, sw: &NodeRecord) -> SwitchInfoRecord {
        SwitchInfoRecord {
            lid: sw.lid,
            lin_cap: UNICAST_LID_MAX,
            rand_cap: 0,
            mcast_cap: 0x200,
            lin_top: self.lid_top(),
            def_port: 0,
            life_state: 0x10,
        }
    }

    /// The out port `sw` uses to reach `lid`.
    fn route(&self, sw: &NodeRecord, lid: u16) -> u8 {
        if lid == sw.lid {
            return 0;
        }
        let Some(base) = self.resolve(lid) else {
            return LFT_UNREACHABLE;
        };
        self.links
            .iter()
            .find(|l| l.from_lid == sw.lid && l.to_lid == base)
            .map(|l| l.from_port_num)
            .unwrap_or(LFT_UNREACHABLE)
    }

    /// Every LFT block of `sw` up to the top LID in use.
    pub fn lft(&self, sw: &NodeRecord) -> Vec<LftRecord> {
        let blocks = usize::from(self.lid_top()) / LFT_BLOCK_LEN + 1;
        (0..blocks)
            .map(|block| {
                let first = block * LFT_BLOCK_LEN;
                let ports = (first..first + LFT_BLOCK_LEN)
                    .map(|lid| self.route(sw, lid as u16))
                    .collect();
                LftRecord { lid: sw.lid, block_num: block as u16, ports }
            })
            .collect()
    }

    /// The first MFT block of `sw`. No group is routed through the
    /// simulated switches, so every mask is empty.
    pub fn mft(&self, sw: &NodeRecord) -> MftRecord {
        MftRecord { lid: sw.lid, position: 0, block_num: 0, masks: [0; 32] }
    }

    fn sl2vl_table(lid: u16, in_port: u8, out_port: u8) -> SlVlRecord {
        let mut vls = [0; 16];
        for (sl, vl) in vls.iter_mut().enumerate() {
            *vl = sl as u8 & 0x7;
        }
        SlVlRecord { lid, in_port, out_port, vls }
    }

    /// The SL to VL tables at `base`. A CA has a single table for its
    /// port; a switch has one for every pair of distinct ports.
    pub fn sl2vl(&self, base: u16) -> Vec<SlVlRecord> {
        let Some(node) = self.node_at(base) else {
            return vec![];
        };

        if !node.info.is_switch() {
            return vec![Self::sl2vl_table(base, 0, node.info.port_num)];
        }

        let n = node.info.num_ports;
        let mut out = vec![];
        for in_port in 0..=n {
            for out_port in 1..=n {
                if in_port != out_port {
                    out.push(Self::sl2vl_table(base, in_port, out_port));
                }
            }
        }
        out
    }

    /// One VL arbitration block of `port`. The low-priority table
    /// spreads weight evenly over the data VLs; the high-priority
    /// table favors VL0. The upper halves are empty.
    pub fn vlarb(&self, port: &PortRecord, block: u8) -> VlArbRecord {
        let mut entries = [VlArbEntry::default(); 32];
        match block {
            vlarb_block::LOW_0_31 => {
                for (vl, e) in entries.iter_mut().take(8).enumerate() {
                    *e = VlArbEntry { vl: vl as u8, weight: 0x40 };
                }
            }
            vlarb_block::HIGH_0_31 => {
                entries[0] = VlArbEntry { vl: 0, weight: 0xFF };
            }
            _ => (),
        }

        VlArbRecord {
            lid: port.lid,
            port_num: port.port_num,
            block_num: block,
            entries,
        }
    }
}

#[derive(Clone, Debug)]
struct NodeSpec {
    node_type: NodeType,
    num_ports: u8,
    desc: String,
}

#[derive(Clone, Copy, Debug)]
struct LinkSpec {
    a: usize,
    a_port: u8,
    b: usize,
    b_port: u8,
}

/// Describe a fabric node by node. Nodes are numbered in the order
/// they are added, starting at zero; links name nodes by that number.
/// The first CA becomes the local port and the master SM.
#[derive(Clone, Debug)]
pub struct FabricBuilder {
    subnet_prefix: u64,
    lmc: u8,
    mtu: u8,
    rate: u8,
    pkt_life: u8,
    nodes: Vec<NodeSpec>,
    links: Vec<LinkSpec>,
}

impl Default for FabricBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FabricBuilder {
    pub fn new() -> Self {
        Self {
            subnet_prefix: DEFAULT_SUBNET_PREFIX,
            lmc: 0,
            mtu: mtu::M2048,
            rate: rate::R10,
            pkt_life: DEFAULT_PKT_LIFE,
            nodes: vec![],
            links: vec![],
        }
    }

    pub fn subnet_prefix(mut self, prefix: u64) -> Self {
        self.subnet_prefix = prefix;
        self
    }

    /// The LMC of every CA port.
    pub fn lmc(mut self, lmc: u8) -> Self {
        self.lmc = lmc;
        self
    }

    pub fn mtu(mut self, mtu: u8) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn rate(mut self, rate: u8) -> Self {
        self.rate = rate;
        self
    }

    pub fn pkt_life(mut self, pkt_life: u8) -> Self {
        self.pkt_life = pkt_life;
        self
    }

    /// Add a single-port CA.
    pub fn ca(mut self, desc: &str) -> Self {
        self.nodes.push(NodeSpec {
            node_type: NodeType::Ca,
            num_ports: 1,
            desc: desc.to_string(),
        });
        self
    }

    pub fn switch(mut self, desc: &str, num_ports: u8) -> Self {
        self.nodes.push(NodeSpec {
            node_type: NodeType::Switch,
            num_ports,
            desc: desc.to_string(),
        });
        self
    }

    /// Cable port `a_port` of node `a` to port `b_port` of node `b`.
    pub fn link(mut self, a: usize, a_port: u8, b: usize, b_port: u8) -> Self {
        self.links.push(LinkSpec { a, a_port, b, b_port });
        self
    }

    fn check_links(&self) -> Result<(), FabricError> {
        let mut used = BTreeSet::new();
        for l in &self.links {
            for (node, port) in [(l.a, l.a_port), (l.b, l.b_port)] {
                let spec =
                    self.nodes.get(node).ok_or(FabricError::NoSuchNode(node))?;
                if port == 0 || port > spec.num_ports {
                    return Err(FabricError::NoSuchPort {
                        node,
                        port,
                        num_ports: spec.num_ports,
                    });
                }
                if !used.insert((node, port)) {
                    return Err(FabricError::PortInUse { node, port });
                }
            }
        }
        Ok(())
    }

    /// Hand out a base LID to every node. CAs are aligned to their LMC
    /// block; switches take a block too so alignment holds.
    fn assign_lids(&self) -> Result<Vec<u16>, FabricError> {
        let step = 1u32 << self.lmc;
        let mut next = step;
        let mut lids = Vec::with_capacity(self.nodes.len());

        for _ in &self.nodes {
            if next + step - 1 > u32::from(UNICAST_LID_MAX) {
                return Err(FabricError::LidsExhausted);
            }
            lids.push(next as u16);
            next += step;
        }
        Ok(lids)
    }

    fn port_info(
        &self,
        base_lid: u16,
        port_num: u8,
        sm_lid: u16,
        active: bool,
    ) -> PortInfo {
        let state = if active { PortState::Active } else { PortState::Down };
        let mut info = PortInfo {
            subnet_prefix: self.subnet_prefix,
            base_lid,
            master_sm_base_lid: sm_lid,
            local_port_num: port_num,
            link_width_enabled: 0x3,
            link_width_supported: 0x3,
            link_width_active: 0x2,
            state_info2: if active { 0x52 } else { 0x22 },
            link_speed: 0x11,
            mtu_smsl: self.mtu << 4,
            vl_cap: 0x34,
            vl_arb_high_cap: 8,
            vl_arb_low_cap: 8,
            mtu_cap: self.mtu,
            subnet_timeout: 18,
            resp_time_value: 16,
            ..Default::default()
        };
        info.set_link_speed_supported(1);
        info.set_port_state(state as u8);
        info
    }

    pub fn build(self) -> Result<Fabric, FabricError> {
        if self.lmc > 7 {
            return Err(FabricError::BadLmc(self.lmc));
        }
        self.check_links()?;

        let lids = self.assign_lids()?;
        let sm = self
            .nodes
            .iter()
            .position(|n| n.node_type == NodeType::Ca)
            .ok_or(FabricError::NoLocalPort)?;
        let sm_lid = lids[sm];
        let linked = |node: usize, port: u8| {
            self.links.iter().any(|l| {
                (l.a == node && l.a_port == port)
                    || (l.b == node && l.b_port == port)
            })
        };

        let mut nodes = vec![];
        let mut ports = vec![];
        for (i, spec) in self.nodes.iter().enumerate() {
            let lid = lids[i];
            let node_guid = GUID_BASE | ((i as u64 + 1) << 8);
            let is_switch = spec.node_type == NodeType::Switch;
            let port_guid = if is_switch { node_guid } else { node_guid + 1 };

            nodes.push(NodeRecord {
                lid,
                info: NodeInfo {
                    base_version: 1,
                    class_version: 1,
                    node_type: spec.node_type as u8,
                    num_ports: spec.num_ports,
                    sys_guid: node_guid,
                    node_guid,
                    port_guid,
                    partition_cap: if is_switch { 8 } else { 128 },
                    device_id: if is_switch {
                        SWITCH_DEVICE_ID
                    } else {
                        CA_DEVICE_ID
                    },
                    revision: 1,
                    port_num: 1,
                    vendor_id: VENDOR_ID,
                },
                desc: spec.desc.clone(),
            });

            if is_switch {
                let mut info = self.port_info(lid, 0, sm_lid, true);
                info.capability_mask = cap::SWITCH_PORT0;
                ports.push(PortRecord { lid, port_num: 0, info });

                for port_num in 1..=spec.num_ports {
                    let active = linked(i, port_num);
                    let info = self.port_info(0, port_num, sm_lid, active);
                    ports.push(PortRecord { lid, port_num, info });
                }
            } else {
                let mut info = self.port_info(lid, 1, sm_lid, linked(i, 1));
                info.capability_mask = cap::CA;
                if i == sm {
                    info.capability_mask |= cap::IS_SM;
                }
                info.guid_cap = 32;
                info.set_lmc(self.lmc);
                ports.push(PortRecord { lid, port_num: 1, info });
            }
        }

        let mut links = vec![];
        for l in &self.links {
            let (a, b) = (lids[l.a], lids[l.b]);
            links.push(LinkRecord {
                from_lid: a,
                from_port_num: l.a_port,
                to_port_num: l.b_port,
                to_lid: b,
            });
            links.push(LinkRecord {
                from_lid: b,
                from_port_num: l.b_port,
                to_port_num: l.a_port,
                to_lid: a,
            });
        }

        Ok(Fabric {
            subnet_prefix: self.subnet_prefix,
            lmc: self.lmc,
            mtu: self.mtu,
            rate: self.rate,
            pkt_life: self.pkt_life,
            nodes,
            ports,
            links,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn two_cas_and_a_switch(lmc: u8) -> Fabric {
        FabricBuilder::new()
            .lmc(lmc)
            .ca("host a")
            .ca("host b")
            .switch("leaf", 4)
            .link(0, 1, 2, 1)
            .link(1, 1, 2, 2)
            .build()
            .unwrap()
    }

    #[test]
    fn lids_follow_lmc() {
        let f = two_cas_and_a_switch(1);
        let lids: Vec<u16> = f.nodes().iter().map(|n| n.lid).collect();
        assert_eq!(lids, [2, 4, 6]);

        assert_eq!(f.resolve(2), Some(2));
        assert_eq!(f.resolve(3), Some(2));
        assert_eq!(f.resolve(4), Some(4));
        // A switch owns one LID only.
        assert_eq!(f.resolve(7), None);
        assert_eq!(f.resolve(0), None);
        assert_eq!(f.resolve(PERMISSIVE_LID), None);
    }

    #[test]
    fn switch_ports_share_a_lid() {
        let f = two_cas_and_a_switch(0);
        let sw: Vec<&PortRecord> = f.ports_at(3).collect();
        assert_eq!(sw.len(), 5);
        assert!(sw.iter().all(|p| p.info.lmc() == 0));

        let state = |n: usize| sw[n].info.port_state();
        assert_eq!(state(1), PortState::Active as u8);
        assert_eq!(state(2), PortState::Active as u8);
        assert_eq!(state(3), PortState::Down as u8);
    }

    #[test]
    fn links_go_both_ways() {
        let f = two_cas_and_a_switch(0);
        assert_eq!(f.links().len(), 4);
        assert!(f.links().iter().any(|l| {
            l.from_lid == 3 && l.from_port_num == 2 && l.to_lid == 2
        }));
    }

    #[test]
    fn lft_routes_through_links() {
        let f = two_cas_and_a_switch(0);
        let sw = f.switches().next().unwrap().clone();
        let lft = f.lft(&sw);
        assert_eq!(lft.len(), 1);
        let ports = &lft[0].ports;
        assert_eq!(ports[1], 1);
        assert_eq!(ports[2], 2);
        assert_eq!(ports[3], 0);
        assert_eq!(ports[4], LFT_UNREACHABLE);
    }

    #[test]
    fn paths_cover_every_pair() {
        let f = two_cas_and_a_switch(0);
        let paths = f.paths();
        assert_eq!(paths.len(), 9);
        assert!(paths.iter().any(|p| p.slid == 1 && p.dlid == 1));
        assert!(paths.iter().all(|p| p.pkey == FULL_PKEY));
    }

    #[test]
    fn bad_links() {
        let res = FabricBuilder::new().ca("a").link(0, 1, 1, 1).build();
        assert!(matches!(res, Err(FabricError::NoSuchNode(1))));

        let res =
            FabricBuilder::new().ca("a").ca("b").link(0, 2, 1, 1).build();
        assert!(matches!(res, Err(FabricError::NoSuchPort { .. })));

        let res = FabricBuilder::new()
            .ca("a")
            .switch("s", 2)
            .link(0, 1, 1, 1)
            .link(0, 1, 1, 2)
            .build();
        assert!(matches!(res, Err(FabricError::PortInUse { node: 0, .. })));

        let res = FabricBuilder::new().switch("s", 2).build();
        assert!(matches!(res, Err(FabricError::NoLocalPort)));
    }

    #[test]
    fn sl2vl_tables() {
        let f = two_cas_and_a_switch(0);
        let ca = f.sl2vl(1);
        assert_eq!(ca.len(), 1);
        assert_eq!(ca[0].out_port, 1);
        assert_eq!(ca[0].vls[9], 1);

        // 5 in ports times 4 out ports, less the 4 loops.
        assert_eq!(f.sl2vl(3).len(), 16);
    }
}
