// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The kind of device a node is.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u8)]
pub enum NodeType {
    Ca = 1,
    Switch = 2,
    Router = 3,
}

impl TryFrom<u8> for NodeType {
    type Error = String;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            1 => Ok(Self::Ca),
            2 => Ok(Self::Switch),
            3 => Ok(Self::Router),
            _ => Err(format!("unknown node type: {val}")),
        }
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ca => "CA",
            Self::Switch => "SWITCH",
            Self::Router => "ROUTER",
        };
        write!(f, "{s}")
    }
}

/// The NodeInfo attribute.
///
/// The same shape doubles as a comparison mask: a bit set in a mask
/// value means the corresponding bit of the field must match.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct NodeInfo {
    pub base_version: u8,
    pub class_version: u8,
    pub node_type: u8,
    pub num_ports: u8,
    pub sys_guid: u64,
    pub node_guid: u64,
    pub port_guid: u64,
    pub partition_cap: u16,
    pub device_id: u16,
    pub revision: u32,
    /// The port through which this NodeInfo was read.
    pub port_num: u8,
    /// 24-bit IEEE OUI.
    pub vendor_id: u32,
}

impl NodeInfo {
    pub fn node_type(&self) -> Option<NodeType> {
        NodeType::try_from(self.node_type).ok()
    }

    pub fn is_switch(&self) -> bool {
        self.node_type == NodeType::Switch as u8
    }
}

/// A NodeRecord, keyed by the LID of the node's base port.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeRecord {
    pub lid: u16,
    pub info: NodeInfo,
    /// The node description string. Informational only.
    pub desc: String,
}
