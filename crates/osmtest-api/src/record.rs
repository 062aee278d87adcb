// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::attr::ClassPortInfo;
use crate::attr::GuidInfoRecord;
use crate::attr::InformInfo;
use crate::attr::InformInfoRecord;
use crate::attr::LftRecord;
use crate::attr::MftRecord;
use crate::attr::PKeyTableRecord;
use crate::attr::SlVlRecord;
use crate::attr::SmInfoRecord;
use crate::attr::SwitchInfoRecord;
use crate::attr::VlArbRecord;
use crate::mcast::McMemberRecord;
use crate::node::NodeRecord;
use crate::path::PathRecord;
use crate::port::LinkRecord;
use crate::port::PortRecord;
use crate::service::ServiceRecord;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The SA attribute a query or response refers to.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub enum AttrId {
    ClassPortInfo,
    Notice,
    InformInfo,
    NodeRecord,
    PortInfoRecord,
    SlVlRecord,
    SwitchInfoRecord,
    LftRecord,
    MftRecord,
    SmInfoRecord,
    InformInfoRecord,
    LinkRecord,
    GuidInfoRecord,
    ServiceRecord,
    PKeyTableRecord,
    PathRecord,
    VlArbRecord,
    McMemberRecord,
}

impl AttrId {
    /// The attribute id as carried in a MAD header.
    pub const fn wire_id(&self) -> u16 {
        match self {
            Self::ClassPortInfo => 0x0001,
            Self::Notice => 0x0002,
            Self::InformInfo => 0x0003,
            Self::NodeRecord => 0x0011,
            Self::PortInfoRecord => 0x0012,
            Self::SlVlRecord => 0x0013,
            Self::SwitchInfoRecord => 0x0014,
            Self::LftRecord => 0x0015,
            Self::MftRecord => 0x0017,
            Self::SmInfoRecord => 0x0018,
            Self::InformInfoRecord => 0x00F3,
            Self::LinkRecord => 0x0020,
            Self::GuidInfoRecord => 0x0030,
            Self::ServiceRecord => 0x0031,
            Self::PKeyTableRecord => 0x0033,
            Self::PathRecord => 0x0035,
            Self::VlArbRecord => 0x0036,
            Self::McMemberRecord => 0x0038,
        }
    }
}

impl Display for AttrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClassPortInfo => "ClassPortInfo",
            Self::Notice => "Notice",
            Self::InformInfo => "InformInfo",
            Self::NodeRecord => "NodeRecord",
            Self::PortInfoRecord => "PortInfoRecord",
            Self::SlVlRecord => "SLtoVLMappingTableRecord",
            Self::SwitchInfoRecord => "SwitchInfoRecord",
            Self::LftRecord => "LinearForwardingTableRecord",
            Self::MftRecord => "MulticastForwardingTableRecord",
            Self::SmInfoRecord => "SMInfoRecord",
            Self::InformInfoRecord => "InformInfoRecord",
            Self::LinkRecord => "LinkRecord",
            Self::GuidInfoRecord => "GUIDInfoRecord",
            Self::ServiceRecord => "ServiceRecord",
            Self::PKeyTableRecord => "P_KeyTableRecord",
            Self::PathRecord => "PathRecord",
            Self::VlArbRecord => "VLArbitrationTableRecord",
            Self::McMemberRecord => "MCMemberRecord",
        };

        write!(f, "{s}")
    }
}

/// A single record returned by the SA.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SaRecord {
    ClassPortInfo(ClassPortInfo),
    InformInfo(InformInfo),
    Node(NodeRecord),
    Port(PortRecord),
    SlVl(SlVlRecord),
    SwitchInfo(SwitchInfoRecord),
    Lft(LftRecord),
    Mft(MftRecord),
    SmInfo(SmInfoRecord),
    InformInfoRec(InformInfoRecord),
    Link(LinkRecord),
    GuidInfo(GuidInfoRecord),
    Service(ServiceRecord),
    PKeyTable(PKeyTableRecord),
    Path(PathRecord),
    VlArb(VlArbRecord),
    McMember(McMemberRecord),
}

impl SaRecord {
    pub fn attr(&self) -> AttrId {
        match self {
            Self::ClassPortInfo(_) => AttrId::ClassPortInfo,
            Self::InformInfo(_) => AttrId::InformInfo,
            Self::Node(_) => AttrId::NodeRecord,
            Self::Port(_) => AttrId::PortInfoRecord,
            Self::SlVl(_) => AttrId::SlVlRecord,
            Self::SwitchInfo(_) => AttrId::SwitchInfoRecord,
            Self::Lft(_) => AttrId::LftRecord,
            Self::Mft(_) => AttrId::MftRecord,
            Self::SmInfo(_) => AttrId::SmInfoRecord,
            Self::InformInfoRec(_) => AttrId::InformInfoRecord,
            Self::Link(_) => AttrId::LinkRecord,
            Self::GuidInfo(_) => AttrId::GuidInfoRecord,
            Self::Service(_) => AttrId::ServiceRecord,
            Self::PKeyTable(_) => AttrId::PKeyTableRecord,
            Self::Path(_) => AttrId::PathRecord,
            Self::VlArb(_) => AttrId::VlArbRecord,
            Self::McMember(_) => AttrId::McMemberRecord,
        }
    }
}

/// Typed extraction of a record out of an [`SaRecord`].
///
/// A response of the wrong attribute yields `None`; callers treat that
/// as a malformed response.
pub trait FromSaRecord: Sized {
    const ATTR: AttrId;

    fn from_sa_record(rec: SaRecord) -> Option<Self>;
}

macro_rules! from_sa_record {
    ($ty:ty, $variant:ident, $attr:ident) => {
        impl FromSaRecord for $ty {
            const ATTR: AttrId = AttrId::$attr;

            fn from_sa_record(rec: SaRecord) -> Option<Self> {
                match rec {
                    SaRecord::$variant(r) => Some(r),
                    _ => None,
                }
            }
        }

        impl From<$ty> for SaRecord {
            fn from(r: $ty) -> Self {
                SaRecord::$variant(r)
            }
        }
    };
}

from_sa_record!(ClassPortInfo, ClassPortInfo, ClassPortInfo);
from_sa_record!(InformInfo, InformInfo, InformInfo);
from_sa_record!(NodeRecord, Node, NodeRecord);
from_sa_record!(PortRecord, Port, PortInfoRecord);
from_sa_record!(SlVlRecord, SlVl, SlVlRecord);
from_sa_record!(SwitchInfoRecord, SwitchInfo, SwitchInfoRecord);
from_sa_record!(LftRecord, Lft, LftRecord);
from_sa_record!(MftRecord, Mft, MftRecord);
from_sa_record!(SmInfoRecord, SmInfo, SmInfoRecord);
from_sa_record!(InformInfoRecord, InformInfoRec, InformInfoRecord);
from_sa_record!(LinkRecord, Link, LinkRecord);
from_sa_record!(GuidInfoRecord, GuidInfo, GuidInfoRecord);
from_sa_record!(ServiceRecord, Service, ServiceRecord);
from_sa_record!(PKeyTableRecord, PKeyTable, PKeyTableRecord);
from_sa_record!(PathRecord, Path, PathRecord);
from_sa_record!(VlArbRecord, VlArb, VlArbRecord);
from_sa_record!(McMemberRecord, McMember, McMemberRecord);

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::NodeInfo;

    #[test]
    fn typed_extraction() {
        let rec = SaRecord::from(NodeRecord {
            lid: 3,
            info: NodeInfo::default(),
            desc: "hca-1".into(),
        });
        assert_eq!(rec.attr(), AttrId::NodeRecord);
        assert!(PortRecord::from_sa_record(rec.clone()).is_none());
        let node = NodeRecord::from_sa_record(rec).unwrap();
        assert_eq!(node.lid, 3);
        assert_eq!(AttrId::McMemberRecord.wire_id(), 0x0038);
    }
}
