// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The boundary between the engine and whatever carries its requests
//! to the SA.
//!
//! A [`SaClient`] takes one typed [`Query`] at a time and blocks until
//! it has a response, a remote error, or a timeout. Retries and
//! timeouts are the client's business; the engine only passes the
//! values along in [`QueryOpts`].

use crate::api::AttrId;
use crate::api::DEFAULT_SM_KEY;
use crate::api::Gid;
use crate::api::InformInfo;
use crate::api::MadStatus;
use crate::api::McCompMask;
use crate::api::McMemberRecord;
use crate::api::Method;
use crate::api::Notice;
use crate::api::SaRecord;
use crate::api::ServiceCompMask;
use crate::api::ServiceRecord;
use crate::api::SmInfoFilter;
use std::fmt;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Per-request transport parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueryOpts {
    pub timeout_ms: u32,
    pub retry_count: u32,
    /// The SM_Key sent with the request. Zero means untrusted.
    pub sm_key: u64,
}

impl Default for QueryOpts {
    fn default() -> Self {
        Self { timeout_ms: 200, retry_count: 3, sm_key: 0 }
    }
}

impl QueryOpts {
    /// The same options, but trusted with `sm_key`.
    pub fn with_sm_key(self, sm_key: u64) -> Self {
        Self { sm_key, ..self }
    }

    pub fn trusted(self) -> Self {
        self.with_sm_key(DEFAULT_SM_KEY)
    }
}

/// How to select NodeRecords.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeFilter {
    All,
    Lid(u16),
    NodeGuid(u64),
}

/// How to select PathRecords.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathFilter {
    All,
    Lids { slid: u16, dlid: u16 },
    /// Port GUIDs under the default subnet prefix.
    Guids { sguid: u64, dguid: u64 },
    Gids { sgid: Gid, dgid: Gid },
}

/// One SA request. Most record queries are always GetTable; the
/// remaining attributes name their method explicitly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Query {
    ClassPortInfo,
    Nodes(NodeFilter),
    Ports { lid: Option<u16>, port_num: Option<u8> },
    Paths(PathFilter),
    Links { from_lid: Option<u16>, to_lid: Option<u16> },
    GuidInfo { lid: Option<u16> },
    PKeyTable { lid: Option<u16> },
    SwitchInfo { lid: Option<u16> },
    Lft { lid: Option<u16> },
    Mft { lid: Option<u16> },
    SlVl {
        lid: Option<u16>,
        in_port: Option<u8>,
        out_port: Option<u8>,
    },
    VlArb {
        lid: Option<u16>,
        port_num: Option<u8>,
        block: Option<u8>,
    },
    SmInfo { method: Method, filter: SmInfoFilter },
    InformInfo { method: Method, info: InformInfo },
    InformInfoRecords {
        method: Method,
        subscriber_gid: Option<Gid>,
        subscriber_enum: Option<u16>,
    },
    McMember {
        method: Method,
        comp_mask: McCompMask,
        rec: McMemberRecord,
    },
    Service {
        method: Method,
        comp_mask: ServiceCompMask,
        rec: ServiceRecord,
    },
}

impl Query {
    pub fn method(&self) -> Method {
        match self {
            Self::ClassPortInfo => Method::Get,

            Self::SmInfo { method, .. }
            | Self::InformInfo { method, .. }
            | Self::InformInfoRecords { method, .. }
            | Self::McMember { method, .. }
            | Self::Service { method, .. } => *method,

            _ => Method::GetTable,
        }
    }

    pub fn attr(&self) -> AttrId {
        match self {
            Self::ClassPortInfo => AttrId::ClassPortInfo,
            Self::Nodes(_) => AttrId::NodeRecord,
            Self::Ports { .. } => AttrId::PortInfoRecord,
            Self::Paths(_) => AttrId::PathRecord,
            Self::Links { .. } => AttrId::LinkRecord,
            Self::GuidInfo { .. } => AttrId::GuidInfoRecord,
            Self::PKeyTable { .. } => AttrId::PKeyTableRecord,
            Self::SwitchInfo { .. } => AttrId::SwitchInfoRecord,
            Self::Lft { .. } => AttrId::LftRecord,
            Self::Mft { .. } => AttrId::MftRecord,
            Self::SlVl { .. } => AttrId::SlVlRecord,
            Self::VlArb { .. } => AttrId::VlArbRecord,
            Self::SmInfo { .. } => AttrId::SmInfoRecord,
            Self::InformInfo { .. } => AttrId::InformInfo,
            Self::InformInfoRecords { .. } => AttrId::InformInfoRecord,
            Self::McMember { .. } => AttrId::McMemberRecord,
            Self::Service { .. } => AttrId::ServiceRecord,
        }
    }

    /// Build an MCMemberRecord request.
    pub fn mcmember(
        method: Method,
        comp_mask: McCompMask,
        rec: McMemberRecord,
    ) -> Self {
        Self::McMember { method, comp_mask, rec }
    }

    /// Build a ServiceRecord request.
    pub fn service(
        method: Method,
        comp_mask: ServiceCompMask,
        rec: ServiceRecord,
    ) -> Self {
        Self::Service { method, comp_mask, rec }
    }
}

fn opt_lid(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    v: Option<u16>,
) -> fmt::Result {
    match v {
        Some(lid) => write!(f, " {name}=0x{lid:X}"),
        None => Ok(()),
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method(), self.attr())?;

        match self {
            Self::Nodes(NodeFilter::Lid(lid)) => write!(f, " lid=0x{lid:X}"),
            Self::Nodes(NodeFilter::NodeGuid(guid)) => {
                write!(f, " node_guid=0x{guid:016X}")
            }
            Self::Ports { lid, port_num } => {
                opt_lid(f, "lid", *lid)?;
                match port_num {
                    Some(n) => write!(f, " port_num=0x{n:X}"),
                    None => Ok(()),
                }
            }
            Self::Paths(PathFilter::Lids { slid, dlid }) => {
                write!(f, " slid=0x{slid:X} dlid=0x{dlid:X}")
            }
            Self::Paths(PathFilter::Guids { sguid, dguid }) => {
                write!(f, " sguid=0x{sguid:016X} dguid=0x{dguid:016X}")
            }
            Self::Paths(PathFilter::Gids { sgid, dgid }) => {
                write!(f, " sgid={sgid} dgid={dgid}")
            }
            Self::Links { from_lid, to_lid } => {
                opt_lid(f, "from_lid", *from_lid)?;
                opt_lid(f, "to_lid", *to_lid)
            }
            Self::GuidInfo { lid }
            | Self::PKeyTable { lid }
            | Self::SwitchInfo { lid }
            | Self::Lft { lid }
            | Self::Mft { lid }
            | Self::SlVl { lid, .. }
            | Self::VlArb { lid, .. } => opt_lid(f, "lid", *lid),
            Self::SmInfo { filter, .. } => write!(f, " {filter:?}"),
            Self::McMember { comp_mask, rec, .. } => write!(
                f,
                " mgid={} port_gid={} join_state=0x{:02X} comp_mask=0x{:X}",
                rec.mgid,
                rec.port_gid,
                rec.scope_state,
                comp_mask.bits()
            ),
            Self::Service { comp_mask, rec, .. } => write!(
                f,
                " id=0x{:016X} name={:?} comp_mask=0x{:X}",
                rec.service_id,
                rec.service_name,
                comp_mask.bits()
            ),
            _ => Ok(()),
        }
    }
}

/// The outcome of a request that did not succeed.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum QueryError {
    /// The SA answered with a non-zero MAD status.
    #[error("remote error: {0}")]
    Remote(MadStatus),

    #[error("request timed out")]
    Timeout,

    /// The transport itself failed.
    #[error("query failed: {0}")]
    Failed(String),

    #[error("not found")]
    NotFound,

    #[error("insufficient resources")]
    InsufficientResources,
}

impl QueryError {
    /// The MAD status, for remote errors.
    pub fn status(&self) -> Option<MadStatus> {
        match self {
            Self::Remote(s) => Some(*s),
            _ => None,
        }
    }

    /// Return true if this is a remote error carrying `code`.
    pub fn is_status(&self, code: MadStatus) -> bool {
        self.status().is_some_and(|s| s.is(code))
    }

    /// Return true if the SA said there was nothing to return.
    pub fn is_no_records(&self) -> bool {
        self.is_status(MadStatus::NO_RECORDS) || *self == Self::NotFound
    }

    /// Return true if the SA does not implement the request's method
    /// for this attribute.
    pub fn is_unsupported(&self) -> bool {
        self.is_status(MadStatus::UNSUP_METHOD)
            || self.is_status(MadStatus::UNSUP_METHOD_ATTR)
    }
}

/// The port the engine is bound to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LocalPort {
    pub lid: u16,
    pub port_num: u8,
    pub port_guid: u64,
    pub subnet_prefix: u64,
    /// The LID of the master SM.
    pub sm_lid: u16,
}

impl LocalPort {
    pub fn gid(&self) -> Gid {
        Gid::from_parts(self.subnet_prefix, self.port_guid)
    }
}

/// Something able to carry requests to an SA.
pub trait SaClient {
    /// Issue `query` and block for its outcome.
    fn query(
        &mut self,
        query: &Query,
        opts: &QueryOpts,
    ) -> Result<Vec<SaRecord>, QueryError>;

    /// Wait up to `timeout` for a report (a forwarded trap) addressed
    /// to the local port.
    fn wait_report(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notice>, QueryError> {
        let _ = timeout;
        Ok(None)
    }

    /// The port this client sends from.
    fn local_port(&self) -> LocalPort;
}

impl<T: SaClient + ?Sized> SaClient for &mut T {
    fn query(
        &mut self,
        query: &Query,
        opts: &QueryOpts,
    ) -> Result<Vec<SaRecord>, QueryError> {
        (**self).query(query, opts)
    }

    fn wait_report(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Notice>, QueryError> {
        (**self).wait_report(timeout)
    }

    fn local_port(&self) -> LocalPort {
        (**self).local_port()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_classes() {
        let e = QueryError::Remote(MadStatus::NO_RECORDS);
        assert!(e.is_no_records());
        assert!(!e.is_unsupported());

        let busy_unsup =
            QueryError::Remote(MadStatus::from_raw(0x0001 | 0x000C));
        assert!(busy_unsup.is_unsupported());
        assert_eq!(
            busy_unsup.to_string(),
            "remote error: BUSY | UNSUP_METHOD_ATTR"
        );
        assert!(!QueryError::Timeout.is_no_records());
    }

    #[test]
    fn query_display() {
        let q = Query::Ports { lid: Some(0x12), port_num: Some(1) };
        assert_eq!(
            q.to_string(),
            "SubnAdmGetTable PortInfoRecord lid=0x12 port_num=0x1"
        );
        assert_eq!(Query::ClassPortInfo.method(), Method::Get);
    }
}
