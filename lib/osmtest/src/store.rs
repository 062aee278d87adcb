// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The expected subnet.
//!
//! One ordered map holds every expected record under its natural
//! key. Iteration is in key order, which groups records by kind
//! (nodes, then ports, paths, links, groups, services).

use crate::api::LinkRecord;
use crate::api::McMemberRecord;
use crate::api::NodeRecord;
use crate::api::PathRecord;
use crate::api::PortRecord;
use crate::api::ServiceRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;
use thiserror::Error;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum StoreError {
    #[error("duplicate key {0}")]
    DuplicateKey(Key),
}

/// The natural key of a service registration.
#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct ServiceKey {
    pub id: u64,
    pub name: String,
}

/// The natural key of an expected record.
#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub enum Key {
    Node(u16),
    Port { lid: u16, port_num: u8 },
    Path { slid: u16, dlid: u16 },
    Link { from_lid: u16, from_port_num: u8 },
    Mcast(u16),
    Service(ServiceKey),
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(lid) => write!(f, "node lid 0x{lid:X}"),
            Self::Port { lid, port_num } => {
                write!(f, "port lid 0x{lid:X} num 0x{port_num:X}")
            }
            Self::Path { slid, dlid } => {
                write!(f, "path slid 0x{slid:X} dlid 0x{dlid:X}")
            }
            Self::Link { from_lid, from_port_num } => {
                write!(f, "link from 0x{from_lid:X}:0x{from_port_num:X}")
            }
            Self::Mcast(mlid) => write!(f, "group mlid 0x{mlid:X}"),
            Self::Service(k) => {
                write!(f, "service 0x{:016X} {:?}", k.id, k.name)
            }
        }
    }
}

/// Anything that counts how often the SA has returned it.
pub trait Observed {
    fn count(&self) -> u32;

    /// Record one more observation and return the new count.
    fn observe(&mut self) -> u32;

    fn reset(&mut self);
}

/// An expected record, its comparison mask, and its observation
/// count.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Expected<R> {
    pub expected: R,
    pub mask: R,
    pub count: u32,
}

impl<R> Expected<R> {
    pub fn new(expected: R, mask: R) -> Self {
        Self { expected, mask, count: 0 }
    }
}

impl<R> Observed for Expected<R> {
    fn count(&self) -> u32 {
        self.count
    }

    fn observe(&mut self) -> u32 {
        self.count = self.count.saturating_add(1);
        self.count
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Every kind of expected record. Groups and services are checked by
/// behavior, so their masks go unused.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Record {
    Node(Expected<NodeRecord>),
    Port(Expected<PortRecord>),
    Path(Expected<PathRecord>),
    Link(Expected<LinkRecord>),
    Mcast(Expected<McMemberRecord>),
    Service(Expected<ServiceRecord>),
}

impl Record {
    pub fn key(&self) -> Key {
        match self {
            Self::Node(n) => Key::Node(n.expected.lid),
            Self::Port(p) => Key::Port {
                lid: p.expected.lid,
                port_num: p.expected.port_num,
            },
            Self::Path(p) => Key::Path {
                slid: p.expected.slid,
                dlid: p.expected.dlid,
            },
            Self::Link(l) => Key::Link {
                from_lid: l.expected.from_lid,
                from_port_num: l.expected.from_port_num,
            },
            Self::Mcast(m) => Key::Mcast(m.expected.mlid),
            Self::Service(s) => Key::Service(ServiceKey {
                id: s.expected.service_id,
                name: s.expected.service_name.clone(),
            }),
        }
    }

    fn observed(&self) -> &dyn Observed {
        match self {
            Self::Node(r) => r,
            Self::Port(r) => r,
            Self::Path(r) => r,
            Self::Link(r) => r,
            Self::Mcast(r) => r,
            Self::Service(r) => r,
        }
    }

    fn observed_mut(&mut self) -> &mut dyn Observed {
        match self {
            Self::Node(r) => r,
            Self::Port(r) => r,
            Self::Path(r) => r,
            Self::Link(r) => r,
            Self::Mcast(r) => r,
            Self::Service(r) => r,
        }
    }
}

impl Observed for Record {
    fn count(&self) -> u32 {
        self.observed().count()
    }

    fn observe(&mut self) -> u32 {
        self.observed_mut().observe()
    }

    fn reset(&mut self) {
        self.observed_mut().reset()
    }
}

/// The subnet the engine expects the SA to describe.
#[derive(Clone, Debug, Default)]
pub struct ExpectedSubnet {
    records: BTreeMap<Key, Record>,
    node_guids: BTreeMap<u64, u16>,
    service_keys: BTreeMap<[u8; 16], ServiceKey>,
}

macro_rules! kind_iters {
    ($iter:ident, $iter_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $iter(&self) -> impl Iterator<Item = &Expected<$ty>> {
            self.records.values().filter_map(|r| match r {
                Record::$variant(e) => Some(e),
                _ => None,
            })
        }

        pub fn $iter_mut(
            &mut self,
        ) -> impl Iterator<Item = &mut Expected<$ty>> {
            self.records.values_mut().filter_map(|r| match r {
                Record::$variant(e) => Some(e),
                _ => None,
            })
        }
    };
}

impl ExpectedSubnet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record. The natural key must be new.
    pub fn insert(&mut self, rec: Record) -> Result<(), StoreError> {
        let key = rec.key();
        if self.records.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }

        match &rec {
            Record::Node(n) => {
                self.node_guids
                    .insert(n.expected.info.node_guid, n.expected.lid);
            }
            Record::Service(s) => {
                if let Key::Service(sk) = &key {
                    self.service_keys
                        .insert(s.expected.service_key, sk.clone());
                }
            }
            _ => (),
        }

        self.records.insert(key, rec);
        Ok(())
    }

    pub fn find(&self, key: &Key) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn find_mut(&mut self, key: &Key) -> Option<&mut Record> {
        self.records.get_mut(key)
    }

    pub fn remove(&mut self, key: &Key) -> Option<Record> {
        let rec = self.records.remove(key)?;
        match &rec {
            Record::Node(n) => {
                self.node_guids.remove(&n.expected.info.node_guid);
            }
            Record::Service(s) => {
                self.service_keys.remove(&s.expected.service_key);
            }
            _ => (),
        }
        Some(rec)
    }

    /// Visit every record in key order.
    pub fn for_each<F: FnMut(&Key, &Record)>(&self, mut f: F) {
        for (k, r) in &self.records {
            f(k, r);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Record)> {
        self.records.iter()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.node_guids.clear();
        self.service_keys.clear();
    }

    /// Drop every record for which `keep` returns false.
    pub fn retain<F: FnMut(&Key, &Record) -> bool>(&mut self, mut keep: F) {
        let doomed: Vec<Key> = self
            .records
            .iter()
            .filter(|(k, r)| !keep(k, r))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.remove(&key);
        }
    }

    /// Zero every observation count ahead of a validation pass.
    pub fn prepare(&mut self) {
        for r in self.records.values_mut() {
            r.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The LID of the node with `node_guid`.
    pub fn lid_by_node_guid(&self, node_guid: u64) -> Option<u16> {
        self.node_guids.get(&node_guid).copied()
    }

    /// The registration holding `service_key`.
    pub fn service_by_key(&self, service_key: &[u8; 16]) -> Option<&Record> {
        let sk = self.service_keys.get(service_key)?;
        self.records.get(&Key::Service(sk.clone()))
    }

    kind_iters!(nodes, nodes_mut, Node, NodeRecord);
    kind_iters!(ports, ports_mut, Port, PortRecord);
    kind_iters!(paths, paths_mut, Path, PathRecord);
    kind_iters!(links, links_mut, Link, LinkRecord);
    kind_iters!(groups, groups_mut, Mcast, McMemberRecord);
    kind_iters!(services, services_mut, Service, ServiceRecord);

    pub fn num_nodes(&self) -> usize {
        self.nodes().count()
    }

    pub fn num_ports(&self) -> usize {
        self.ports().count()
    }

    pub fn num_paths(&self) -> usize {
        self.paths().count()
    }

    pub fn num_links(&self) -> usize {
        self.links().count()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::NodeInfo;

    fn node(lid: u16, guid: u64) -> Record {
        Record::Node(Expected::new(
            NodeRecord {
                lid,
                info: NodeInfo { node_guid: guid, ..Default::default() },
                desc: String::new(),
            },
            NodeRecord::default(),
        ))
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut db = ExpectedSubnet::new();
        db.insert(node(1, 0x10)).unwrap();
        assert_eq!(
            db.insert(node(1, 0x20)),
            Err(StoreError::DuplicateKey(Key::Node(1)))
        );
        assert_eq!(db.lid_by_node_guid(0x10), Some(1));
        assert_eq!(db.lid_by_node_guid(0x20), None);
    }

    #[test]
    fn key_order_groups_kinds() {
        let mut db = ExpectedSubnet::new();
        db.insert(Record::Port(Expected::new(
            PortRecord { lid: 1, port_num: 1, ..Default::default() },
            PortRecord::default(),
        )))
        .unwrap();
        db.insert(node(9, 0x90)).unwrap();
        db.insert(node(2, 0x20)).unwrap();

        let mut keys = vec![];
        db.for_each(|k, _| keys.push(k.clone()));
        assert_eq!(
            keys,
            vec![
                Key::Node(2),
                Key::Node(9),
                Key::Port { lid: 1, port_num: 1 }
            ]
        );
        assert_eq!(db.num_nodes(), 2);
        assert_eq!(db.num_ports(), 1);
    }

    #[test]
    fn prepare_resets_counts() {
        let mut db = ExpectedSubnet::new();
        db.insert(node(1, 0x10)).unwrap();
        let rec = db.find_mut(&Key::Node(1)).unwrap();
        assert_eq!(rec.observe(), 1);
        assert_eq!(rec.observe(), 2);
        db.prepare();
        assert_eq!(db.find(&Key::Node(1)).unwrap().count(), 0);
    }

    #[test]
    fn retain_by_kind() {
        let mut db = ExpectedSubnet::new();
        db.insert(node(1, 0x10)).unwrap();
        db.insert(node(2, 0x20)).unwrap();
        db.insert(Record::Link(Expected::new(
            LinkRecord { from_lid: 1, from_port_num: 1, ..Default::default() },
            LinkRecord::default(),
        )))
        .unwrap();

        db.retain(|k, _| !matches!(k, Key::Node(_)));
        assert_eq!(db.num_nodes(), 0);
        assert_eq!(db.num_links(), 1);
        assert_eq!(db.lid_by_node_guid(0x20), None);
    }

    #[test]
    fn remove_drops_indices() {
        let mut db = ExpectedSubnet::new();
        db.insert(node(4, 0x44)).unwrap();
        assert!(db.remove(&Key::Node(4)).is_some());
        assert_eq!(db.lid_by_node_guid(0x44), None);
        assert!(db.is_empty());
    }
}
