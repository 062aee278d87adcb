// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Faults injected into the records the SA answers with, so the
//! engine's checks can be seen to fire.

use osmtest::api::SaRecord;
use osmtest::store::Key;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fault {
    /// Return the record twice.
    Duplicate,
    /// Leave the record out.
    Drop,
    /// Change a field the engine compares.
    Corrupt,
}

/// The key a record would be filed under in the expected subnet.
/// Only nodes, ports, paths and links can be faulted.
pub fn record_key(rec: &SaRecord) -> Option<Key> {
    match rec {
        SaRecord::Node(n) => Some(Key::Node(n.lid)),
        SaRecord::Port(p) => {
            Some(Key::Port { lid: p.lid, port_num: p.port_num })
        }
        SaRecord::Path(p) => Some(Key::Path { slid: p.slid, dlid: p.dlid }),
        SaRecord::Link(l) => Some(Key::Link {
            from_lid: l.from_lid,
            from_port_num: l.from_port_num,
        }),
        _ => None,
    }
}

fn corrupt(rec: &mut SaRecord) {
    match rec {
        SaRecord::Node(n) => n.info.device_id ^= 0xFFFF,
        SaRecord::Port(p) => p.info.capability_mask ^= 1 << 3,
        SaRecord::Path(p) => p.pkey ^= 0x7FFF,
        SaRecord::Link(l) => l.to_port_num ^= 0x1,
        _ => (),
    }
}

/// The faults in effect, by record key.
#[derive(Clone, Debug, Default)]
pub struct Faults {
    faults: BTreeMap<Key, Fault>,
}

impl Faults {
    pub fn inject(&mut self, key: Key, fault: Fault) {
        self.faults.insert(key, fault);
    }

    pub fn clear(&mut self) {
        self.faults.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    /// Apply every fault to a response.
    pub fn apply(&self, recs: Vec<SaRecord>) -> Vec<SaRecord> {
        if self.faults.is_empty() {
            return recs;
        }

        let mut out = Vec::with_capacity(recs.len());
        for mut rec in recs {
            let fault = record_key(&rec).and_then(|k| self.faults.get(&k));
            match fault {
                None => out.push(rec),
                Some(Fault::Drop) => (),
                Some(Fault::Duplicate) => {
                    out.push(rec.clone());
                    out.push(rec);
                }
                Some(Fault::Corrupt) => {
                    corrupt(&mut rec);
                    out.push(rec);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use osmtest::api::LinkRecord;
    use osmtest::api::NodeRecord;

    fn node(lid: u16) -> SaRecord {
        SaRecord::Node(NodeRecord { lid, ..Default::default() })
    }

    #[test]
    fn faults_by_key() {
        let mut f = Faults::default();
        f.inject(Key::Node(1), Fault::Duplicate);
        f.inject(Key::Node(2), Fault::Drop);
        f.inject(Key::Node(3), Fault::Corrupt);

        let out = f.apply(vec![node(1), node(2), node(3), node(4)]);
        let lids: Vec<u16> = out
            .iter()
            .map(|r| match r {
                SaRecord::Node(n) => n.lid,
                _ => 0,
            })
            .collect();
        assert_eq!(lids, [1, 1, 3, 4]);
        assert!(matches!(&out[2], SaRecord::Node(n) if n.info.device_id != 0));
    }

    #[test]
    fn unkeyed_records_pass() {
        let mut f = Faults::default();
        f.inject(Key::Mcast(0xC000), Fault::Drop);
        let link = SaRecord::Link(LinkRecord::default());
        assert_eq!(f.apply(vec![link.clone()]), vec![link]);
        f.clear();
        assert!(f.is_empty());
    }
}
