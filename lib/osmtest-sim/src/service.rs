// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Service registrations and their leases.

use osmtest::api::Gid;
use osmtest::api::MadStatus;
use osmtest::api::SERVICE_NAME_MAX;
use osmtest::api::ServiceCompMask as Comp;
use osmtest::api::ServiceRecord;
use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

type Result<T> = std::result::Result<T, MadStatus>;

#[derive(Clone, Debug)]
struct Registration {
    rec: ServiceRecord,
    /// When the lease runs out. `None` for an infinite lease.
    expires: Option<Instant>,
}

/// Registrations by service ID, GID and name. Registering the same
/// three again replaces the old record.
#[derive(Clone, Debug, Default)]
pub struct Services {
    regs: BTreeMap<(u64, Gid, String), Registration>,
}

fn matches(comp: Comp, want: &ServiceRecord, have: &ServiceRecord) -> bool {
    let checks = [
        (Comp::ID, want.service_id == have.service_id),
        (Comp::GID, want.service_gid == have.service_gid),
        (Comp::PKEY, want.service_pkey == have.service_pkey),
        (Comp::KEY, want.service_key == have.service_key),
        (Comp::NAME, want.service_name == have.service_name),
        (Comp::DATA8, want.data8 == have.data8),
        (Comp::DATA16, want.data16 == have.data16),
        (Comp::DATA32, want.data32 == have.data32),
        (Comp::DATA64, want.data64 == have.data64),
    ];
    checks.iter().all(|(bit, ok)| !comp.contains(*bit) || *ok)
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Drop every registration whose lease ran out before `now`.
    pub fn expire(&mut self, now: Instant) {
        self.regs.retain(|_, r| r.expires.is_none_or(|t| t > now));
    }

    pub fn register(
        &mut self,
        comp: Comp,
        rec: &ServiceRecord,
        now: Instant,
    ) -> Result<ServiceRecord> {
        if !comp.contains(Comp::REGISTER) {
            return Err(MadStatus::INSUF_COMPS);
        }
        if rec.service_name.len() > SERVICE_NAME_MAX {
            return Err(MadStatus::REQ_INVALID);
        }

        let mut rec = rec.clone();
        if !comp.contains(Comp::PKEY) {
            rec.service_pkey = 0xFFFF;
        }
        let expires = (!rec.is_infinite()).then(|| {
            now + Duration::from_secs(u64::from(rec.service_lease))
        });

        let key =
            (rec.service_id, rec.service_gid, rec.service_name.clone());
        self.regs.insert(key, Registration { rec: rec.clone(), expires });
        Ok(rec)
    }

    /// Every registration `comp` selects.
    pub fn query(&self, comp: Comp, rec: &ServiceRecord) -> Vec<ServiceRecord> {
        self.regs
            .values()
            .filter(|r| matches(comp, rec, &r.rec))
            .map(|r| r.rec.clone())
            .collect()
    }

    /// Remove and return every registration `comp` selects. Deleting
    /// nothing is an invalid request.
    pub fn delete(
        &mut self,
        comp: Comp,
        rec: &ServiceRecord,
    ) -> Result<Vec<ServiceRecord>> {
        let mut gone = vec![];
        self.regs.retain(|_, r| {
            if matches(comp, rec, &r.rec) {
                gone.push(r.rec.clone());
                false
            } else {
                true
            }
        });

        if gone.is_empty() {
            return Err(MadStatus::REQ_INVALID);
        }
        Ok(gone)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use osmtest::api::INFINITE_LEASE;

    fn svc(id: u64, name: &str, lease: u32) -> ServiceRecord {
        ServiceRecord {
            service_id: id,
            service_lease: lease,
            service_name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn register_replaces() {
        let mut s = Services::new();
        let now = Instant::now();
        let mut a = svc(1, "a", INFINITE_LEASE);
        s.register(Comp::REGISTER, &a, now).unwrap();
        a.data8[0] = 7;
        let rsp = s.register(Comp::REGISTER | Comp::DATA8, &a, now).unwrap();
        assert_eq!(rsp.service_pkey, 0xFFFF);
        assert_eq!(s.len(), 1);
        assert_eq!(s.query(Comp::ID, &a)[0].data8[0], 7);
    }

    #[test]
    fn register_needs_components() {
        let mut s = Services::new();
        let a = svc(1, "a", INFINITE_LEASE);
        let res = s.register(Comp::ID | Comp::NAME, &a, Instant::now());
        assert_eq!(res, Err(MadStatus::INSUF_COMPS));
    }

    #[test]
    fn leases_lapse() {
        let mut s = Services::new();
        let now = Instant::now();
        s.register(Comp::REGISTER, &svc(1, "forever", INFINITE_LEASE), now)
            .unwrap();
        s.register(Comp::REGISTER, &svc(2, "brief", 5), now).unwrap();

        s.expire(now + Duration::from_secs(4));
        assert_eq!(s.len(), 2);
        s.expire(now + Duration::from_secs(6));
        let left = s.query(Comp::empty(), &ServiceRecord::default());
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].service_name, "forever");
    }

    #[test]
    fn delete_by_name() {
        let mut s = Services::new();
        let now = Instant::now();
        let a = svc(1, "a", INFINITE_LEASE);
        s.register(Comp::REGISTER, &a, now).unwrap();
        s.register(Comp::REGISTER, &svc(2, "b", INFINITE_LEASE), now)
            .unwrap();

        let gone = s.delete(Comp::NAME | Comp::GID, &a).unwrap();
        assert_eq!(gone.len(), 1);
        assert_eq!(
            s.delete(Comp::NAME | Comp::GID, &a),
            Err(MadStatus::REQ_INVALID)
        );
        assert_eq!(s.len(), 1);
    }
}
