// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The service registration flow.
//!
//! Three services are registered: two that never expire and one with
//! a short lease. Each is looked up every way the SA allows, one is
//! deleted, the leased one is left to lapse, and the rest are deleted
//! at the end. Every registration is mirrored in the expected subnet so
//! lookups can be checked against it.

use crate::api::INFINITE_LEASE;
use crate::api::Method;
use crate::api::SERVICE_NAME_MAX;
use crate::api::ServiceCompMask as Comp;
use crate::api::ServiceRecord;
use crate::context::Expect;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::query::Query;
use crate::store::Expected;
use crate::store::Key;
use crate::store::Record;
use crate::store::ServiceKey;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use std::time::Duration;

/// The top half of every service ID this flow registers.
const SERVICE_ID_BASE: u64 = 0x0002_C900_0000_0000;

/// A partition key is valid unless its 15-bit base is zero.
pub fn pkey_is_valid(pkey: u16) -> bool {
    pkey & 0x7FFF != 0
}

/// The component mask for registering `rec`. An invalid pkey is left
/// out of the request.
pub fn register_mask(rec: &ServiceRecord) -> Comp {
    let mut comp = Comp::REGISTER
        | Comp::DATA8
        | Comp::DATA16
        | Comp::DATA32
        | Comp::DATA64;
    if pkey_is_valid(rec.service_pkey) {
        comp |= Comp::PKEY;
    }
    comp
}

fn service_key(rec: &ServiceRecord) -> Key {
    Key::Service(ServiceKey {
        id: rec.service_id,
        name: rec.service_name.clone(),
    })
}

/// Build the `n`th test service for the local port.
fn test_service(
    ctx: &ValidationContext<'_>,
    n: u8,
    lease: u32,
) -> ServiceRecord {
    let mut key = [0u8; 16];
    key[0] = 0x5E;
    key[15] = n;

    let mut rec = ServiceRecord {
        service_id: SERVICE_ID_BASE | u64::from(n),
        service_gid: ctx.local.gid(),
        service_pkey: 0xFFFF,
        service_lease: lease,
        service_key: key,
        service_name: format!("osmtest.srvc.{n}"),
        ..Default::default()
    };
    rec.service_name.truncate(SERVICE_NAME_MAX);

    // Distinct values in every slot, so a swap of any two shows up.
    for (i, v) in rec.data8.iter_mut().enumerate() {
        *v = n.wrapping_mul(16).wrapping_add(i as u8);
    }
    for (i, v) in rec.data16.iter_mut().enumerate() {
        *v = 0x1600 | (u16::from(n) << 4) | i as u16;
    }
    for (i, v) in rec.data32.iter_mut().enumerate() {
        *v = 0x3200_0000 | (u32::from(n) << 8) | i as u32;
    }
    for (i, v) in rec.data64.iter_mut().enumerate() {
        *v = 0x6400_0000_0000_0000 | (u64::from(n) << 8) | i as u64;
    }
    rec
}

/// Deletion is by name from the registering port.
fn delete_request(rec: &ServiceRecord) -> Query {
    Query::service(Method::Delete, Comp::NAME | Comp::GID, rec.clone())
}

struct Run<'c, 'a> {
    ctx: &'c mut ValidationContext<'a>,
    log: Logger,
}

impl Run<'_, '_> {
    fn register(&mut self, rec: &ServiceRecord) -> Result<()> {
        let step = "register service";
        let comp = register_mask(rec);
        let q = Query::service(Method::Set, comp, rec.clone());
        let rsp: Vec<ServiceRecord> = self.ctx.query_as(step, &q)?;
        match rsp.as_slice() {
            [r] if r.service_id == rec.service_id
                && r.service_name == rec.service_name => {}
            _ => {
                return Err(Error::violation(
                    step,
                    format!(
                        "registering {:?} answered {} records",
                        rec.service_name,
                        rsp.len()
                    ),
                ));
            }
        }

        let expected = Expected::new(rec.clone(), ServiceRecord::default());
        self.ctx.subnet.insert(Record::Service(expected))?;
        debug!(self.log, "registered";
            "id" => format!("0x{:016X}", rec.service_id),
            "name" => &rec.service_name,
            "lease" => rec.service_lease
        );
        Ok(())
    }

    fn lookup(
        &mut self,
        step: &str,
        comp: Comp,
        rec: &ServiceRecord,
    ) -> Result<Vec<ServiceRecord>> {
        let q = Query::service(Method::GetTable, comp, rec.clone());
        self.ctx.query_opt(step, &q)
    }

    /// Look `want` up with `comp` and require exactly one match.
    fn find_one(
        &mut self,
        step: &str,
        comp: Comp,
        want: &ServiceRecord,
    ) -> Result<ServiceRecord> {
        let recs = self.lookup(step, comp, want)?;
        let mut found: Vec<ServiceRecord> = recs
            .into_iter()
            .filter(|r| {
                r.service_id == want.service_id
                    && r.service_name == want.service_name
            })
            .collect();

        match found.len() {
            1 => Ok(found.remove(0)),
            n => Err(Error::violation(
                step,
                format!("{:?} found {n} times", want.service_name),
            )),
        }
    }

    fn require_gone(
        &mut self,
        step: &str,
        rec: &ServiceRecord,
    ) -> Result<()> {
        let recs = self.lookup(step, Comp::NAME, rec)?;
        if recs.iter().any(|r| r.service_name == rec.service_name) {
            return Err(Error::violation(
                step,
                format!("{:?} still registered", rec.service_name),
            ));
        }
        Ok(())
    }

    fn delete(&mut self, step: &str, rec: &ServiceRecord) -> Result<()> {
        let q = delete_request(rec);
        self.ctx.query(step, &q)?;
        self.ctx.subnet.remove(&service_key(rec));
        Ok(())
    }

    fn lookups(&mut self, all: &[ServiceRecord]) -> Result<()> {
        for rec in all {
            self.find_one("service by id", Comp::ID, rec)?;
            self.find_one("service by name", Comp::NAME, rec)?;
            let comp = Comp::ID | Comp::NAME;
            self.find_one("service by id and name", comp, rec)?;
            let comp = Comp::NAME | Comp::KEY;
            self.find_one("service by name and key", comp, rec)?;

            let step = "service key";
            match self.ctx.subnet.service_by_key(&rec.service_key) {
                Some(Record::Service(e))
                    if e.expected.service_name == rec.service_name => {}
                _ => {
                    return Err(Error::violation(
                        step,
                        format!(
                            "{:?} not held under its key",
                            rec.service_name
                        ),
                    ));
                }
            }
        }

        let step = "all services";
        let any = ServiceRecord::default();
        let recs = self.lookup(step, Comp::empty(), &any)?;
        for rec in all {
            let n = recs
                .iter()
                .filter(|r| r.service_name == rec.service_name)
                .count();
            if n != 1 {
                return Err(Error::violation(
                    step,
                    format!("{:?} listed {n} times", rec.service_name),
                ));
            }
        }
        Ok(())
    }

    fn data_round_trip(&mut self, want: &ServiceRecord) -> Result<()> {
        let step = "service data";
        let got = self.find_one(step, Comp::NAME, want)?;
        let slots = [
            ("data8", got.data8 == want.data8),
            ("data16", got.data16 == want.data16),
            ("data32", got.data32 == want.data32),
            ("data64", got.data64 == want.data64),
        ];
        for (name, ok) in slots {
            if !ok {
                return Err(Error::violation(
                    step,
                    format!("{name} of {:?} changed", want.service_name),
                ));
            }
        }
        Ok(())
    }
}

/// Run the service flow.
pub fn run(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let log = ctx.log.new(o!("flow" => "service"));
    let lease = ctx.opts.service_lease;
    let wait = Duration::from_secs(u64::from(lease)) + ctx.opts.wait_time;

    let forever = test_service(ctx, 1, INFINITE_LEASE);
    let with_data = test_service(ctx, 2, INFINITE_LEASE);
    let leased = test_service(ctx, 3, lease);
    let all = [forever.clone(), with_data.clone(), leased.clone()];

    let mut run = Run { ctx, log };
    for rec in &all {
        run.register(rec)?;
    }
    run.lookups(&all)?;
    run.data_round_trip(&with_data)?;

    run.delete("delete service", &forever)?;
    let q = delete_request(&forever);
    // Deleting an absent registration has no required failure kind.
    run.ctx.expect_failure("delete service twice", Expect::Any, &q)?;
    run.require_gone("deleted service", &forever)?;

    info!(run.log, "waiting for lease to lapse";
        "secs" => wait.as_secs_f64()
    );
    std::thread::sleep(wait);
    run.require_gone("leased service", &leased)?;
    run.ctx.subnet.remove(&service_key(&leased));
    run.find_one("unleased service", Comp::NAME, &with_data)?;

    run.delete("delete remaining service", &with_data)?;
    run.require_gone("service cleanup", &with_data)?;

    info!(run.log, "service flow passed");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pkey_validity() {
        assert!(pkey_is_valid(0xFFFF));
        assert!(pkey_is_valid(0x7FFF));
        assert!(pkey_is_valid(0x0001));
        assert!(!pkey_is_valid(0x0000));
        assert!(!pkey_is_valid(0x8000));
    }

    #[test]
    fn invalid_pkey_leaves_mask_bit_clear() {
        let mut rec =
            ServiceRecord { service_pkey: 0xFFFF, ..Default::default() };
        assert!(register_mask(&rec).contains(Comp::PKEY | Comp::REGISTER));

        rec.service_pkey = 0x8000;
        let comp = register_mask(&rec);
        assert!(!comp.contains(Comp::PKEY));
        assert!(comp.contains(Comp::REGISTER));
    }
}
