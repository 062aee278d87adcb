// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! One-shot probes of SA-wide behavior.

use crate::api::ClassPortInfo;
use crate::context::Expect;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::query::Query;
use slog::info;

/// The MAD base version every SA speaks.
pub const MAD_BASE_VERSION: u8 = 1;

/// The SA class version this engine understands.
pub const SA_CLASS_VERSION: u8 = 2;

/// An SM_Key no SM is configured with.
const BOGUS_SM_KEY: u64 = 9999;

/// Read the SA's ClassPortInfo and check its versions.
pub fn class_port_info(
    ctx: &mut ValidationContext<'_>,
) -> Result<ClassPortInfo> {
    let step = "class port info";
    let recs: Vec<ClassPortInfo> =
        ctx.query_as(step, &Query::ClassPortInfo)?;
    let cpi = match recs.as_slice() {
        [one] => *one,
        _ => {
            return Err(Error::violation(
                step,
                format!("expected one record, got {}", recs.len()),
            ));
        }
    };

    if cpi.base_ver != MAD_BASE_VERSION || cpi.class_ver != SA_CLASS_VERSION
    {
        return Err(Error::violation(
            step,
            format!(
                "unsupported versions base {} class {}",
                cpi.base_ver, cpi.class_ver
            ),
        ));
    }

    info!(ctx.log, "sa class port info";
        "base_ver" => cpi.base_ver,
        "class_ver" => cpi.class_ver,
        "cap_mask" => format!("0x{:04X}", cpi.cap_mask),
        "cap_mask2" => format!("0x{:07X}", cpi.cap_mask2()),
        "resp_time_value" => cpi.resp_time_value()
    );
    Ok(cpi)
}

/// A request carrying the wrong SM_Key must be dropped silently, so
/// the only acceptable outcome is a timeout.
pub fn wrong_sm_key_ignored(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let q = Query::Ports { lid: Some(ctx.local.sm_lid), port_num: Some(1) };
    let opts = ctx.query_opts().with_sm_key(BOGUS_SM_KEY);
    ctx.expect_failure_with("wrong sm_key", Expect::Timeout, &q, &opts)?;
    info!(ctx.log, "request with wrong sm_key was ignored");
    Ok(())
}
