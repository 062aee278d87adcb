// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! InformInfo subscriptions and the reports they produce.

use crate::api::Gid;
use crate::api::InformInfo;
use crate::api::InformInfoRecord;
use crate::api::Method;
use crate::api::Notice;
use crate::api::trap;
use crate::context::Expect;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::query::Query;
use slog::debug;
use slog::info;
use std::time::Instant;

/// Build an InformInfo for the local port.
fn inform_info(
    gid: Gid,
    trap_num: u16,
    qpn: u32,
    subscribe: bool,
) -> InformInfo {
    InformInfo {
        gid,
        lid_range_begin: 0xFFFF,
        lid_range_end: 0,
        is_generic: true,
        subscribe,
        trap_type: 0xFFFF,
        trap_num,
        qpn,
        resp_time_val: 1,
        producer_type: 0xFF_FFFF,
    }
}

fn set_inform_info(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    trap_num: u16,
    qpn: u32,
    subscribe: bool,
) -> Result<()> {
    let info = inform_info(ctx.local.gid(), trap_num, qpn, subscribe);
    let q = Query::InformInfo { method: Method::Set, info };
    ctx.query(step, &q)?;
    debug!(ctx.log, "inform info set";
        "step" => step,
        "trap" => trap_num,
        "qpn" => qpn,
        "subscribe" => subscribe
    );
    Ok(())
}

fn subscribe(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    trap_num: u16,
    qpn: u32,
) -> Result<()> {
    set_inform_info(ctx, step, trap_num, qpn, true)
}

fn unsubscribe(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    trap_num: u16,
    qpn: u32,
) -> Result<()> {
    set_inform_info(ctx, step, trap_num, qpn, false)
}

/// The InformInfoRecords held for the local port.
fn own_subscriptions(
    ctx: &mut ValidationContext<'_>,
    step: &str,
) -> Result<Vec<InformInfoRecord>> {
    let q = Query::InformInfoRecords {
        method: Method::GetTable,
        subscriber_gid: Some(ctx.local.gid()),
        subscriber_enum: None,
    };
    ctx.query_opt(step, &q)
}

fn all_subscriptions(
    ctx: &mut ValidationContext<'_>,
    step: &str,
) -> Result<Vec<InformInfoRecord>> {
    let q = Query::InformInfoRecords {
        method: Method::GetTable,
        subscriber_gid: None,
        subscriber_enum: None,
    };
    ctx.query_opt(step, &q)
}

fn require_subscribed(
    ctx: &mut ValidationContext<'_>,
    step: &str,
    trap_num: u16,
) -> Result<()> {
    let subs = own_subscriptions(ctx, step)?;
    if subs.iter().any(|s| s.inform_info.trap_num == trap_num) {
        return Ok(());
    }
    Err(Error::violation(
        step,
        format!("no subscription to trap 0x{trap_num:X} listed"),
    ))
}

fn require_unsubscribed(
    ctx: &mut ValidationContext<'_>,
    step: &str,
) -> Result<()> {
    let subs = own_subscriptions(ctx, step)?;
    if subs.is_empty() {
        return Ok(());
    }
    Err(Error::violation(
        step,
        format!("{} subscriptions left behind", subs.len()),
    ))
}

/// Exercise InformInfo and InformInfoRecord. Every subscription made
/// here is removed again.
pub fn inform_info_checks(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let gid = ctx.local.gid();

    let q = Query::InformInfoRecords {
        method: Method::Set,
        subscriber_gid: Some(gid),
        subscriber_enum: None,
    };
    ctx.expect_failure("set inform info record", Expect::Any, &q)?;
    all_subscriptions(ctx, "inform info records")?;

    let info = inform_info(gid, trap::ALL, 1, true);
    let q = Query::InformInfo { method: Method::Get, info };
    ctx.expect_failure("get inform info", Expect::Any, &q)?;

    let info = inform_info(gid, trap::ALL, 1, false);
    let q = Query::InformInfo { method: Method::Set, info };
    ctx.expect_failure("unsubscribe without subscription", Expect::Any, &q)?;

    subscribe(ctx, "subscribe", trap::ALL, 1)?;
    unsubscribe(ctx, "unsubscribe", trap::ALL, 1)?;
    subscribe(ctx, "subscribe again", trap::ALL, 1)?;
    subscribe(ctx, "subscribe qpn 0", trap::ALL, 0)?;

    for subscriber_enum in [Some(1), Some(0), None] {
        let q = Query::InformInfoRecords {
            method: Method::GetTable,
            subscriber_gid: subscriber_enum.map(|_| gid),
            subscriber_enum,
        };
        ctx.query_opt::<InformInfoRecord>("inform info records", &q)?;
    }

    subscribe(ctx, "subscribe trap 0x1234", 0x1234, 1)?;
    require_subscribed(ctx, "subscribed trap 0x1234", 0x1234)?;
    unsubscribe(ctx, "unsubscribe trap 0x1234", 0x1234, 1)?;
    all_subscriptions(ctx, "inform info records")?;
    unsubscribe(ctx, "unsubscribe all traps", trap::ALL, 1)?;
    require_unsubscribed(ctx, "inform info cleanup")?;

    info!(ctx.log, "inform info checks passed");
    Ok(())
}

/// Collect reports until `ctx.opts.wait_time` passes without one.
fn collect_reports(ctx: &mut ValidationContext<'_>) -> Result<Vec<Notice>> {
    let mut notices = vec![];
    let deadline = Instant::now() + ctx.opts.wait_time;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        match ctx.sa.wait_report(deadline - now) {
            Ok(Some(notice)) => {
                debug!(ctx.log, "report";
                    "trap" => notice.trap_num,
                    "issuer" => notice.issuer_lid,
                    "gid" => %notice.gid
                );
                notices.push(notice);
            }
            Ok(None) => break,
            Err(e) => return Err(Error::query("wait for report", e)),
        }
    }

    Ok(notices)
}

/// Subscribe to every trap, take whatever reports arrive, and
/// unsubscribe.
pub fn run_inform_info_flow(ctx: &mut ValidationContext<'_>) -> Result<()> {
    subscribe(ctx, "subscribe all traps", trap::ALL, 1)?;
    require_subscribed(ctx, "subscribed all traps", trap::ALL)?;

    let notices = collect_reports(ctx)?;

    unsubscribe(ctx, "unsubscribe all traps", trap::ALL, 1)?;
    require_unsubscribed(ctx, "event forwarding cleanup")?;

    info!(ctx.log, "event forwarding flow passed";
        "reports" => notices.len()
    );
    Ok(())
}

/// Subscribe to GID in/out of service, and check that every report
/// that arrives is one of the two and names a GID.
pub fn run_trap64_65_flow(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let traps = [trap::GID_IN_SERVICE, trap::GID_OUT_OF_SERVICE];
    for t in traps {
        subscribe(ctx, "subscribe gid service trap", t, 1)?;
        require_subscribed(ctx, "subscribed gid service trap", t)?;
    }

    let notices = collect_reports(ctx)?;
    for n in &notices {
        if !traps.contains(&n.trap_num) {
            return Err(Error::violation(
                "gid service report",
                format!("unsubscribed trap {} reported", n.trap_num),
            ));
        }
        if n.gid.is_zero() {
            return Err(Error::violation(
                "gid service report",
                format!("trap {} names no gid", n.trap_num),
            ));
        }
        info!(ctx.log, "gid service change";
            "trap" => n.trap_num,
            "gid" => %n.gid
        );
    }

    for t in traps {
        unsubscribe(ctx, "unsubscribe gid service trap", t, 1)?;
    }
    require_unsubscribed(ctx, "trap flow cleanup")?;

    info!(ctx.log, "trap flow passed"; "reports" => notices.len());
    Ok(())
}
