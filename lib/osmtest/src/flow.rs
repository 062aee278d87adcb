// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The run selector.

use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Result;
use crate::explore;
use crate::inventory;
use crate::mcast;
use crate::probe;
use crate::qos;
use crate::service;
use crate::stress;
use crate::trap;
use crate::validate;
use serde::Serialize;
use slog::info;
use slog::warn;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// Which sequence of checks to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum Flow {
    /// Validate, then the SM_Key, service, event forwarding and
    /// multicast flows.
    All,
    CreateInventory,
    ValidateInventory,
    Service,
    EventForwarding,
    Stress,
    Multicast,
    Qos,
    Trap,
}

impl FromStr for Flow {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "all" => Ok(Self::All),
            "c" | "create" | "create-inventory" => Ok(Self::CreateInventory),
            "v" | "validate" | "validate-inventory" => {
                Ok(Self::ValidateInventory)
            }
            "s" | "service" => Ok(Self::Service),
            "e" | "event-forwarding" => Ok(Self::EventForwarding),
            "f" | "stress" => Ok(Self::Stress),
            "m" | "multicast" => Ok(Self::Multicast),
            "q" | "qos" => Ok(Self::Qos),
            "t" | "trap" => Ok(Self::Trap),
            _ => Err(format!("bad flow: {s}")),
        }
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::CreateInventory => "create-inventory",
            Self::ValidateInventory => "validate-inventory",
            Self::Service => "service",
            Self::EventForwarding => "event-forwarding",
            Self::Stress => "stress",
            Self::Multicast => "multicast",
            Self::Qos => "qos",
            Self::Trap => "trap",
        };
        write!(f, "{s}")
    }
}

/// Run the flow selected in the context's options. The first failing
/// step aborts the run.
pub fn run(ctx: &mut ValidationContext<'_>) -> Result<()> {
    let flow = ctx.opts.flow;
    info!(ctx.log, "starting run"; "flow" => %flow);

    probe::class_port_info(ctx)?;

    match flow {
        Flow::CreateInventory => return create_inventory(ctx),
        Flow::Stress => return stress::run(ctx),
        _ => (),
    }

    if matches!(flow, Flow::All | Flow::ValidateInventory) {
        explore::create_db(ctx)?;
        validate::validate_against_db(ctx)?;
    }

    if flow == Flow::All {
        probe::wrong_sm_key_ignored(ctx)?;
    }

    if matches!(flow, Flow::All | Flow::Service) {
        service::run(ctx)?;
    }

    if matches!(flow, Flow::All | Flow::EventForwarding) {
        trap::run_inform_info_flow(ctx)?;
    }

    if flow == Flow::Qos {
        explore::create_db(ctx)?;
        qos::run(ctx)?;
    }

    if flow == Flow::Trap {
        trap::run_trap64_65_flow(ctx)?;
    }

    if matches!(flow, Flow::All | Flow::Multicast) {
        mcast::run(ctx)?;
    }

    info!(ctx.log, "all tests pass"; "flow" => %flow);
    Ok(())
}

/// Explore the subnet and write what was found.
fn create_inventory(ctx: &mut ValidationContext<'_>) -> Result<()> {
    explore::explore(ctx)?;

    let ignore_paths = ctx.opts.ignore_path_records;
    match ctx.opts.inventory.clone() {
        Some(path) => {
            inventory::write_file(&path, &ctx.subnet, ignore_paths)?;
            info!(ctx.log, "wrote inventory";
                "path" => %path.display(),
                "nodes" => ctx.subnet.num_nodes(),
                "ports" => ctx.subnet.num_ports(),
                "paths" => ctx.subnet.num_paths(),
                "links" => ctx.subnet.num_links()
            );
        }
        None => {
            warn!(ctx.log, "no inventory path given, writing to stdout");
            let mut out = std::io::stdout();
            inventory::write(&mut out, &ctx.subnet, ignore_paths).map_err(
                |source| Error::Io { what: "inventory".into(), source },
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flow_names() {
        for flow in [
            Flow::All,
            Flow::CreateInventory,
            Flow::ValidateInventory,
            Flow::Service,
            Flow::EventForwarding,
            Flow::Stress,
            Flow::Multicast,
            Flow::Qos,
            Flow::Trap,
        ] {
            assert_eq!(flow.to_string().parse::<Flow>().unwrap(), flow);
        }

        assert_eq!("m".parse::<Flow>().unwrap(), Flow::Multicast);
        assert_eq!("F".parse::<Flow>().unwrap(), Flow::Stress);
        assert!("bogus".parse::<Flow>().is_err());
    }
}
