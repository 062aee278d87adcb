// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;

use osmtest::Flow;
use osmtest::Options;
use osmtest::api::DEFAULT_SM_KEY;
use osmtest::context::StressLimits;
use osmtest::context::UNICAST_LID_MAX;
use slog::info;

/// Check that a Subnet Administrator answers the way the InfiniBand
/// specification says it must.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// The flow to run: all, create-inventory, validate-inventory,
    /// service, event-forwarding, stress, multicast, qos or trap. Single
    /// letters (a, c, v, s, e, f, m, q, t) are accepted too.
    #[arg(short, long, default_value = "all")]
    flow: Flow,

    /// The inventory to validate against, or to write when creating
    /// one.
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// The highest LID probed while exploring the subnet.
    #[arg(short = 'l', long, default_value_t = UNICAST_LID_MAX)]
    max_lid: u16,

    /// Transaction timeout in milliseconds.
    #[arg(short, long, default_value_t = 200)]
    timeout: u32,

    /// Retries per transaction.
    #[arg(short, long, default_value_t = 3)]
    retries: u32,

    /// The SM_Key sent with trusted requests.
    #[arg(long, default_value_t = DEFAULT_SM_KEY)]
    sm_key: u64,

    /// Stress level: 1 hammers a single port record, 2 whole tables and
    /// 3 path records.
    #[arg(short, long, default_value_t = 1)]
    stress: u8,

    /// Stop a stress level after this many queries.
    #[arg(long)]
    stress_limit: Option<u64>,

    /// Multicast mode. Modes 1 and 3 require the group count to be
    /// unchanged by the flow; modes above 2 also exhaust the MLID
    /// space.
    #[arg(short = 'M', long, default_value_t = 1)]
    mmode: u8,

    /// Neither explore nor write nor validate path records.
    #[arg(short = 'N', long)]
    ignore_path_records: bool,

    /// Seconds of slack added to every wait for a lease to lapse or a
    /// trap to arrive.
    #[arg(short, long, default_value_t = 1)]
    wait_time: u64,

    /// The finite lease the service flow registers with, in seconds.
    #[arg(long, default_value_t = 4)]
    service_lease: u32,

    /// Write the QoS tables here instead of logging them.
    #[arg(short = 'Q', long)]
    qos_dump: Option<PathBuf>,

    /// Write a JSON summary of the run here.
    #[arg(long)]
    report: Option<PathBuf>,

    /// The inventory describing the fabric behind the simulated SA.
    /// Defaults to the inventory being validated.
    #[arg(long)]
    fabric: Option<PathBuf>,

    /// More logging. Given twice, trace every query. `RUST_LOG`
    /// overrides this.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn options(&self) -> Options {
        let stress_limits = match self.stress_limit {
            Some(n) => StressLimits { small: n, large: n, path: n },
            None => StressLimits::default(),
        };

        Options {
            flow: self.flow,
            inventory: self.inventory.clone(),
            max_lid: self.max_lid,
            timeout_ms: self.timeout,
            retries: self.retries,
            sm_key: self.sm_key,
            stress: self.stress,
            stress_limits,
            mmode: self.mmode,
            ignore_path_records: self.ignore_path_records,
            wait_time: Duration::from_secs(self.wait_time),
            service_lease: self.service_lease,
            qos_dump: self.qos_dump.clone(),
        }
    }

    /// The inventory the simulated SA is built from.
    fn fabric(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.fabric {
            return Ok(path.clone());
        }
        match (&self.inventory, self.flow) {
            (Some(path), flow) if flow != Flow::CreateInventory => {
                Ok(path.clone())
            }
            _ => bail!("no fabric to test against, pass --fabric"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if !(1..=3).contains(&cli.stress) {
        bail!("stress level must be 1, 2 or 3, not {}", cli.stress);
    }

    let (log, _guard) = osmtest_cli::logger(cli.verbose);
    let fabric = cli.fabric()?;
    let mut sa = osmtest_cli::simulated_sa(&fabric, &log)?;

    let opts = cli.options();
    info!(log, "osmtest starting";
        "flow" => %opts.flow,
        "fabric" => %fabric.display()
    );
    let summary =
        osmtest_cli::run(&mut sa, opts, &log, cli.report.as_deref())?;

    if !summary.passed {
        bail!(
            "{} flow failed: {}",
            summary.flow,
            summary.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
