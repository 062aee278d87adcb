// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Support for the `osmtest` command: logging setup and the pieces of
//! a run that sit outside the engine.

use osmtest::Options;
use osmtest::ValidationContext;
use osmtest::flow;
use osmtest::print::print_failures;
use osmtest::report::RunSummary;
use osmtest_sim::Fabric;
use osmtest_sim::SimConfig;
use osmtest_sim::SimSa;
use slog::Drain;
use slog::FilterLevel;
use slog::Logger;
use slog::error;
use slog::info;
use slog::o;
use slog_async::AsyncGuard;
use std::path::Path;

/// The filter applied when `RUST_LOG` says nothing, by the number of
/// `-v` flags given.
pub fn filter_level(verbose: u8) -> FilterLevel {
    match verbose {
        0 => FilterLevel::Info,
        1 => FilterLevel::Debug,
        _ => FilterLevel::Trace,
    }
}

/// Build the root logger. Records go to stderr through an async drain;
/// the guard must live until the last record is logged.
pub fn logger(verbose: u8) -> (Logger, AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();

    let mut builder = slog_envlogger::LogBuilder::new(drain)
        .filter(None, filter_level(verbose));
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder = builder.parse(&filters);
    }
    let drain = builder.build().fuse();

    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    let log = Logger::root(drain.fuse(), o!("component" => "osmtest"));
    (log, guard)
}

/// Stand up a simulated SA over the fabric described by the inventory
/// at `path`.
pub fn simulated_sa(path: &Path, log: &Logger) -> anyhow::Result<SimSa> {
    let fabric = Fabric::read_inventory(path, log)?;
    info!(log, "simulating fabric";
        "path" => %path.display(),
        "nodes" => fabric.nodes().len(),
        "ports" => fabric.ports().len()
    );
    let cfg = SimConfig::default();
    Ok(SimSa::new(fabric, cfg, log.new(o!("component" => "sim")))?)
}

/// Run one flow against `sa` and summarize it. The summary is written
/// to `report` when one is given.
pub fn run(
    sa: &mut SimSa,
    opts: Options,
    log: &Logger,
    report: Option<&Path>,
) -> anyhow::Result<RunSummary> {
    let mut ctx = ValidationContext::new(sa, opts, log.clone());
    let outcome = flow::run(&mut ctx);
    if let Err(e) = &outcome {
        error!(log, "run failed"; "error" => %e);
        if !e.failures().is_empty() {
            print_failures(e.failures())?;
        }
    }

    let summary = RunSummary::new(&ctx, &outcome);
    info!(log, "run finished";
        "passed" => summary.passed,
        "queries" => summary.stats.queries,
        "records" => summary.stats.records,
        "expected_errors" => summary.stats.expected_errors
    );

    if let Some(path) = report {
        summary.write_file(path)?;
    }
    Ok(summary)
}

#[cfg(test)]
mod test {
    use super::*;
    use osmtest::Flow;
    use osmtest_test_utils::discard_log;
    use osmtest_test_utils::fabric;
    use osmtest_test_utils::scratch_path;
    use osmtest_test_utils::sim;
    use osmtest_test_utils::test_opts;

    #[test]
    fn verbosity() {
        assert_eq!(filter_level(0), FilterLevel::Info);
        assert_eq!(filter_level(1), FilterLevel::Debug);
        assert_eq!(filter_level(5), FilterLevel::Trace);
    }

    #[test]
    fn run_writes_report() {
        let path = scratch_path("cli-report.json");
        let mut sa = sim(fabric());
        let summary = run(
            &mut sa,
            test_opts(Flow::ValidateInventory),
            &discard_log(),
            Some(&path),
        )
        .unwrap();
        assert!(summary.passed);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"passed\": true"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn sim_from_inventory() {
        let path = scratch_path("cli-fabric.inv");
        let log = discard_log();
        let mut sa = sim(fabric());
        let opts = Options {
            inventory: Some(path.clone()),
            ..test_opts(Flow::CreateInventory)
        };
        run(&mut sa, opts, &log, None).unwrap();

        let copy = simulated_sa(&path, &log).unwrap();
        assert_eq!(copy.fabric().nodes().len(), 3);
        std::fs::remove_file(&path).unwrap();
    }
}
