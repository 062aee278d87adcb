// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The machine-readable summary of a run.

use crate::context::Stats;
use crate::context::ValidationContext;
use crate::error::Error;
use crate::error::Failure;
use crate::error::Result;
use crate::flow::Flow;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

/// How many records of each kind the expected subnet held at the end
/// of the run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Counts {
    pub nodes: usize,
    pub ports: usize,
    pub paths: usize,
    pub links: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub flow: Flow,
    pub passed: bool,
    /// The error that ended the run, if it failed.
    pub error: Option<String>,
    pub failures: Vec<Failure>,
    pub stats: Stats,
    pub counts: Counts,
}

impl RunSummary {
    /// Summarize a finished run.
    pub fn new(ctx: &ValidationContext<'_>, outcome: &Result<()>) -> Self {
        let (error, failures) = match outcome {
            Ok(()) => (None, vec![]),
            Err(e) => (Some(e.to_string()), e.failures().to_vec()),
        };

        Self {
            flow: ctx.opts.flow,
            passed: outcome.is_ok(),
            error,
            failures,
            stats: ctx.stats,
            counts: Counts {
                nodes: ctx.subnet.num_nodes(),
                ports: ctx.subnet.num_ports(),
                paths: ctx.subnet.num_paths(),
                links: ctx.subnet.num_links(),
            },
        }
    }

    pub fn write(&self, w: impl Write) -> Result<()> {
        serde_json::to_writer_pretty(w, self).map_err(|e| Error::Io {
            what: "run report".into(),
            source: e.into(),
        })
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        let f = File::create(path).map_err(|source| Error::Io {
            what: format!("run report {}", path.display()),
            source,
        })?;
        let mut w = BufWriter::new(f);
        self.write(&mut w)?;
        w.flush().map_err(|source| Error::Io {
            what: format!("run report {}", path.display()),
            source,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::Key;

    #[test]
    fn failed_run_json() {
        let summary = RunSummary {
            flow: Flow::ValidateInventory,
            passed: false,
            error: Some("validation failed".into()),
            failures: vec![Failure::MissingRecord { key: Key::Node(3) }],
            stats: Stats { queries: 10, records: 7, expected_errors: 2 },
            counts: Counts { nodes: 3, ports: 4, paths: 9, links: 2 },
        };

        let mut out = vec![];
        summary.write(&mut out).unwrap();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["flow"], "ValidateInventory");
        assert_eq!(v["passed"], false);
        assert_eq!(v["stats"]["expected_errors"], 2);
        assert_eq!(v["failures"][0]["MissingRecord"]["key"]["Node"], 3);
    }
}
