// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The state threaded through every flow.

use crate::api::DEFAULT_SM_KEY;
use crate::api::FromSaRecord;
use crate::api::MadStatus;
use crate::api::SaRecord;
use crate::error::Error;
use crate::error::Result;
use crate::flow::Flow;
use crate::query::LocalPort;
use crate::query::Query;
use crate::query::QueryError;
use crate::query::QueryOpts;
use crate::query::SaClient;
use crate::store::ExpectedSubnet;
use serde::Serialize;
use slog::Logger;
use slog::debug;
use slog::trace;
use std::fmt;
use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

/// The highest unicast LID.
pub const UNICAST_LID_MAX: u16 = 0xBFFF;

/// How many queries each stress level issues before it stops.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct StressLimits {
    pub small: u64,
    pub large: u64,
    pub path: u64,
}

impl Default for StressLimits {
    fn default() -> Self {
        Self { small: 100_000, large: 4_000, path: 20_000 }
    }
}

/// Everything a run can be told from the outside.
#[derive(Clone, Debug)]
pub struct Options {
    pub flow: Flow,
    /// The inventory to validate against, or to write when creating
    /// one.
    pub inventory: Option<PathBuf>,
    /// The highest LID probed during live discovery.
    pub max_lid: u16,
    pub timeout_ms: u32,
    pub retries: u32,
    /// The SM_Key sent with trusted requests.
    pub sm_key: u64,
    pub stress: u8,
    pub stress_limits: StressLimits,
    /// Multicast mode. Modes 1 and 3 compare group counts before and
    /// after the flow; modes above 2 also exhaust the MLID space.
    pub mmode: u8,
    pub ignore_path_records: bool,
    /// Slack added to every wait for a lease to lapse or a trap to
    /// arrive.
    pub wait_time: Duration,
    /// The finite lease used by the service flow, in seconds.
    pub service_lease: u32,
    pub qos_dump: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            flow: Flow::All,
            inventory: None,
            max_lid: UNICAST_LID_MAX,
            timeout_ms: 200,
            retries: 3,
            sm_key: DEFAULT_SM_KEY,
            stress: 1,
            stress_limits: StressLimits::default(),
            mmode: 1,
            ignore_path_records: false,
            wait_time: Duration::from_secs(1),
            service_lease: 4,
            qos_dump: None,
        }
    }
}

/// Running totals reported at the end of a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Stats {
    pub queries: u64,
    pub records: u64,
    /// Negative checks that failed the way they were meant to.
    pub expected_errors: u64,
}

/// The outcome a negative check requires.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Expect {
    /// Any failure will do.
    Any,
    /// A remote error carrying this status code.
    Status(MadStatus),
    Timeout,
}

impl Expect {
    pub fn matches(&self, err: &QueryError) -> bool {
        match self {
            Self::Any => true,
            Self::Status(code) => err.is_status(*code),
            Self::Timeout => *err == QueryError::Timeout,
        }
    }
}

impl Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any error"),
            Self::Status(s) => write!(f, "remote error {s}"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// The expected subnet, the SA it is checked against, and the run
/// options.
pub struct ValidationContext<'a> {
    pub subnet: ExpectedSubnet,
    pub sa: &'a mut dyn SaClient,
    pub opts: Options,
    pub log: Logger,
    pub local: LocalPort,
    /// The LMC of the local port, once known.
    pub lmc: u8,
    pub stats: Stats,
}

impl<'a> ValidationContext<'a> {
    pub fn new(sa: &'a mut dyn SaClient, opts: Options, log: Logger) -> Self {
        let local = sa.local_port();
        Self {
            subnet: ExpectedSubnet::new(),
            sa,
            opts,
            log,
            local,
            lmc: 0,
            stats: Stats::default(),
        }
    }

    /// Transport parameters for an untrusted request.
    pub fn query_opts(&self) -> QueryOpts {
        QueryOpts {
            timeout_ms: self.opts.timeout_ms,
            retry_count: self.opts.retries,
            sm_key: 0,
        }
    }

    /// Transport parameters for a trusted request.
    pub fn trusted_opts(&self) -> QueryOpts {
        self.query_opts().with_sm_key(self.opts.sm_key)
    }

    /// Issue a request and hand back the raw outcome.
    pub fn try_query_with(
        &mut self,
        q: &Query,
        opts: &QueryOpts,
    ) -> std::result::Result<Vec<SaRecord>, QueryError> {
        self.stats.queries += 1;
        trace!(self.log, "query"; "req" => %q);
        let res = self.sa.query(q, opts);
        match &res {
            Ok(recs) => {
                self.stats.records += recs.len() as u64;
                trace!(self.log, "response"; "records" => recs.len());
            }
            Err(e) => trace!(self.log, "response"; "error" => %e),
        }
        res
    }

    pub fn try_query(
        &mut self,
        q: &Query,
    ) -> std::result::Result<Vec<SaRecord>, QueryError> {
        let opts = self.query_opts();
        self.try_query_with(q, &opts)
    }

    /// Issue a request that must succeed.
    pub fn query(&mut self, step: &str, q: &Query) -> Result<Vec<SaRecord>> {
        self.try_query(q).map_err(|e| Error::query(step, e))
    }

    /// Issue a request that must succeed and return records of type
    /// `R`.
    pub fn query_as<R: FromSaRecord>(
        &mut self,
        step: &str,
        q: &Query,
    ) -> Result<Vec<R>> {
        let recs = self.query(step, q)?;
        typed(step, recs)
    }

    /// Like [`Self::query_as`], but an empty answer (either an empty
    /// table or `NO_RECORDS`) is not an error.
    pub fn query_opt<R: FromSaRecord>(
        &mut self,
        step: &str,
        q: &Query,
    ) -> Result<Vec<R>> {
        match self.try_query(q) {
            Ok(recs) => typed(step, recs),
            Err(e) if e.is_no_records() => Ok(vec![]),
            Err(e) => Err(Error::query(step, e)),
        }
    }

    /// Issue a request that must fail as described by `expect`, and
    /// return the error it failed with.
    pub fn expect_failure_with(
        &mut self,
        step: &str,
        expect: Expect,
        q: &Query,
        opts: &QueryOpts,
    ) -> Result<QueryError> {
        debug!(self.log, "expecting errors start"; "step" => step);
        let res = self.try_query_with(q, opts);
        debug!(self.log, "expecting errors end"; "step" => step);

        match res {
            Ok(_) => Err(Error::UnexpectedSuccess { step: step.into() }),
            Err(e) if expect.matches(&e) => {
                self.stats.expected_errors += 1;
                debug!(self.log, "got expected error"; "err" => %e);
                Ok(e)
            }
            Err(e) => Err(Error::WrongErrorKind {
                step: step.into(),
                expected: expect.to_string(),
                got: e,
            }),
        }
    }

    pub fn expect_failure(
        &mut self,
        step: &str,
        expect: Expect,
        q: &Query,
    ) -> Result<QueryError> {
        let opts = self.query_opts();
        self.expect_failure_with(step, expect, q, &opts)
    }

    /// Issue a request that must not produce a record. Any error, or an
    /// empty table, passes.
    pub fn expect_nothing_with(
        &mut self,
        step: &str,
        q: &Query,
        opts: &QueryOpts,
    ) -> Result<()> {
        debug!(self.log, "expecting errors start"; "step" => step);
        let res = self.try_query_with(q, opts);
        debug!(self.log, "expecting errors end"; "step" => step);

        match res {
            Ok(recs) if !recs.is_empty() => {
                Err(Error::UnexpectedSuccess { step: step.into() })
            }
            Ok(_) => Ok(()),
            Err(_) => {
                self.stats.expected_errors += 1;
                Ok(())
            }
        }
    }

    pub fn expect_nothing(&mut self, step: &str, q: &Query) -> Result<()> {
        let opts = self.query_opts();
        self.expect_nothing_with(step, q, &opts)
    }
}

/// Convert a response into records of type `R`.
pub fn typed<R: FromSaRecord>(
    step: &str,
    recs: Vec<SaRecord>,
) -> Result<Vec<R>> {
    recs.into_iter()
        .map(|r| {
            let attr = r.attr();
            R::from_sa_record(r).ok_or_else(|| {
                Error::violation(
                    step,
                    format!("expected {} but got {attr}", R::ATTR),
                )
            })
        })
        .collect()
}
