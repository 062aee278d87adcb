// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

// Let's make our lives easier and pub use a bunch of stuff.
pub use osmtest::Error;
pub use osmtest::Failure;
pub use osmtest::Flow;
pub use osmtest::Options;
pub use osmtest::Query;
pub use osmtest::QueryOpts;
pub use osmtest::SaClient;
pub use osmtest::ValidationContext;
pub use osmtest::api::Gid;
pub use osmtest::api::MadStatus;
pub use osmtest::api::Method;
pub use osmtest::api::NodeRecord;
pub use osmtest::api::PathRecord;
pub use osmtest::api::PortRecord;
pub use osmtest::api::trap;
pub use osmtest::context::StressLimits;
pub use osmtest::explore;
pub use osmtest::flow;
pub use osmtest::store::ExpectedSubnet;
pub use osmtest::store::Key;
pub use osmtest::validate;
pub use osmtest_sim::Fabric;
pub use osmtest_sim::FabricBuilder;
pub use osmtest_sim::Fault;
pub use osmtest_sim::SimConfig;
pub use osmtest_sim::SimSa;
pub use slog::Logger;
pub use std::path::PathBuf;
pub use std::time::Duration;

/// Expects that a validation error carries exactly the given
/// failures, in order.
#[macro_export]
macro_rules! expect_failures {
    ($res:expr, $($failure:expr),+ $(,)?) => {
        match $res {
            Err(e @ $crate::Error::Validation(_)) => {
                assert_eq!(e.failures(), &[$($failure),+][..]);
            }
            other => panic!("expected validation failures, got {other:?}"),
        }
    };
}

pub fn discard_log() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

/// Two CAs hanging off one four-port switch. The first CA is the
/// local port and hosts the SM.
pub fn fabric_lmc(lmc: u8) -> Fabric {
    FabricBuilder::new()
        .lmc(lmc)
        .ca("hca-a HCA-1")
        .ca("hca-b HCA-1")
        .switch("leaf-1", 4)
        .link(0, 1, 2, 1)
        .link(1, 1, 2, 2)
        .build()
        .unwrap()
}

pub fn fabric() -> Fabric {
    fabric_lmc(0)
}

/// A larger fabric: two switches linked to each other, with two CAs
/// on each.
pub fn two_switch_fabric() -> Fabric {
    FabricBuilder::new()
        .ca("hca-a HCA-1")
        .ca("hca-b HCA-1")
        .ca("hca-c HCA-1")
        .ca("hca-d HCA-1")
        .switch("leaf-1", 8)
        .switch("leaf-2", 8)
        .link(0, 1, 4, 1)
        .link(1, 1, 4, 2)
        .link(2, 1, 5, 1)
        .link(3, 1, 5, 2)
        .link(4, 8, 5, 8)
        .build()
        .unwrap()
}

pub fn sim(fabric: Fabric) -> SimSa {
    SimSa::new(fabric, SimConfig::default(), discard_log()).unwrap()
}

/// Options sized for tests: a short LID sweep, one-second leases and
/// short waits.
pub fn test_opts(flow: Flow) -> Options {
    Options {
        flow,
        max_lid: 0x40,
        service_lease: 1,
        wait_time: Duration::from_millis(100),
        stress_limits: StressLimits { small: 50, large: 10, path: 40 },
        ..Default::default()
    }
}

/// Explore `sa` and hand back what was found.
pub fn explored(sa: &mut SimSa) -> ExpectedSubnet {
    let mut ctx =
        ValidationContext::new(sa, test_opts(Flow::All), discard_log());
    explore::explore(&mut ctx).unwrap();
    ctx.subnet
}

/// A context over `sa` holding `subnet` as the expected subnet.
pub fn context_with(
    sa: &mut SimSa,
    subnet: ExpectedSubnet,
    opts: Options,
) -> ValidationContext<'_> {
    let mut ctx = ValidationContext::new(sa, opts, discard_log());
    ctx.subnet = subnet;
    ctx
}

/// A path in the system temp directory that no other test uses.
pub fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("osmtest-{}-{name}", std::process::id()))
}

/// The base LID of the `n`th node of the fabric.
pub fn node_lid(fabric: &Fabric, n: usize) -> u16 {
    fabric.nodes()[n].lid
}
