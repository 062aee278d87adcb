// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Validation against the simulated SA.

use osmtest::compare::path_identity_mask;
use osmtest::store::Expected;
use osmtest::store::Record;
use osmtest_test_utils as common;

use common::*;

#[test]
fn explored_subnet_validates() -> anyhow::Result<()> {
    let mut sa = sim(fabric());
    let subnet = explored(&mut sa);
    assert_eq!(subnet.num_nodes(), 3);
    // Port 1 of each CA, and ports 0 through 4 of the switch.
    assert_eq!(subnet.num_ports(), 7);
    assert_eq!(subnet.num_paths(), 9);
    assert_eq!(subnet.num_links(), 4);

    let mut ctx = context_with(&mut sa, subnet, test_opts(Flow::All));
    validate::validate_against_db(&mut ctx)?;
    assert!(ctx.stats.expected_errors > 0);
    Ok(())
}

#[test]
fn duplicate_node_found_once() {
    let mut sa = sim(fabric());
    let subnet = explored(&mut sa);
    let lid = node_lid(sa.fabric(), 1);
    sa.inject(Key::Node(lid), Fault::Duplicate);

    let mut ctx = context_with(&mut sa, subnet, test_opts(Flow::All));
    expect_failures!(
        validate::validate_bulk::<NodeRecord>(&mut ctx, 1),
        Failure::DuplicateRecord { key: Key::Node(lid), count: 2 },
    );
}

#[test]
fn dropped_port_is_missing() {
    let mut sa = sim(fabric());
    let subnet = explored(&mut sa);
    let lid = node_lid(sa.fabric(), 0);
    let key = Key::Port { lid, port_num: 1 };
    sa.inject(key.clone(), Fault::Drop);

    let mut ctx = context_with(&mut sa, subnet, test_opts(Flow::All));
    expect_failures!(
        validate::validate_bulk::<PortRecord>(&mut ctx, 1),
        Failure::MissingRecord { key },
    );
}

#[test]
fn corrupt_records_mismatch() {
    let mut sa = sim(fabric());
    let subnet = explored(&mut sa);
    let lid = node_lid(sa.fabric(), 2);
    sa.inject(Key::Node(lid), Fault::Corrupt);

    let mut ctx = context_with(&mut sa, subnet, test_opts(Flow::All));
    let err = validate::validate_bulk::<NodeRecord>(&mut ctx, 1).unwrap_err();
    match err.failures() {
        [Failure::FieldMismatch { key, mismatch }] => {
            assert_eq!(*key, Key::Node(lid));
            assert_eq!(mismatch.field, "device_id");
        }
        other => panic!("unexpected failures: {other:?}"),
    }

    // The single-key pass reports the same record.
    let err = validate::validate_single::<NodeRecord>(&mut ctx).unwrap_err();
    assert_eq!(err.failures().len(), 1);
    assert!(err.failures()[0].is_mismatch());
}

#[test]
fn corrupt_path_fails_full_validation() {
    let mut sa = sim(fabric());
    let subnet = explored(&mut sa);
    let slid = node_lid(sa.fabric(), 0);
    let dlid = node_lid(sa.fabric(), 1);
    sa.inject(Key::Path { slid, dlid }, Fault::Corrupt);

    let mut ctx = context_with(&mut sa, subnet, test_opts(Flow::All));
    let err = validate::validate_against_db(&mut ctx).unwrap_err();
    assert!(
        err.failures()
            .iter()
            .any(|f| *f.key() == Key::Path { slid, dlid } && f.is_mismatch()),
        "{err}"
    );
}

#[test]
fn fetch_by_key_without_bulk() -> anyhow::Result<()> {
    let mut sa = sim(fabric());
    sa.disable_bulk();
    let subnet = explored(&mut sa);

    let mut ctx = context_with(&mut sa, subnet, test_opts(Flow::All));
    validate::validate_against_db(&mut ctx)?;
    Ok(())
}

#[test]
fn lmc_aliases_validate() -> anyhow::Result<()> {
    let mut sa = sim(fabric_lmc(1));
    let subnet = explored(&mut sa);
    // Paths are not discovered when the local port has an LMC.
    assert_eq!(subnet.num_paths(), 0);

    let mut ctx = context_with(&mut sa, subnet, test_opts(Flow::All));
    explore::get_local_lmc(&mut ctx)?;
    assert_eq!(ctx.lmc, 1);
    validate::validate_against_db(&mut ctx)?;
    Ok(())
}

#[test]
fn bulk_paths_repeat_per_lid_pair() -> anyhow::Result<()> {
    let mut sa = sim(fabric_lmc(1));
    let mut subnet = explored(&mut sa);
    for p in sa.fabric().paths() {
        subnet.insert(Record::Path(Expected::new(p, path_identity_mask())))?;
    }

    let mut ctx = context_with(&mut sa, subnet, test_opts(Flow::All));
    validate::validate_bulk::<PathRecord>(&mut ctx, 4)?;
    assert!(ctx.subnet.paths().all(|p| p.count == 4));

    // Three extra copies of each of the nine paths.
    let err = validate::validate_bulk::<PathRecord>(&mut ctx, 1).unwrap_err();
    assert_eq!(err.failures().len(), 27);
    assert!(err.failures().iter().all(Failure::is_duplicate));
    Ok(())
}

#[test]
fn inventory_round_trip() -> anyhow::Result<()> {
    let path = scratch_path("round-trip.inv");
    let log = discard_log();

    let mut sa = sim(two_switch_fabric());
    let mut opts = test_opts(Flow::CreateInventory);
    opts.inventory = Some(path.clone());
    let mut ctx = ValidationContext::new(&mut sa, opts.clone(), log.clone());
    flow::run(&mut ctx)?;
    let written = ctx.subnet.len();

    opts.flow = Flow::ValidateInventory;
    let mut ctx = ValidationContext::new(&mut sa, opts.clone(), log.clone());
    flow::run(&mut ctx)?;
    assert_eq!(ctx.subnet.len(), written);

    // A fabric read back from the inventory answers the same way.
    let mut copy = sim(Fabric::read_inventory(&path, &log)?);
    let mut ctx = ValidationContext::new(&mut copy, opts, log);
    flow::run(&mut ctx)?;

    std::fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn wrong_inventory_fails() -> anyhow::Result<()> {
    let path = scratch_path("other-fabric.inv");
    let log = discard_log();

    let mut big = sim(two_switch_fabric());
    let mut opts = test_opts(Flow::CreateInventory);
    opts.inventory = Some(path.clone());
    let mut ctx = ValidationContext::new(&mut big, opts.clone(), log.clone());
    flow::run(&mut ctx)?;

    // The small fabric lacks most of what the inventory lists.
    let mut small = sim(fabric());
    opts.flow = Flow::ValidateInventory;
    let mut ctx = ValidationContext::new(&mut small, opts, log);
    let err = flow::run(&mut ctx).unwrap_err();
    assert!(!err.failures().is_empty(), "{err}");
    assert!(err.failures().iter().any(Failure::is_missing));

    std::fs::remove_file(&path)?;
    Ok(())
}
