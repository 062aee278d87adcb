// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! An in-process SA for driving the engine without a fabric.
//!
//! The SA answers from a [`Fabric`], described node by node with a
//! [`FabricBuilder`] or read from an inventory. It keeps multicast
//! groups, service registrations and trap subscriptions the way a
//! subnet manager would, and it can be told to misbehave with a
//! [`Fault`] so the engine's checks have something to find.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod fabric;
pub mod fault;
pub mod inform;
pub mod mcast;
pub mod sa;
pub mod service;

pub use fabric::Fabric;
pub use fabric::FabricBuilder;
pub use fabric::FabricError;
pub use fault::Fault;
pub use sa::SimConfig;
pub use sa::SimSa;
