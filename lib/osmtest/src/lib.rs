// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A conformance engine for an InfiniBand Subnet Administrator.
//!
//! The engine builds a model of the subnet it expects to find, either
//! from an inventory file or by walking the SA, then queries the SA
//! again and checks that every record comes back exactly once and
//! matches the model under its comparison mask. It also drives the
//! multicast membership and service registration state machines
//! through a long sequence of positive and negative cases, asserting
//! the precise status each request must produce.
//!
//! Everything talks to the SA through the [`query::SaClient`] trait;
//! the engine never sees a MAD.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod api {
    pub use osmtest_api::*;
}

pub mod compare;
pub mod context;
pub mod error;
pub mod explore;
pub mod flow;
pub mod inventory;
pub mod mcast;
pub mod print;
pub mod probe;
pub mod qos;
pub mod query;
pub mod report;
pub mod service;
pub mod store;
pub mod stress;
pub mod trap;
pub mod validate;

pub use context::Options;
pub use context::ValidationContext;
pub use error::Error;
pub use error::Failure;
pub use error::Result;
pub use flow::Flow;
pub use query::Query;
pub use query::QueryError;
pub use query::QueryOpts;
pub use query::SaClient;
