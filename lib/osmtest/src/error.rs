// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use crate::compare::FieldMismatch;
use crate::inventory::InventoryError;
use crate::query::QueryError;
use crate::store::Key;
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use std::fmt::Display;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors that abort a flow.
#[derive(Debug, Error)]
pub enum Error {
    /// A request that should have worked did not.
    #[error("{step}: {source}")]
    Query { step: String, source: QueryError },

    /// A request that should have failed succeeded.
    #[error("{step}: request succeeded but was expected to fail")]
    UnexpectedSuccess { step: String },

    /// A request failed, but not the way it was supposed to.
    #[error("{step}: expected {expected} but got {got}")]
    WrongErrorKind { step: String, expected: String, got: QueryError },

    /// The SA answered, but the answer breaks a protocol rule.
    #[error("{step}: protocol violation: {detail}")]
    ProtocolViolation { step: String, detail: String },

    /// A validation pass found records that disagree with the
    /// expected subnet.
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<Failure>),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("error writing {what}: {source}")]
    Io { what: String, source: std::io::Error },
}

impl Error {
    pub fn query(step: impl Into<String>, source: QueryError) -> Self {
        Self::Query { step: step.into(), source }
    }

    pub fn violation(
        step: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::ProtocolViolation { step: step.into(), detail: detail.into() }
    }

    /// The validation failures carried by this error, if any.
    pub fn failures(&self) -> &[Failure] {
        match self {
            Self::Validation(f) => f,
            _ => &[],
        }
    }
}

fn summarize(failures: &[Failure]) -> String {
    match failures {
        [] => "no failures".into(),
        [one] => one.to_string(),
        [first, rest @ ..] => {
            format!("{first} (and {} more)", rest.len())
        }
    }
}

/// One way a record disagrees with the expected subnet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Failure {
    /// The SA returned a record whose key is not in the store.
    UnexpectedRecord { key: Key },
    /// A record was returned more often than allowed.
    DuplicateRecord { key: Key, count: u32 },
    /// A record in the store was never returned.
    MissingRecord { key: Key },
    /// A record was returned but a masked field differs.
    FieldMismatch { key: Key, mismatch: FieldMismatch },
}

impl Failure {
    pub fn key(&self) -> &Key {
        match self {
            Self::UnexpectedRecord { key }
            | Self::DuplicateRecord { key, .. }
            | Self::MissingRecord { key }
            | Self::FieldMismatch { key, .. } => key,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateRecord { .. })
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingRecord { .. })
    }

    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::UnexpectedRecord { .. })
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::FieldMismatch { .. })
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedRecord { key } => {
                write!(f, "unexpected record {key}")
            }
            Self::DuplicateRecord { key, count } => {
                write!(f, "duplicate record {key} (seen {count} times)")
            }
            Self::MissingRecord { key } => write!(f, "missing record {key}"),
            Self::FieldMismatch { key, mismatch } => {
                write!(f, "record {key}: {mismatch}")
            }
        }
    }
}
