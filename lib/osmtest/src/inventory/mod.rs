// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The inventory file: a line-oriented, block-structured description
//! of the subnet.
//!
//! ```text
//! DEFINE_NODE
//! lid                     0x1
//! node_guid               0x2C90300001000
//! END
//! ```
//!
//! A keyword present in a block sets both the expected value and the
//! comparison mask for that field. Lines starting with `#` are
//! comments.

use crate::store::ExpectedSubnet;
use crate::store::StoreError;
use slog::Logger;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

mod parse;
mod write;

pub use parse::parse;
pub use parse::parse_into;
pub use write::write;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("line {line}: end of file inside {block} block")]
    UnexpectedEof { line: usize, block: &'static str },

    #[error("line {line}: unknown keyword {keyword:?} in {block} block")]
    UnknownKeyword { line: usize, block: &'static str, keyword: String },

    #[error("line {line}: unknown keyword {keyword:?}")]
    UnknownTopLevel { line: usize, keyword: String },

    #[error("line {line}: bad value {value:?} for {keyword}")]
    BadValue { line: usize, keyword: String, value: String },

    #[error("line {line}: {block} block has no {field}")]
    MissingField { line: usize, block: &'static str, field: &'static str },

    #[error("line {line}: {source}")]
    Store { line: usize, source: StoreError },

    #[error("inventory {path}: {source}")]
    Io { path: String, source: std::io::Error },
}

/// Read and parse an inventory file.
pub fn read_file(
    path: &Path,
    log: &Logger,
) -> Result<ExpectedSubnet, InventoryError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        InventoryError::Io { path: path.display().to_string(), source }
    })?;
    parse(&text, log)
}

/// Write the subnet to an inventory file, replacing what was there.
pub fn write_file(
    path: &Path,
    subnet: &ExpectedSubnet,
    ignore_paths: bool,
) -> Result<(), InventoryError> {
    let io_err = |source| InventoryError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    write(&mut out, subnet, ignore_paths).map_err(io_err)?;
    out.flush().map_err(io_err)
}
