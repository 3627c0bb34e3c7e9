// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Record Container Port
//!
//! The low-level record-file library: a binary container with a header
//! plus one or more per-channel streams (spec §1). We specify the wrapper
//! contract the File Rotator uses, not the container format.

use async_trait::async_trait;

use crate::entities::{FileHeader, Record};
use crate::error::SandflyError;

#[async_trait]
pub trait RecordContainer: Send + Sync {
    /// Opens (or creates) the container and writes its header. Valid only
    /// during the `preparing` stage (spec §4.2).
    async fn open(&self, header: &FileHeader) -> Result<(), SandflyError>;

    /// Appends one record to the given stream index. Valid only during the
    /// `writing` stage.
    async fn append(&self, stream_index: usize, record: &Record) -> Result<(), SandflyError>;

    /// Finalizes and closes the container, flushing any buffered data.
    async fn close(&self) -> Result<(), SandflyError>;
}
