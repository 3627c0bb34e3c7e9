// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # File Header
//!
//! Basic per-file metadata (spec §4.2 "Per-file structure"). A continuation
//! file copies the originating file's header, appends a continuation note
//! to the description, retains stream shapes, and writes its own header
//! before any records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shape of one stream within a file; copied verbatim into continuation
/// files so downstream readers see identical channel layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamShape {
    pub channel_count: u32,
    pub record_size: u32,
    pub data_type_size: u32,
    pub data_format: String,
    pub bit_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHeader {
    pub filename: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub run_duration_ms: u64,
    pub streams: Vec<StreamShape>,
}

impl FileHeader {
    pub fn new(filename: impl Into<String>, description: impl Into<String>, run_duration_ms: u64, streams: Vec<StreamShape>) -> Self {
        Self {
            filename: filename.into(),
            description: description.into(),
            created_at: Utc::now(),
            run_duration_ms,
            streams,
        }
    }

    /// Builds the header for a continuation file (spec §4.2):
    /// `description = old_description + "\nContinuation of file <old_filename>"`,
    /// retaining stream shapes and stamping a fresh creation time.
    pub fn continuation_of(&self, new_filename: impl Into<String>) -> Self {
        Self {
            filename: new_filename.into(),
            description: format!("{}\nContinuation of file {}", self.description, self.filename),
            created_at: Utc::now(),
            run_duration_ms: self.run_duration_ms,
            streams: self.streams.clone(),
        }
    }

    /// True when `other` is a valid continuation of `self`: matching stream
    /// shapes by channel count, record size, data type size, data format,
    /// and bit depth (spec §8 invariant 5).
    pub fn is_compatible_continuation(&self, other: &FileHeader) -> bool {
        self.streams == other.streams
            && other.description.ends_with(&format!("\nContinuation of file {}", self.filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> StreamShape {
        StreamShape { channel_count: 2, record_size: 4096, data_type_size: 4, data_format: "float".into(), bit_depth: 32 }
    }

    #[test]
    fn continuation_header_description_and_shapes() {
        let original = FileHeader::new("sandfly_out_0.egg", "run 1", 1500, vec![shape()]);
        let cont = original.continuation_of("sandfly_out_0_1.egg");
        assert!(cont.description.ends_with("\nContinuation of file sandfly_out_0.egg"));
        assert_eq!(cont.streams, original.streams);
        assert!(original.is_compatible_continuation(&cont));
    }

    #[test]
    fn mismatched_shapes_are_incompatible() {
        let original = FileHeader::new("a.egg", "d", 0, vec![shape()]);
        let mut other_shape = shape();
        other_shape.channel_count = 4;
        let bad = FileHeader::new("a_1.egg", "d\nContinuation of file a.egg", 0, vec![other_shape]);
        assert!(!original.is_compatible_continuation(&bad));
    }
}
