// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Platform Facts
//!
//! Sandfly only needs a core count (to size the default worker pool) and a
//! scratch directory; unlike the teacher's bootstrap crate this drops the
//! `libc`/`winapi` permission and elevation bindings — see DESIGN.md for the
//! rationale.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("platform operation not supported: {0}")]
    NotSupported(String),
}

pub trait Platform: Send + Sync {
    /// Number of logical CPUs available, used to size default worker pools.
    fn cpu_count(&self) -> usize;

    /// Directory for transient scratch files.
    fn temp_dir(&self) -> PathBuf;

    /// Human-readable platform name for log banners.
    fn platform_name(&self) -> &'static str;
}

pub struct StdPlatform;

impl Platform for StdPlatform {
    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    fn platform_name(&self) -> &'static str {
        std::env::consts::OS
    }
}

pub fn create_platform() -> Box<dyn Platform> {
    Box::new(StdPlatform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_count_is_positive() {
        assert!(create_platform().cpu_count() >= 1);
    }
}
