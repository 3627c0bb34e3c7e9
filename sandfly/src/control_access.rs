// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Control Access (C1)
//!
//! A process-wide weak handle to the current Run Controller. Late-bound
//! components (the Batch Executor) consult it to discover readiness
//! without creating a construction cycle: handler-bearing components are
//! built before the controller they must call into (spec §4.1).
//!
//! Per spec §9's Design Notes, this is an explicit registry value owned by
//! the Conductor and cloned into components that need it, rather than a
//! process-global singleton.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::run_controller::RunController;

#[derive(Default)]
pub struct ControlAccess {
    controller: RwLock<Weak<RunController>>,
}

impl ControlAccess {
    pub fn new() -> Self {
        Self { controller: RwLock::new(Weak::new()) }
    }

    /// Registers the current Run Controller. Called once by the Conductor
    /// after constructing it.
    pub fn set(&self, controller: Weak<RunController>) {
        *self.controller.write() = controller;
    }

    /// Attempts to upgrade the weak handle to a strong reference.
    pub fn try_get(&self) -> Option<Arc<RunController>> {
        self.controller.read().upgrade()
    }

    /// True once the registered controller has been dropped.
    pub fn expired(&self) -> bool {
        self.controller.read().strong_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_expired() {
        let access = ControlAccess::new();
        assert!(access.expired());
        assert!(access.try_get().is_none());
    }
}
