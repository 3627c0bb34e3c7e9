// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Controller Status
//!
//! Numeric codes are stable because they are surfaced over the RPC bus
//! (`daq-status`'s `status-value`). They match the original run controller
//! exactly: `deactivated=0, activating=2, activated=4, running=5,
//! deactivating=6, canceled=8, do_restart=9, done=10, error=200`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RunState {
    Deactivated = 0,
    Activating = 2,
    Activated = 4,
    Running = 5,
    Deactivating = 6,
    Canceled = 8,
    DoRestart = 9,
    Done = 10,
    Error = 200,
}

impl RunState {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Deactivated,
            2 => Self::Activating,
            4 => Self::Activated,
            5 => Self::Running,
            6 => Self::Deactivating,
            8 => Self::Canceled,
            9 => Self::DoRestart,
            10 => Self::Done,
            200 => Self::Error,
            _ => return None,
        })
    }

    pub fn interpret(self) -> &'static str {
        match self {
            Self::Deactivated => "deactivated",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Running => "running",
            Self::Deactivating => "deactivating",
            Self::Canceled => "canceled",
            Self::DoRestart => "do_restart",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Whether this status is a terminal state for the run controller.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.interpret())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_numeric_codes() {
        for state in [
            RunState::Deactivated,
            RunState::Activating,
            RunState::Activated,
            RunState::Running,
            RunState::Deactivating,
            RunState::Canceled,
            RunState::DoRestart,
            RunState::Done,
            RunState::Error,
        ] {
            assert_eq!(RunState::from_u32(state.to_u32()), Some(state));
        }
    }

    #[test]
    fn exact_wire_codes() {
        assert_eq!(RunState::Deactivated.to_u32(), 0);
        assert_eq!(RunState::Activating.to_u32(), 2);
        assert_eq!(RunState::Activated.to_u32(), 4);
        assert_eq!(RunState::Running.to_u32(), 5);
        assert_eq!(RunState::Deactivating.to_u32(), 6);
        assert_eq!(RunState::Canceled.to_u32(), 8);
        assert_eq!(RunState::DoRestart.to_u32(), 9);
        assert_eq!(RunState::Done.to_u32(), 10);
        assert_eq!(RunState::Error.to_u32(), 200);
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(RunState::from_u32(7), None);
    }

    #[test]
    fn terminal_states() {
        assert!(RunState::Done.is_terminal());
        assert!(RunState::Error.is_terminal());
        assert!(RunState::Canceled.is_terminal());
        assert!(!RunState::Activated.is_terminal());
    }
}
