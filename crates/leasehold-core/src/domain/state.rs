//! Where an envelope lives, and what a worker slot is doing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The logical structure holding an envelope.
///
/// An envelope is in exactly one of these, or in none once it has been
/// acknowledged or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// Waiting for its activation time.
    Delayed,
    /// Ready to be leased.
    Pending,
    /// Leased by a worker.
    Processing,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Location::Delayed => "delayed",
            Location::Pending => "pending",
            Location::Processing => "processing",
        })
    }
}

/// Worker slot state.
///
/// State transitions:
/// - Idle -> Leased -> Running -> Idle
///
/// A slot only calls `dequeue` while Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SlotState {
    Idle = 0,
    Leased = 1,
    Running = 2,
}

impl SlotState {
    pub fn is_busy(self) -> bool {
        !matches!(self, SlotState::Idle)
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => SlotState::Leased,
            2 => SlotState::Running,
            _ => SlotState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SlotState::Idle, false)]
    #[case(SlotState::Leased, true)]
    #[case(SlotState::Running, true)]
    fn busy_slots(#[case] state: SlotState, #[case] busy: bool) {
        assert_eq!(state.is_busy(), busy);
        assert_eq!(SlotState::from_u8(state as u8), state);
    }

    #[test]
    fn location_displays_structure_name() {
        assert_eq!(Location::Pending.to_string(), "pending");
        assert_eq!(Location::Delayed.to_string(), "delayed");
        assert_eq!(Location::Processing.to_string(), "processing");
    }
}
