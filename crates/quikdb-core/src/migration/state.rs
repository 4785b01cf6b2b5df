//! Runner state machine.

use serde::Serialize;
use std::fmt;

/// Phase of a [`MigrationRunner`](super::MigrationRunner).
///
/// `Idle → Stepping → Validating → Done`, with `Failed` reachable from any
/// phase. `Done` and `Failed` are terminal for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    /// Version read, nothing applied yet.
    Idle {
        /// Stamped version.
        at: u64,
    },
    /// Applying steps.
    Stepping {
        /// Version committed so far.
        at: u64,
        /// Version being migrated to.
        target: u64,
    },
    /// Checking the end state.
    Validating,
    /// The store is current.
    Done,
    /// The run stopped on an error.
    Failed,
}

impl RunnerPhase {
    /// Check if the phase ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerPhase::Done | RunnerPhase::Failed)
    }

    /// Check if `next` may follow this phase.
    pub fn can_advance_to(&self, next: &RunnerPhase) -> bool {
        match (self, next) {
            (_, RunnerPhase::Failed) => !self.is_terminal(),
            (RunnerPhase::Idle { .. }, RunnerPhase::Stepping { .. }) => true,
            (RunnerPhase::Idle { .. }, RunnerPhase::Done) => true,
            (RunnerPhase::Stepping { at, target }, RunnerPhase::Stepping { at: next_at, target: t }) => {
                t == target && next_at == &(at + 1)
            }
            (RunnerPhase::Stepping { .. }, RunnerPhase::Validating) => true,
            (RunnerPhase::Validating, RunnerPhase::Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunnerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerPhase::Idle { at } => write!(f, "idle at v{}", at),
            RunnerPhase::Stepping { at, target } => write!(f, "stepping v{} -> v{}", at, target),
            RunnerPhase::Validating => write!(f, "validating"),
            RunnerPhase::Done => write!(f, "done"),
            RunnerPhase::Failed => write!(f, "failed"),
        }
    }
}
