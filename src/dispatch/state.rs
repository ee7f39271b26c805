// src/dispatch/state.rs

//! Job lifecycle transition rules.
//!
//! All state changes, whichever side they come from, are checked here before
//! a record is touched. A rejected transition leaves the record unchanged.

use crate::errors::{DispatchError, Result};
use crate::types::JobState;

/// Whether `from -> to` is a legal lifecycle transition.
///
/// - Nothing leaves a terminal state.
/// - Nothing enters `Invalid`; records are created directly in `Running`.
/// - `Running -> Suspended` and `Suspended -> Running` model suspend/resume.
/// - `Running` and `Suspended` may both finish in any terminal state.
pub fn is_valid_transition(from: JobState, to: JobState) -> bool {
    use JobState::*;

    match (from, to) {
        (_, Invalid) => false,
        (Completed | Failed | Canceled, _) => false,
        (Invalid, _) => false,
        (Running, Suspended) | (Suspended, Running) => true,
        (Running | Suspended, Completed | Failed | Canceled) => true,
        (Running, Running) | (Suspended, Suspended) => false,
    }
}

/// Validate a transition for the job described by `descr`.
pub fn check_transition(descr: &str, from: JobState, to: JobState) -> Result<()> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(DispatchError::invalid_transition(descr, from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobState::*;

    const ALL: [JobState; 6] = [Invalid, Running, Suspended, Completed, Failed, Canceled];

    #[test]
    fn terminal_states_are_final() {
        for from in [Completed, Failed, Canceled] {
            for to in ALL {
                assert!(!is_valid_transition(from, to), "{from} -> {to} accepted");
            }
        }
    }

    #[test]
    fn suspend_and_resume_require_exact_precondition() {
        assert!(is_valid_transition(Running, Suspended));
        assert!(is_valid_transition(Suspended, Running));
        assert!(!is_valid_transition(Suspended, Suspended));
        assert!(!is_valid_transition(Running, Running));
    }

    #[test]
    fn rejection_names_both_states() {
        let err = check_transition("job-a", Completed, Running).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("completed") && msg.contains("running"), "{msg}");
    }
}
