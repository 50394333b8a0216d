//! Submission state machine (§4.2) — the per-submission lifecycle driven
//! by one worker end-to-end.
//!
//! # Design
//!
//! Explicit state machine for a single submission's judging pipeline.
//! Every lifecycle event is applied via [`SubmissionStateMachine::apply`],
//! which enforces two invariants:
//!
//! 1. **Legal transitions only.** Illegal events return
//!    [`TransitionError`].
//! 2. **Idempotent replay.** If an `event_id` is supplied and has already
//!    been applied, the call is a silent no-op (§8 invariant 3: redelivering
//!    the same `judge-submission` task k times yields exactly one terminal
//!    state).
//!
//! # State diagram
//!
//! ```text
//!   new()        Claim           CompileFailed
//!   ──────► Pending ──────► Judging ──────────────► Terminal(CompileError)
//!                               │  │
//!                  FetchFailed  │  │ TestOutcome(non-accepted)
//!            ◄───────────────── │  └───────────────► Terminal(that verdict)
//!   Terminal(InternalError)     │
//!                               │ AllTestsPassed
//!                               └───────────────────► Terminal(Accepted)
//! ```
//!
//! Once a submission reaches a terminal verdict it never re-enters a
//! non-terminal state (§3 invariant); a re-judge creates a new submission
//! rather than resetting this one.

use std::collections::HashSet;

use judge_schemas::{TestVerdict, Verdict};

/// All valid states a submission occupies while in this worker's hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    /// Not yet claimed by a worker.
    Pending,
    /// Claimed; fetch/compile/run-tests in progress.
    Judging,
    /// Reached a terminal verdict.
    Terminal(Verdict),
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionState::Terminal(_))
    }
}

/// Events that drive transitions in a [`SubmissionStateMachine`] (§4.2
/// steps 1-5).
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionEvent {
    /// Worker claimed the pending submission (§4.2 step 1).
    Claim,
    /// Blob fetch or problem-metadata fetch failed (§4.2 step 2).
    FetchFailed,
    /// Non-zero compile exit; `stderr` is captured separately by the caller
    /// (§4.2 step 3).
    CompileFailed,
    /// One test case produced a non-accepted verdict; this is the
    /// submission's verdict per the "first non-accepted in ordinal order"
    /// rule (§4.2 step 4).
    TestOutcome(TestVerdict),
    /// Every test case passed (§4.2 step 4-5).
    AllTestsPassed,
}

/// Returned when an event cannot legally be applied in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: SubmissionState,
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal submission transition: {:?} + {}", self.from, self.event)
    }
}

impl std::error::Error for TransitionError {}

/// Drives one submission through its judging lifecycle.
///
/// # Idempotency
///
/// Every call to [`apply`][`SubmissionStateMachine::apply`] accepts an
/// optional `event_id`. When supplied, the event ID is stored in an
/// internal set; subsequent calls with the same `event_id` are silently
/// ignored. A redelivered `judge-submission` task therefore converges to
/// the same terminal state instead of re-running the pipeline (§8
/// invariant 3).
#[derive(Debug, Clone)]
pub struct SubmissionStateMachine {
    pub submission_id: i64,
    pub state: SubmissionState,
    applied: HashSet<String>,
}

impl SubmissionStateMachine {
    pub fn new(submission_id: i64) -> Self {
        Self {
            submission_id,
            state: SubmissionState::Pending,
            applied: HashSet::new(),
        }
    }

    /// Resume a submission already claimed (e.g. recovered after a
    /// reclaim scan); skips straight to `Judging`.
    pub fn resume_judging(submission_id: i64) -> Self {
        Self {
            submission_id,
            state: SubmissionState::Judging,
            applied: HashSet::new(),
        }
    }

    pub fn apply(
        &mut self,
        event: &SubmissionEvent,
        event_id: Option<&str>,
    ) -> Result<(), TransitionError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(());
            }
        }

        self.do_transition(event)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }

        Ok(())
    }

    fn do_transition(&mut self, event: &SubmissionEvent) -> Result<(), TransitionError> {
        use SubmissionEvent::*;
        use SubmissionState::*;

        match (self.state, event) {
            (Pending, Claim) => self.state = Judging,

            (Judging, FetchFailed) => self.state = Terminal(Verdict::InternalError),

            (Judging, CompileFailed) => self.state = Terminal(Verdict::CompileError),

            (Judging, TestOutcome(tv)) => self.state = Terminal(tv.as_submission_verdict()),

            (Judging, AllTestsPassed) => self.state = Terminal(Verdict::Accepted),

            // A terminal submission never re-enters judging; a redelivered
            // claim on an already-terminal row is handled by the caller
            // before the state machine is even constructed (§4.2 step 1).
            (state, ev) => {
                return Err(TransitionError {
                    from: state,
                    event: format!("{ev:?}"),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimed() -> SubmissionStateMachine {
        let mut m = SubmissionStateMachine::new(1);
        m.apply(&SubmissionEvent::Claim, Some("claim-1")).unwrap();
        m
    }

    #[test]
    fn new_submission_starts_pending() {
        let m = SubmissionStateMachine::new(1);
        assert_eq!(m.state, SubmissionState::Pending);
        assert!(!m.state.is_terminal());
    }

    #[test]
    fn claim_moves_to_judging() {
        let m = claimed();
        assert_eq!(m.state, SubmissionState::Judging);
    }

    #[test]
    fn claim_is_idempotent_under_redelivery() {
        let mut m = SubmissionStateMachine::new(1);
        m.apply(&SubmissionEvent::Claim, Some("claim-1")).unwrap();
        m.apply(&SubmissionEvent::Claim, Some("claim-1")).unwrap();
        assert_eq!(m.state, SubmissionState::Judging);
    }

    #[test]
    fn fetch_failure_is_internal_error() {
        let mut m = claimed();
        m.apply(&SubmissionEvent::FetchFailed, Some("e1")).unwrap();
        assert_eq!(m.state, SubmissionState::Terminal(Verdict::InternalError));
    }

    #[test]
    fn compile_failure_is_compile_error() {
        let mut m = claimed();
        m.apply(&SubmissionEvent::CompileFailed, Some("e1")).unwrap();
        assert_eq!(m.state, SubmissionState::Terminal(Verdict::CompileError));
    }

    #[test]
    fn first_failing_test_becomes_the_verdict() {
        let mut m = claimed();
        m.apply(&SubmissionEvent::TestOutcome(TestVerdict::WrongAnswer), Some("e1"))
            .unwrap();
        assert_eq!(m.state, SubmissionState::Terminal(Verdict::WrongAnswer));
    }

    #[test]
    fn all_tests_passed_is_accepted() {
        let mut m = claimed();
        m.apply(&SubmissionEvent::AllTestsPassed, Some("e1")).unwrap();
        assert_eq!(m.state, SubmissionState::Terminal(Verdict::Accepted));
    }

    #[test]
    fn terminal_state_rejects_further_events() {
        let mut m = claimed();
        m.apply(&SubmissionEvent::AllTestsPassed, Some("e1")).unwrap();
        let err = m
            .apply(&SubmissionEvent::TestOutcome(TestVerdict::Tle), Some("e2"))
            .unwrap_err();
        assert_eq!(err.from, SubmissionState::Terminal(Verdict::Accepted));
        assert_eq!(m.state, SubmissionState::Terminal(Verdict::Accepted));
    }

    #[test]
    fn redelivered_terminal_event_is_a_noop_not_a_double_apply() {
        let mut m = claimed();
        m.apply(&SubmissionEvent::AllTestsPassed, Some("finalize-1"))
            .unwrap();
        // Same event_id redelivered: silently skipped, no error even though
        // the state machine is already terminal.
        m.apply(&SubmissionEvent::AllTestsPassed, Some("finalize-1"))
            .unwrap();
        assert_eq!(m.state, SubmissionState::Terminal(Verdict::Accepted));
    }

    #[test]
    fn claim_on_judging_is_illegal() {
        let mut m = claimed();
        let err = m.apply(&SubmissionEvent::Claim, Some("claim-2")).unwrap_err();
        assert_eq!(err.from, SubmissionState::Judging);
    }
}
