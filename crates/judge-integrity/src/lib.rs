//! Pool fail-closed supervisor gate: the Judge Worker Pool's source of
//! truth for [`judge_execution::gateway::PoolVerdict`].
//!
//! Two consecutive sandbox `acquire` failures (from any worker, §4.1 policy
//! "sandbox slot lost") trip the gate to `Disarmed`. Boot is always
//! fail-closed — a prior session's armed state is never trusted across a
//! restart; an operator (or the pool supervisor itself, once sandboxes are
//! confirmed healthy) must call [`PoolGate::arm`] explicitly.

use judge_execution::gateway::PoolVerdict;

/// Why the pool is currently disarmed. Kept distinct from a boolean so an
/// operator inspecting `/v1/pool/status` can see the cause, not just the
/// fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisarmReason {
    /// The pool has not been armed since the process started.
    BootDefault,
    /// An operator disarmed the pool (e.g. `judge-cli pool disarm`).
    ManualDisarm,
    /// A worker saw two consecutive sandbox `acquire` failures.
    ConsecutiveAcquireFailures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolGateState {
    Armed,
    Disarmed { reason: DisarmReason },
}

impl PoolGateState {
    pub fn is_armed(self) -> bool {
        matches!(self, PoolGateState::Armed)
    }
}

/// The pool supervisor's gate. One instance is shared (behind a mutex, in
/// `judge-runtime`) across all workers in a process; every worker's
/// `acquire` attempt reports its outcome here before the gateway call, and
/// every worker must ask for a fresh [`PoolVerdict`] on its next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolGate {
    state: PoolGateState,
    consecutive_acquire_failures: u32,
}

impl PoolGate {
    /// Fail-closed boot: always starts disarmed, regardless of what a prior
    /// process run left behind.
    pub fn boot() -> Self {
        Self {
            state: PoolGateState::Disarmed {
                reason: DisarmReason::BootDefault,
            },
            consecutive_acquire_failures: 0,
        }
    }

    pub fn state(&self) -> PoolGateState {
        self.state
    }

    pub fn verdict(&self) -> PoolVerdict {
        if self.state.is_armed() {
            PoolVerdict::armed()
        } else {
            PoolVerdict::disarmed()
        }
    }

    /// Explicit arm. Resets the consecutive-failure counter: a newly armed
    /// pool gets a clean slate rather than carrying over failures from
    /// before the operator intervened.
    pub fn arm(&mut self) {
        self.state = PoolGateState::Armed;
        self.consecutive_acquire_failures = 0;
    }

    pub fn manual_disarm(&mut self) {
        self.state = PoolGateState::Disarmed {
            reason: DisarmReason::ManualDisarm,
        };
        self.consecutive_acquire_failures = 0;
    }

    /// Report the outcome of a worker's sandbox `acquire` attempt. Call this
    /// after every acquire, success or failure, so the counter resets on a
    /// success sandwiched between failures. Trips the gate on the second
    /// consecutive failure.
    pub fn record_acquire_result(&mut self, succeeded: bool) {
        if succeeded {
            self.consecutive_acquire_failures = 0;
            return;
        }

        self.consecutive_acquire_failures += 1;
        if self.consecutive_acquire_failures >= 2 {
            self.state = PoolGateState::Disarmed {
                reason: DisarmReason::ConsecutiveAcquireFailures,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boots_disarmed_with_boot_default_reason() {
        let gate = PoolGate::boot();
        assert_eq!(
            gate.state(),
            PoolGateState::Disarmed {
                reason: DisarmReason::BootDefault
            }
        );
        assert!(!gate.verdict().pool_armed);
    }

    #[test]
    fn arm_makes_the_pool_armed() {
        let mut gate = PoolGate::boot();
        gate.arm();
        assert_eq!(gate.state(), PoolGateState::Armed);
        assert!(gate.verdict().pool_armed);
    }

    #[test]
    fn a_single_acquire_failure_does_not_trip_the_gate() {
        let mut gate = PoolGate::boot();
        gate.arm();
        gate.record_acquire_result(false);
        assert_eq!(gate.state(), PoolGateState::Armed);
    }

    #[test]
    fn two_consecutive_acquire_failures_trip_the_gate() {
        let mut gate = PoolGate::boot();
        gate.arm();
        gate.record_acquire_result(false);
        gate.record_acquire_result(false);
        assert_eq!(
            gate.state(),
            PoolGateState::Disarmed {
                reason: DisarmReason::ConsecutiveAcquireFailures
            }
        );
    }

    #[test]
    fn a_success_between_failures_resets_the_streak() {
        let mut gate = PoolGate::boot();
        gate.arm();
        gate.record_acquire_result(false);
        gate.record_acquire_result(true);
        gate.record_acquire_result(false);
        assert_eq!(gate.state(), PoolGateState::Armed);
    }

    #[test]
    fn re_arming_resets_the_failure_streak() {
        let mut gate = PoolGate::boot();
        gate.arm();
        gate.record_acquire_result(false);
        gate.arm();
        gate.record_acquire_result(false);
        assert_eq!(gate.state(), PoolGateState::Armed);
    }

    #[test]
    fn manual_disarm_overrides_an_armed_pool() {
        let mut gate = PoolGate::boot();
        gate.arm();
        gate.manual_disarm();
        assert_eq!(
            gate.state(),
            PoolGateState::Disarmed {
                reason: DisarmReason::ManualDisarm
            }
        );
    }
}
