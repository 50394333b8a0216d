//! Dispatch Gateway — the SINGLE choke-point for acquiring a sandbox slot.
//!
//! # Invariant (enforced at both compile-time and runtime)
//!
//! **Compile-time:** the wrapped `Sandbox` is private. External crates have
//! no way to reach a sandbox backend except through `DispatchGateway`.
//!
//! **Runtime:** every `acquire` call evaluates the pool-gate verdict before
//! delegating. A worker that bypassed this gateway could acquire a slot
//! while the pool supervisor has disarmed the pool after repeated
//! `acquire` failures (§4.1 policy, §7 "sandbox slot lost") — this type
//! makes that impossible to express.

use crate::sandbox::{Sandbox, SandboxError};
use crate::types::{Limits, Report};

/// Pre-evaluated pool-gate verdict the caller must supply before every
/// `acquire`. Sourced from the pool supervisor's armed/disarmed state
/// (supplemented feature, see DESIGN.md "Pool fail-closed supervisor gate").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolVerdict {
    pub pool_armed: bool,
}

impl PoolVerdict {
    pub fn armed() -> Self {
        Self { pool_armed: true }
    }

    pub fn disarmed() -> Self {
        Self { pool_armed: false }
    }
}

/// The reason a sandbox acquisition was refused at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRefusal {
    PoolDisarmed,
}

impl std::fmt::Display for GateRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRefusal::PoolDisarmed => write!(f, "GATE_REFUSED: sandbox pool is disarmed"),
        }
    }
}

impl std::error::Error for GateRefusal {}

/// Either a gate refusal or an underlying sandbox-backend error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Gate(GateRefusal),
    Sandbox(SandboxError),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Gate(g) => write!(f, "{g}"),
            DispatchError::Sandbox(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// The SINGLE choke-point through which every sandbox acquisition must flow.
pub struct DispatchGateway<S: Sandbox> {
    sandbox: S,
}

impl<S: Sandbox> DispatchGateway<S> {
    pub fn new(sandbox: S) -> Self {
        Self { sandbox }
    }

    /// Acquire a sandbox slot, refusing if the pool is disarmed.
    pub fn acquire(&self, box_id: i32, verdict: PoolVerdict) -> Result<S::Box, DispatchError> {
        if !verdict.pool_armed {
            return Err(DispatchError::Gate(GateRefusal::PoolDisarmed));
        }
        self.sandbox.acquire(box_id).map_err(DispatchError::Sandbox)
    }

    /// Run inside an already-acquired box. Gated identically to `acquire`
    /// so a worker cannot keep running in a box it held before the pool
    /// was disarmed.
    pub fn run(
        &self,
        sandbox_box: &S::Box,
        argv: &[String],
        limits: Limits,
        stdin: crate::sandbox::Stdin,
        stdout_cap: usize,
        stderr_cap: usize,
        verdict: PoolVerdict,
    ) -> Result<Report, DispatchError> {
        if !verdict.pool_armed {
            return Err(DispatchError::Gate(GateRefusal::PoolDisarmed));
        }
        self.sandbox
            .run(sandbox_box, argv, limits, stdin, stdout_cap, stderr_cap)
            .map_err(DispatchError::Sandbox)
    }

    pub fn stage_file(&self, sandbox_box: &S::Box, relative_path: &str, contents: &[u8]) -> Result<(), DispatchError> {
        self.sandbox
            .stage_file(sandbox_box, relative_path, contents)
            .map_err(DispatchError::Sandbox)
    }

    /// Release never goes through the pool gate: a disarmed pool must
    /// still allow releasing slots so cleanup can proceed.
    pub fn release(&self, sandbox_box: S::Box) -> Result<(), DispatchError> {
        self.sandbox.release(sandbox_box).map_err(DispatchError::Sandbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxBox, Stdin};
    use crate::types::ExitKind;

    struct FakeBox(i32);
    impl SandboxBox for FakeBox {
        fn box_id(&self) -> i32 {
            self.0
        }
    }

    struct AlwaysOkSandbox;
    impl Sandbox for AlwaysOkSandbox {
        type Box = FakeBox;

        fn acquire(&self, box_id: i32) -> Result<Self::Box, SandboxError> {
            Ok(FakeBox(box_id))
        }

        fn run(
            &self,
            _sandbox_box: &Self::Box,
            _argv: &[String],
            _limits: Limits,
            _stdin: Stdin,
            _stdout_cap: usize,
            _stderr_cap: usize,
        ) -> Result<Report, SandboxError> {
            Ok(Report {
                exit_kind: ExitKind::Ok,
                exit_code: Some(0),
                signal: None,
                wall_ms: 1,
                cpu_ms: 1,
                peak_memory_kb: 1,
                stdout: Vec::new(),
                stdout_truncated: false,
                stderr: Vec::new(),
                stderr_truncated: false,
            })
        }

        fn release(&self, _sandbox_box: Self::Box) -> Result<(), SandboxError> {
            Ok(())
        }

        fn stage_file(&self, _sandbox_box: &Self::Box, _relative_path: &str, _contents: &[u8]) -> Result<(), SandboxError> {
            Ok(())
        }
    }

    #[test]
    fn armed_pool_allows_acquire() {
        let gw = DispatchGateway::new(AlwaysOkSandbox);
        assert!(gw.acquire(0, PoolVerdict::armed()).is_ok());
    }

    #[test]
    fn disarmed_pool_refuses_acquire() {
        let gw = DispatchGateway::new(AlwaysOkSandbox);
        let err = gw.acquire(0, PoolVerdict::disarmed()).unwrap_err();
        assert_eq!(err, DispatchError::Gate(GateRefusal::PoolDisarmed));
    }

    #[test]
    fn disarmed_pool_refuses_run_even_on_held_box() {
        let gw = DispatchGateway::new(AlwaysOkSandbox);
        let b = gw.acquire(0, PoolVerdict::armed()).unwrap();
        let err = gw
            .run(&b, &[], Limits::wall_only(1000, 1024), Stdin::None, 1024, 1024, PoolVerdict::disarmed())
            .unwrap_err();
        assert_eq!(err, DispatchError::Gate(GateRefusal::PoolDisarmed));
    }

    #[test]
    fn release_bypasses_the_pool_gate() {
        let gw = DispatchGateway::new(AlwaysOkSandbox);
        let b = gw.acquire(0, PoolVerdict::armed()).unwrap();
        assert!(gw.release(b).is_ok());
    }
}
