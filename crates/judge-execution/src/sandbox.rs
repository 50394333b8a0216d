//! The Sandbox Driver contract (§4.1, §9 "polymorphism across sandbox
//! backends"). A thin operational contract over an OS-level isolated
//! process environment; `acquire`/`run`/`release` is the full surface
//! every backend (`judge-sandbox-isolate`, `judge-sandbox-fake`) implements.

use crate::types::{Limits, Report};

/// A reserved, clean filesystem root for one `box_id`. Backends attach
/// whatever handle they need (a working directory, a container id, ...)
/// behind their own `Box` type; this trait only fixes the operational
/// contract, not the representation.
pub trait SandboxBox {
    fn box_id(&self) -> i32;
}

/// Bytes or a path, for staging stdin into a sandboxed run (§4.1).
pub enum Stdin {
    Bytes(Vec<u8>),
    Path(std::path::PathBuf),
    None,
}

/// The three operations every sandbox backend exposes (§4.1).
///
/// Guarantees the caller may rely on: a `run` never exceeds `wall_ms` +
/// grace by more than grace; memory overrun produces `ExitKind::Memory`,
/// never `ExitKind::Runtime`; slots are exclusive — at most one `run` per
/// `box_id` at a time.
pub trait Sandbox {
    type Box: SandboxBox;

    /// Reserve sandbox slot `box_id`, creating a clean filesystem root.
    fn acquire(&self, box_id: i32) -> Result<Self::Box, SandboxError>;

    /// Run `argv` inside `sandbox_box` with `limits`. `stdout_cap`/
    /// `stderr_cap` bound captured output in bytes.
    fn run(
        &self,
        sandbox_box: &Self::Box,
        argv: &[String],
        limits: Limits,
        stdin: Stdin,
        stdout_cap: usize,
        stderr_cap: usize,
    ) -> Result<Report, SandboxError>;

    /// Delete the filesystem and free the slot.
    fn release(&self, sandbox_box: Self::Box) -> Result<(), SandboxError>;

    /// Stage a file (source code, test input) into the box's root before a run.
    fn stage_file(&self, sandbox_box: &Self::Box, relative_path: &str, contents: &[u8]) -> Result<(), SandboxError>;
}

/// Failure to acquire, run in, or release a sandbox slot.
///
/// `AcquireFailed` is the variant the pool supervisor watches for (§4.1
/// policy, §7 "sandbox slot lost"): a worker retries once on a best-effort
/// cleanup, and a second failure is fatal to that worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    AcquireFailed { box_id: i32, reason: String },
    RunFailed { box_id: i32, reason: String },
    ReleaseFailed { box_id: i32, reason: String },
    StageFailed { box_id: i32, reason: String },
}

impl std::fmt::Display for SandboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxError::AcquireFailed { box_id, reason } => {
                write!(f, "sandbox {box_id}: acquire failed: {reason}")
            }
            SandboxError::RunFailed { box_id, reason } => {
                write!(f, "sandbox {box_id}: run failed: {reason}")
            }
            SandboxError::ReleaseFailed { box_id, reason } => {
                write!(f, "sandbox {box_id}: release failed: {reason}")
            }
            SandboxError::StageFailed { box_id, reason } => {
                write!(f, "sandbox {box_id}: stage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for SandboxError {}
