//! Sandbox contract types (§4.1): the limits a run is bounded by and the
//! report a run produces. Shared by every `Sandbox` backend.

use std::fmt;

/// Resource caps applied to a single sandbox `run` (§4.1, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub wall_ms: i64,
    pub cpu_ms: i64,
    pub memory_kb: i64,
    pub stack_kb: i64,
    pub file_size_kb: i64,
    pub processes: i32,
}

impl Limits {
    /// `cpu_ms` defaults to `wall_ms` when not overridden (§6).
    pub fn wall_only(wall_ms: i64, memory_kb: i64) -> Self {
        Self {
            wall_ms,
            cpu_ms: wall_ms,
            memory_kb,
            stack_kb: memory_kb,
            file_size_kb: 64 * 1024,
            processes: 1,
        }
    }
}

/// How a sandboxed run terminated (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Ok,
    Signal,
    Timeout,
    Memory,
    Runtime,
    Internal,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitKind::Ok => "ok",
            ExitKind::Signal => "signal",
            ExitKind::Timeout => "timeout",
            ExitKind::Memory => "memory",
            ExitKind::Runtime => "runtime",
            ExitKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Captured output from a sandboxed run. Overflow of `stdout`/`stderr` past
/// their byte caps is a flagged truncation, not an error (§4.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub exit_kind: ExitKind,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_ms: i64,
    pub cpu_ms: i64,
    pub peak_memory_kb: i64,
    pub stdout: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr: Vec<u8>,
    pub stderr_truncated: bool,
}

impl Report {
    pub fn exceeded_memory(&self, limit_kb: i64) -> bool {
        self.peak_memory_kb > limit_kb
    }
}
