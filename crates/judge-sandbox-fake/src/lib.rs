//! Deterministic in-memory sandbox backend (§4.1, §9 "polymorphism across
//! sandbox backends": "a fake in-process sandbox used for tests").
//!
//! Design decisions (kept intentionally simple/deterministic, the same way
//! the teacher's paper broker adapter was built):
//! - No real process is ever spawned; every `run` returns a [`Report`]
//!   scripted ahead of time by the caller via [`FakeSandbox::script`].
//! - No randomness, no wall clock. Callers that want TLE/MLE behavior script
//!   a `Report` with the matching `exit_kind` directly.
//! - Slots are exclusive, exactly like a real backend: `acquire` on an
//!   already-held `box_id` fails.
//! - Staged files are retained so tests can assert on what a worker wrote
//!   into a box (source code, stdin) without a filesystem.

pub mod types;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;

use judge_execution::{Limits, Report, Sandbox, SandboxBox, SandboxError, Stdin};

use types::StagedFiles;

/// A reserved slot in the fake sandbox. Carries its staged-files view so a
/// test can inspect what a worker wrote before a scripted `run`.
pub struct FakeBox {
    box_id: i32,
    staged: StagedFiles,
}

impl SandboxBox for FakeBox {
    fn box_id(&self) -> i32 {
        self.box_id
    }
}

impl FakeBox {
    pub fn staged(&self) -> &StagedFiles {
        &self.staged
    }
}

#[derive(Default)]
struct Inner {
    held: BTreeSet<i32>,
    scripted_runs: BTreeMap<i32, VecDeque<Report>>,
    /// When set for a box, the next `acquire` for it fails once, then clears.
    next_acquire_fails: BTreeSet<i32>,
    staged_by_box: BTreeMap<i32, BTreeMap<String, Vec<u8>>>,
}

/// A fake [`Sandbox`] backend driven entirely by pre-scripted [`Report`]s.
pub struct FakeSandbox {
    inner: Mutex<Inner>,
}

impl Default for FakeSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Queue the `Report` the next `run` against `box_id` will return.
    /// Scripted reports for a box are consumed in FIFO order, one per `run`
    /// call, mirroring one test case at a time.
    pub fn script(&self, box_id: i32, report: Report) {
        self.inner
            .lock()
            .expect("fake sandbox mutex poisoned")
            .scripted_runs
            .entry(box_id)
            .or_default()
            .push_back(report);
    }

    /// Make the next `acquire(box_id)` fail once (§7 "sandbox slot lost").
    pub fn fail_next_acquire(&self, box_id: i32) {
        self.inner
            .lock()
            .expect("fake sandbox mutex poisoned")
            .next_acquire_fails
            .insert(box_id);
    }

    /// Bytes staged into `box_id` by relative path, for test assertions.
    pub fn staged_files(&self, box_id: i32) -> BTreeMap<String, Vec<u8>> {
        self.inner
            .lock()
            .expect("fake sandbox mutex poisoned")
            .staged_by_box
            .get(&box_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Sandbox for FakeSandbox {
    type Box = FakeBox;

    fn acquire(&self, box_id: i32) -> Result<Self::Box, SandboxError> {
        let mut inner = self.inner.lock().expect("fake sandbox mutex poisoned");

        if inner.next_acquire_fails.remove(&box_id) {
            return Err(SandboxError::AcquireFailed {
                box_id,
                reason: "scripted acquire failure".to_string(),
            });
        }

        if !inner.held.insert(box_id) {
            return Err(SandboxError::AcquireFailed {
                box_id,
                reason: "box already held".to_string(),
            });
        }

        inner.staged_by_box.entry(box_id).or_default();

        Ok(FakeBox {
            box_id,
            staged: StagedFiles::new(box_id),
        })
    }

    fn run(
        &self,
        sandbox_box: &Self::Box,
        _argv: &[String],
        _limits: Limits,
        _stdin: Stdin,
        stdout_cap: usize,
        stderr_cap: usize,
    ) -> Result<Report, SandboxError> {
        let box_id = sandbox_box.box_id();
        let mut inner = self.inner.lock().expect("fake sandbox mutex poisoned");

        if !inner.held.contains(&box_id) {
            return Err(SandboxError::RunFailed {
                box_id,
                reason: "run on a box that was never acquired".to_string(),
            });
        }

        let mut report = inner
            .scripted_runs
            .get_mut(&box_id)
            .and_then(|q| q.pop_front())
            .ok_or_else(|| SandboxError::RunFailed {
                box_id,
                reason: "no scripted report queued for this box".to_string(),
            })?;

        if report.stdout.len() > stdout_cap {
            report.stdout.truncate(stdout_cap);
            report.stdout_truncated = true;
        }
        if report.stderr.len() > stderr_cap {
            report.stderr.truncate(stderr_cap);
            report.stderr_truncated = true;
        }

        Ok(report)
    }

    fn release(&self, sandbox_box: Self::Box) -> Result<(), SandboxError> {
        let box_id = sandbox_box.box_id();
        let mut inner = self.inner.lock().expect("fake sandbox mutex poisoned");
        if !inner.held.remove(&box_id) {
            return Err(SandboxError::ReleaseFailed {
                box_id,
                reason: "box was not held".to_string(),
            });
        }
        inner.staged_by_box.remove(&box_id);
        Ok(())
    }

    fn stage_file(&self, sandbox_box: &Self::Box, relative_path: &str, contents: &[u8]) -> Result<(), SandboxError> {
        let box_id = sandbox_box.box_id();
        let mut inner = self.inner.lock().expect("fake sandbox mutex poisoned");
        inner
            .staged_by_box
            .entry(box_id)
            .or_default()
            .insert(relative_path.to_string(), contents.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use judge_execution::ExitKind;

    fn ok_report(stdout: &[u8]) -> Report {
        Report {
            exit_kind: ExitKind::Ok,
            exit_code: Some(0),
            signal: None,
            wall_ms: 5,
            cpu_ms: 5,
            peak_memory_kb: 1024,
            stdout: stdout.to_vec(),
            stdout_truncated: false,
            stderr: Vec::new(),
            stderr_truncated: false,
        }
    }

    #[test]
    fn scripted_report_is_returned_in_fifo_order() {
        let sandbox = FakeSandbox::new();
        sandbox.script(0, ok_report(b"first\n"));
        sandbox.script(0, ok_report(b"second\n"));

        let b = sandbox.acquire(0).unwrap();
        let r1 = sandbox.run(&b, &[], Limits::wall_only(1000, 1024), Stdin::None, 1024, 1024).unwrap();
        let r2 = sandbox.run(&b, &[], Limits::wall_only(1000, 1024), Stdin::None, 1024, 1024).unwrap();

        assert_eq!(r1.stdout, b"first\n");
        assert_eq!(r2.stdout, b"second\n");
    }

    #[test]
    fn slots_are_exclusive() {
        let sandbox = FakeSandbox::new();
        let _b = sandbox.acquire(0).unwrap();
        let err = sandbox.acquire(0).unwrap_err();
        assert!(matches!(err, SandboxError::AcquireFailed { box_id: 0, .. }));
    }

    #[test]
    fn release_frees_the_slot_for_reacquisition() {
        let sandbox = FakeSandbox::new();
        let b = sandbox.acquire(0).unwrap();
        sandbox.release(b).unwrap();
        assert!(sandbox.acquire(0).is_ok());
    }

    #[test]
    fn scripted_acquire_failure_fires_once() {
        let sandbox = FakeSandbox::new();
        sandbox.fail_next_acquire(0);

        let err = sandbox.acquire(0).unwrap_err();
        assert!(matches!(err, SandboxError::AcquireFailed { box_id: 0, .. }));

        // The scripted failure is one-shot; the retry succeeds.
        assert!(sandbox.acquire(0).is_ok());
    }

    #[test]
    fn staged_files_are_recorded_per_box() {
        let sandbox = FakeSandbox::new();
        let b = sandbox.acquire(0).unwrap();
        sandbox.stage_file(&b, "main.cpp", b"int main(){}").unwrap();

        let staged = sandbox.staged_files(0);
        assert_eq!(staged.get("main.cpp").map(Vec::as_slice), Some(b"int main(){}".as_slice()));
    }

    #[test]
    fn output_past_cap_is_truncated_not_errored() {
        let sandbox = FakeSandbox::new();
        sandbox.script(0, ok_report(b"0123456789"));
        let b = sandbox.acquire(0).unwrap();

        let report = sandbox.run(&b, &[], Limits::wall_only(1000, 1024), Stdin::None, 4, 4).unwrap();
        assert_eq!(report.stdout, b"0123");
        assert!(report.stdout_truncated);
    }
}
