//! Production Sandbox Driver backend (§4.1): a thin operational wrapper
//! over the `isolate` CLI (the same contract shape the teacher's live
//! broker adapter used for an external process/HTTP boundary, retargeted
//! here onto a local subprocess instead of a remote API).
//!
//! `isolate` is invoked three ways, one per [`judge_execution::Sandbox`]
//! method: `--init` (acquire), `--run` (run), `--cleanup` (release).
//! Resource usage and the exit classification are read back from the
//! `--meta` file isolate writes, not parsed off stdout/stderr.

mod meta;

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use judge_execution::{Limits, Report, Sandbox, SandboxBox, SandboxError, Stdin};

/// Path to the `isolate` binary (§6 `JUDGE_SANDBOX_BIN`).
pub struct IsolateSandbox {
    binary_path: String,
    /// Whether to pass `--cg` (cgroup-based memory/process accounting).
    /// Always true outside of a test container that lacks cgroup v1/v2
    /// delegation; kept as a field rather than a hardcoded flag so a
    /// constrained CI sandbox can disable it.
    cgroup_enabled: bool,
}

pub struct IsolateBox {
    box_id: i32,
    root: PathBuf,
}

impl SandboxBox for IsolateBox {
    fn box_id(&self) -> i32 {
        self.box_id
    }
}

impl IsolateBox {
    /// The `box/` subdirectory isolate exec's the program inside, where
    /// staged source/input files and the program's own working directory
    /// live (isolate's `--init` reports the box root; `box/` is fixed by
    /// isolate itself).
    fn work_dir(&self) -> PathBuf {
        self.root.join("box")
    }
}

impl IsolateSandbox {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            cgroup_enabled: true,
        }
    }

    pub fn without_cgroup(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            cgroup_enabled: false,
        }
    }

    fn base_args(&self, box_id: i32) -> Vec<String> {
        let mut args = Vec::new();
        if self.cgroup_enabled {
            args.push("--cg".to_string());
        }
        args.push(format!("--box-id={box_id}"));
        args
    }

    fn run_isolate(&self, args: &[String]) -> Result<std::process::Output, String> {
        Command::new(&self.binary_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| format!("failed to spawn {}: {e}", self.binary_path))
    }

    fn init_once(&self, box_id: i32) -> Result<PathBuf, String> {
        let mut args = self.base_args(box_id);
        args.push("--init".to_string());

        let output = self.run_isolate(&args)?;
        if !output.status.success() {
            return Err(format!(
                "isolate --init exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            return Err("isolate --init produced no sandbox root path".to_string());
        }
        Ok(PathBuf::from(root))
    }

    fn cleanup_once(&self, box_id: i32) -> Result<(), String> {
        let mut args = self.base_args(box_id);
        args.push("--cleanup".to_string());
        let output = self.run_isolate(&args)?;
        if !output.status.success() {
            return Err(format!(
                "isolate --cleanup exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(())
    }
}

impl Sandbox for IsolateSandbox {
    type Box = IsolateBox;

    /// Reserve `box_id` (§4.1 policy): on failure (stale residue from a
    /// crashed prior worker), attempt a best-effort `--cleanup` and retry
    /// once; a second failure is returned so the caller can treat it as
    /// fatal to this worker (§7 "sandbox slot lost").
    fn acquire(&self, box_id: i32) -> Result<Self::Box, SandboxError> {
        match self.init_once(box_id) {
            Ok(root) => Ok(IsolateBox { box_id, root }),
            Err(first_err) => {
                let _ = self.cleanup_once(box_id);
                self.init_once(box_id).map(|root| IsolateBox { box_id, root }).map_err(|second_err| {
                    SandboxError::AcquireFailed {
                        box_id,
                        reason: format!("first attempt: {first_err}; after cleanup+retry: {second_err}"),
                    }
                })
            }
        }
    }

    fn run(
        &self,
        sandbox_box: &Self::Box,
        argv: &[String],
        limits: Limits,
        stdin: Stdin,
        stdout_cap: usize,
        stderr_cap: usize,
    ) -> Result<Report, SandboxError> {
        let box_id = sandbox_box.box_id();

        let meta_file = tempfile::NamedTempFile::new().map_err(|e| SandboxError::RunFailed {
            box_id,
            reason: format!("failed to create meta file: {e}"),
        })?;
        let meta_path = meta_file.path().to_path_buf();

        let mut args = self.base_args(box_id);
        args.push(format!("--meta={}", meta_path.display()));
        args.push(format!("--wall-time={:.3}", limits.wall_ms as f64 / 1000.0));
        args.push(format!("--time={:.3}", limits.cpu_ms as f64 / 1000.0));
        args.push(format!("--extra-time=0.5"));
        args.push(format!("--mem={}", limits.memory_kb));
        args.push(format!("--stack={}", limits.stack_kb));
        args.push(format!("--fsize={}", limits.file_size_kb));
        args.push(format!("--processes={}", limits.processes.max(1)));
        args.push("--run".to_string());
        args.push("--".to_string());
        args.extend(argv.iter().cloned());

        let mut stdin_bytes: Option<Vec<u8>> = None;
        let mut command = Command::new(&self.binary_path);
        command.args(&args).stdout(Stdio::piped()).stderr(Stdio::piped());

        match stdin {
            Stdin::None => {
                command.stdin(Stdio::null());
            }
            Stdin::Path(path) => {
                let file = std::fs::File::open(&path).map_err(|e| SandboxError::RunFailed {
                    box_id,
                    reason: format!("failed to open stdin path {}: {e}", path.display()),
                })?;
                command.stdin(Stdio::from(file));
            }
            Stdin::Bytes(bytes) => {
                command.stdin(Stdio::piped());
                stdin_bytes = Some(bytes);
            }
        }

        let mut child = command.spawn().map_err(|e| SandboxError::RunFailed {
            box_id,
            reason: format!("failed to spawn isolate: {e}"),
        })?;

        if let Some(bytes) = stdin_bytes {
            if let Some(mut pipe) = child.stdin.take() {
                // Best-effort: a program that never reads stdin makes this a
                // broken pipe, which is not itself a sandbox failure.
                let _ = pipe.write_all(&bytes);
            }
        }

        let output = child.wait_with_output().map_err(|e| SandboxError::RunFailed {
            box_id,
            reason: format!("failed to wait on isolate: {e}"),
        })?;

        let meta_contents = std::fs::read_to_string(&meta_path).unwrap_or_default();
        let parsed = meta::parse(&meta_contents);

        let mut stdout = output.stdout;
        let mut stdout_truncated = false;
        if stdout.len() > stdout_cap {
            stdout.truncate(stdout_cap);
            stdout_truncated = true;
        }

        let mut stderr = output.stderr;
        let mut stderr_truncated = false;
        if stderr.len() > stderr_cap {
            stderr.truncate(stderr_cap);
            stderr_truncated = true;
        }

        Ok(Report {
            exit_kind: parsed.exit_kind(),
            exit_code: parsed.exitcode,
            signal: parsed.exitsig,
            wall_ms: parsed.time_wall_ms,
            cpu_ms: parsed.time_ms,
            peak_memory_kb: parsed.max_rss_kb,
            stdout,
            stdout_truncated,
            stderr,
            stderr_truncated,
        })
    }

    fn release(&self, sandbox_box: Self::Box) -> Result<(), SandboxError> {
        let box_id = sandbox_box.box_id();
        self.cleanup_once(box_id).map_err(|reason| SandboxError::ReleaseFailed { box_id, reason })
    }

    fn stage_file(&self, sandbox_box: &Self::Box, relative_path: &str, contents: &[u8]) -> Result<(), SandboxError> {
        let box_id = sandbox_box.box_id();
        let dest = sandbox_box.work_dir().join(relative_path);

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SandboxError::StageFailed {
                box_id,
                reason: format!("create_dir_all {}: {e}", parent.display()),
            })?;
        }

        std::fs::write(&dest, contents).map_err(|e| SandboxError::StageFailed {
            box_id,
            reason: format!("write {}: {e}", dest.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_is_box_subdirectory_of_sandbox_root() {
        let b = IsolateBox {
            box_id: 3,
            root: PathBuf::from("/var/local/lib/isolate/3"),
        };
        assert_eq!(b.work_dir(), PathBuf::from("/var/local/lib/isolate/3/box"));
    }

    #[test]
    fn base_args_include_box_id_and_cg_flag_by_default() {
        let sandbox = IsolateSandbox::new("/usr/bin/isolate");
        let args = sandbox.base_args(2);
        assert_eq!(args, vec!["--cg".to_string(), "--box-id=2".to_string()]);
    }

    #[test]
    fn without_cgroup_omits_the_cg_flag() {
        let sandbox = IsolateSandbox::without_cgroup("/usr/bin/isolate");
        let args = sandbox.base_args(2);
        assert_eq!(args, vec!["--box-id=2".to_string()]);
    }
}
