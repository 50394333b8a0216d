//! Per-test verdict classification (§4.2).
//!
//! Rule, in order:
//! - Report `timeout` → `tle`.
//! - Report `memory` or peak-memory over limit → `mle`.
//! - Report `signal` or non-zero exit (non-timeout) → `runtime-error`.
//! - Otherwise, byte-exact compare of normalized stdout with expected
//!   output → `accepted` on match else `wrong-answer`.

use crate::types::{ExitKind, Report};
use judge_schemas::TestVerdict;

pub fn classify(report: &Report, memory_limit_kb: i64, expected_output: &[u8]) -> TestVerdict {
    if report.exit_kind == ExitKind::Timeout {
        return TestVerdict::Tle;
    }
    if report.exit_kind == ExitKind::Memory || report.exceeded_memory(memory_limit_kb) {
        return TestVerdict::Mle;
    }
    if report.exit_kind == ExitKind::Signal
        || report.exit_kind == ExitKind::Runtime
        || report.exit_kind == ExitKind::Internal
        || matches!(report.exit_code, Some(code) if code != 0)
    {
        return TestVerdict::RuntimeError;
    }

    if normalize(&report.stdout) == normalize(expected_output) {
        TestVerdict::Accepted
    } else {
        TestVerdict::WrongAnswer
    }
}

/// Trailing-whitespace-per-line normalization with trailing blank lines
/// removed, per §4.2's comparison rule.
pub fn normalize(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r').trim_end().to_string())
        .collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_report(stdout: &[u8]) -> Report {
        Report {
            exit_kind: ExitKind::Ok,
            exit_code: Some(0),
            signal: None,
            wall_ms: 10,
            cpu_ms: 10,
            peak_memory_kb: 1024,
            stdout: stdout.to_vec(),
            stdout_truncated: false,
            stderr: Vec::new(),
            stderr_truncated: false,
        }
    }

    #[test]
    fn timeout_is_tle_regardless_of_output() {
        let mut r = ok_report(b"42\n");
        r.exit_kind = ExitKind::Timeout;
        assert_eq!(classify(&r, 256_000, b"42\n"), TestVerdict::Tle);
    }

    #[test]
    fn memory_overrun_without_memory_exit_kind_is_still_mle() {
        let mut r = ok_report(b"42\n");
        r.peak_memory_kb = 512_000;
        assert_eq!(classify(&r, 256_000, b"42\n"), TestVerdict::Mle);
    }

    #[test]
    fn nonzero_exit_is_runtime_error() {
        let mut r = ok_report(b"");
        r.exit_code = Some(1);
        assert_eq!(classify(&r, 256_000, b"42\n"), TestVerdict::RuntimeError);
    }

    #[test]
    fn signal_is_runtime_error() {
        let mut r = ok_report(b"");
        r.exit_kind = ExitKind::Signal;
        r.exit_code = None;
        r.signal = Some(11);
        assert_eq!(classify(&r, 256_000, b"42\n"), TestVerdict::RuntimeError);
    }

    #[test]
    fn exact_match_is_accepted() {
        let r = ok_report(b"42\n");
        assert_eq!(classify(&r, 256_000, b"42\n"), TestVerdict::Accepted);
    }

    #[test]
    fn mismatch_is_wrong_answer() {
        let r = ok_report(b"41\n");
        assert_eq!(classify(&r, 256_000, b"42\n"), TestVerdict::WrongAnswer);
    }

    #[test]
    fn trailing_whitespace_and_blank_lines_are_ignored() {
        let r = ok_report(b"42  \n\n\n");
        assert_eq!(classify(&r, 256_000, b"42\n"), TestVerdict::Accepted);
    }

    #[test]
    fn interior_blank_lines_still_matter() {
        let r = ok_report(b"42\n\n43\n");
        assert_eq!(classify(&r, 256_000, b"42\n43\n"), TestVerdict::WrongAnswer);
    }

    #[test]
    fn crlf_line_endings_normalize_like_lf() {
        let r = ok_report(b"42\r\n");
        assert_eq!(classify(&r, 256_000, b"42\n"), TestVerdict::Accepted);
    }
}
