//! Parser for the `--meta` file isolate writes after `--run` (one
//! `key:value` pair per line). Kept isolated from the process-invocation
//! code so the parsing logic can be unit tested without spawning `isolate`.

use std::collections::HashMap;

use judge_execution::ExitKind;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IsolateMeta {
    pub status: Option<String>,
    pub exitcode: Option<i32>,
    pub exitsig: Option<i32>,
    pub time_ms: i64,
    pub time_wall_ms: i64,
    pub max_rss_kb: i64,
    pub oom_killed: bool,
    pub message: Option<String>,
}

pub fn parse(contents: &str) -> IsolateMeta {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in contents.lines() {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim(), value.trim());
        }
    }

    let secs_to_ms = |s: &str| -> i64 { (s.parse::<f64>().unwrap_or(0.0) * 1000.0).round() as i64 };

    IsolateMeta {
        status: fields.get("status").map(|s| s.to_string()),
        exitcode: fields.get("exitcode").and_then(|s| s.parse().ok()),
        exitsig: fields.get("exitsig").and_then(|s| s.parse().ok()),
        time_ms: fields.get("time").map(|s| secs_to_ms(s)).unwrap_or(0),
        time_wall_ms: fields.get("time-wall").map(|s| secs_to_ms(s)).unwrap_or(0),
        max_rss_kb: fields.get("max-rss").and_then(|s| s.parse().ok()).unwrap_or(0),
        oom_killed: fields.get("cg-oom-killed").map(|s| *s == "1").unwrap_or(false),
        message: fields.get("message").map(|s| s.to_string()),
    }
}

impl IsolateMeta {
    /// Map isolate's terse status codes to the sandbox contract's
    /// [`ExitKind`] (§4.1): `TO` is a timeout, an OOM-killed cgroup or the
    /// `MLE` status isolate itself reports is a memory event, `SG` is a
    /// signal, `RE` is a runtime failure isolate detected before even
    /// exec'ing the program, anything else with a clean exit is `Ok`.
    pub fn exit_kind(&self) -> ExitKind {
        if self.oom_killed {
            return ExitKind::Memory;
        }
        match self.status.as_deref() {
            Some("TO") => ExitKind::Timeout,
            Some("SG") => ExitKind::Signal,
            Some("RE") => ExitKind::Runtime,
            Some("XX") => ExitKind::Internal,
            Some(other) => {
                tracing::warn!(status = other, "unknown isolate status");
                ExitKind::Internal
            }
            None => ExitKind::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_exit_has_no_status_line() {
        let meta = parse("time:0.012\ntime-wall:0.015\nmax-rss:2048\nexitcode:0\n");
        assert_eq!(meta.exit_kind(), ExitKind::Ok);
        assert_eq!(meta.exitcode, Some(0));
        assert_eq!(meta.max_rss_kb, 2048);
    }

    #[test]
    fn timeout_status_maps_to_timeout() {
        let meta = parse("status:TO\ntime:1.000\ntime-wall:1.010\n");
        assert_eq!(meta.exit_kind(), ExitKind::Timeout);
    }

    #[test]
    fn oom_killed_wins_over_signal_status() {
        let meta = parse("status:SG\ncg-oom-killed:1\nexitsig:9\nmax-rss:524288\n");
        assert_eq!(meta.exit_kind(), ExitKind::Memory);
    }

    #[test]
    fn signal_status_without_oom_is_signal() {
        let meta = parse("status:SG\nexitsig:11\n");
        assert_eq!(meta.exit_kind(), ExitKind::Signal);
    }

    #[test]
    fn seconds_are_converted_to_milliseconds() {
        let meta = parse("time:0.250\ntime-wall:0.300\n");
        assert_eq!(meta.time_ms, 250);
        assert_eq!(meta.time_wall_ms, 300);
    }
}
