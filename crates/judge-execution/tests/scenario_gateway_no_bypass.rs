//! A disarmed sandbox pool must block every new acquisition through the
//! gateway, regardless of how many sandbox slots exist (§4.1 policy, §7
//! "sandbox slot lost" -> pool supervisor disarms the pool).

use judge_execution::sandbox::{Sandbox, SandboxBox, SandboxError, Stdin};
use judge_execution::types::{ExitKind, Limits, Report};
use judge_execution::{DispatchError, DispatchGateway, GateRefusal, PoolVerdict};

struct CountingBox(i32);
impl SandboxBox for CountingBox {
    fn box_id(&self) -> i32 {
        self.0
    }
}

struct CountingSandbox;
impl Sandbox for CountingSandbox {
    type Box = CountingBox;

    fn acquire(&self, box_id: i32) -> Result<Self::Box, SandboxError> {
        Ok(CountingBox(box_id))
    }

    fn run(
        &self,
        _b: &Self::Box,
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

    fn release(&self, _b: Self::Box) -> Result<(), SandboxError> {
        Ok(())
    }

    fn stage_file(&self, _b: &Self::Box, _rel: &str, _contents: &[u8]) -> Result<(), SandboxError> {
        Ok(())
    }
}

#[test]
fn every_worker_slot_is_blocked_once_the_pool_disarms() {
    let gw = DispatchGateway::new(CountingSandbox);

    for slot in 0..4 {
        assert!(gw.acquire(slot, PoolVerdict::armed()).is_ok());
    }

    for slot in 0..4 {
        let err = gw.acquire(slot, PoolVerdict::disarmed()).unwrap_err();
        assert_eq!(err, DispatchError::Gate(GateRefusal::PoolDisarmed));
    }
}

#[test]
fn a_worker_holding_a_box_before_disarm_cannot_keep_running_in_it() {
    let gw = DispatchGateway::new(CountingSandbox);
    let b = gw.acquire(0, PoolVerdict::armed()).unwrap();

    let err = gw
        .run(&b, &[], Limits::wall_only(1000, 1024), Stdin::None, 1024, 1024, PoolVerdict::disarmed())
        .unwrap_err();
    assert_eq!(err, DispatchError::Gate(GateRefusal::PoolDisarmed));

    // Releasing the now-unusable box is still allowed so cleanup can proceed.
    assert!(gw.release(b).is_ok());
}
