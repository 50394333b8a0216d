//! The Judge Worker Pool and Outbox Publisher (§4.2, §4.4): the two
//! long-running loops that actually move a submission from `pending` to a
//! terminal verdict and, independently, move a committed outbox row onto
//! the broker. Both are built on the claim-and-mutate surface of
//! `judge-db`, which is why this is the only crate permitted to enable its
//! `runtime-claim` feature.

pub mod outbox;
pub mod pool;
pub mod worker;

pub use outbox::{run_outbox_loop, OutboxPublisher, PublishTickOutcome};
pub use pool::{SubmissionWorkerPool, WorkerPoolConfig};
pub use worker::{SandboxUnavailable, SubmissionWorker, WorkerOutcome};
