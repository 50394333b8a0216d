//! The judging core (§4.1, §4.2, §9): the Sandbox Driver contract, the
//! sandbox slot registry, the per-submission state machine, per-test
//! verdict classification, and the Dispatch Gateway that is the single
//! choke-point through which every sandbox acquisition must flow.

pub mod gateway;
pub mod sandbox;
pub mod slot_registry;
pub mod state_machine;
pub mod types;
pub mod verdict;

pub use gateway::{DispatchError, DispatchGateway, GateRefusal, PoolVerdict};
pub use sandbox::{Sandbox, SandboxBox, SandboxError, Stdin};
pub use slot_registry::{SlotId, SlotRegistry};
pub use state_machine::{SubmissionEvent, SubmissionState, SubmissionStateMachine, TransitionError};
pub use types::{ExitKind, Limits, Report};
