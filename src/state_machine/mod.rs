//! # Task State Machine
//!
//! Lifecycle of a task: `STARTING → RUNNING → {PAUSED, STOPPED, CANCELED,
//! FAILED, FINISHED}`, with `PAUSED`/`STOPPED` re-entering at `STARTING` on
//! resume. Legality lives in [`guards`], side effects of an applied transition
//! in [`actions`], and the operations themselves in [`TaskStateMachine`].

pub mod actions;
pub mod errors;
pub mod events;
pub mod guards;
pub mod states;
pub mod task_state_machine;

// Re-export main types for convenient access
pub use actions::{AppliedTransition, StateAction};
pub use errors::{GuardError, StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use guards::{GuardDecision, TransitionGuard};
pub use states::TaskStatus;
pub use task_state_machine::{Checkpoint, TaskStateMachine, TransitionOutcome};
