//! # Data Model
//!
//! Plain data types for Tasks, Jobs, their Conditions and Execution Handles.
//! Persistence lives in [`crate::database`]; transitions live in
//! [`crate::state_machine`].

pub mod condition;
pub mod execution_handle;
pub mod job;
pub mod task;

pub use condition::JobCondition;
pub use execution_handle::{ExecutionHandle, ExternalId};
pub use job::{Job, JobDetail, JobUpdate, NewJob};
pub use task::{NewTask, Task, TaskEdit, TaskType};
