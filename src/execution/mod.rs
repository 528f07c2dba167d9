//! # Execution
//!
//! The data plane: the dispatcher that runs workloads off the control path,
//! the registry of execution handles per task, and the simulated workload
//! itself.

pub mod dispatcher;
pub mod handle_registry;
pub mod workload;

pub use dispatcher::{
    DispatchCallbacks, DispatchError, DispatchResult, Dispatcher, DispatcherStats,
    TokioDispatcher, WorkloadContext, WorkloadError, WorkloadFn, WorkloadFuture, WorkloadOutcome,
    WorkloadRequest,
};
pub use handle_registry::HandleRegistry;
pub use workload::SimulatedWorkload;
