pub mod controller;
pub mod optimistic;
pub mod report;

pub use controller::{
    ActionAvailability, LifecycleAction, LifecycleController, LifecycleError, LifecycleSnapshot,
};
pub use optimistic::{AlreadyPending, Optimistic};
pub use report::{ExecutionMarker, ExecutionOutcome, ExecutionReport, StepResult, StepStatus};
