pub mod cache;
pub mod tracker;
pub mod types;

pub use cache::{CacheError, PlanCache, PlanCacheEntry};
pub use tracker::{latest_plan, AdoptReport, PlanSource, PlanTracker, TrackedPlan};
pub use types::{ContractViolation, ExecutionPlan, ParameterMeta, Step, StepKey};
