//! `engine` crate: the tool run lifecycle, listener chains, cancellation,
//! job graphs and the job executor.

pub mod cancellation;
pub mod dag;
pub mod error;
pub mod executor;
pub mod job;
pub mod listener;
pub mod models;
pub mod tool;

pub use cancellation::CancellationGuard;
pub use dag::validate_dag;
pub use error::{ConstructionError, JobError, JobValidationError, RunError};
pub use executor::{ExecutorConfig, JobExecutor, JobReport};
pub use job::{DependencyEdge, Job, Step};
pub use listener::{listener, logging_listeners, Event, Listener, ListenerFailure, Listeners};
pub use models::{JobDefinition, StepDefinition};
pub use tool::{Outcome, RunReport, Tool, ToolBuilder, ToolState};
