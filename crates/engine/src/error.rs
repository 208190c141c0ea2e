//! Engine-level error types.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tools::{ToolError, ValidationError};

/// A tool could not be constructed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    /// The tool has no `call` implementation.
    #[error(
        "no call() implementation found for tool '{0}'; ensure the tool provides a call implementation"
    )]
    UnimplementedTool(String),
}

/// Why a single tool run failed.
///
/// `Validation` and `SignalSetup` are raised before anything ran: no
/// listeners fire and cleanup is not invoked. Every other variant is raised
/// only after `on_fail`, `cleanup(failed = true)` and `on_finish` completed.
/// A failing cleanup never changes the outcome; it is recorded in
/// [`RunReport::cleanup_error`](crate::RunReport::cleanup_error).
#[derive(Debug, Error)]
pub enum RunError {
    #[error("tool '{tool}' is not valid: {source}")]
    Validation {
        tool: String,
        source: ValidationError,
    },

    #[error("tool '{tool}' could not install signal handlers: {source}")]
    SignalSetup {
        tool: String,
        source: std::io::Error,
    },

    /// An `on_start` listener failed, so `call` was never invoked.
    #[error("tool '{tool}' on_start listener failed: {message}")]
    StartListener { tool: String, message: String },

    /// The tool's `call` returned an error (or panicked).
    #[error("tool execution of '{tool}' failed: {source}")]
    Failed { tool: String, source: ToolError },

    /// An interrupt or termination signal arrived while the tool was running.
    #[error("tool '{tool}' was interrupted by signal {signal}")]
    Cancelled { tool: String, signal: i32 },
}

impl RunError {
    pub fn tool(&self) -> &str {
        match self {
            Self::Validation { tool, .. }
            | Self::SignalSetup { tool, .. }
            | Self::StartListener { tool, .. }
            | Self::Failed { tool, .. }
            | Self::Cancelled { tool, .. } => tool,
        }
    }

    /// True if the failure was triggered externally rather than raised by
    /// the tool itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// False for errors raised before the run started.
    pub fn ran(&self) -> bool {
        !matches!(self, Self::Validation { .. } | Self::SignalSetup { .. })
    }
}

/// Aggregated per-step validation failures of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
pub struct JobValidationError {
    /// Step id → that step's field errors.
    pub errors: BTreeMap<String, ValidationError>,
}

impl fmt::Display for JobValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "job validation failed for:")?;
        for (step, err) in &self.errors {
            write!(f, "\n{step}:")?;
            for (field, msg) in &err.errors {
                write!(f, "\n\t{field}\t: {msg}")?;
            }
        }
        Ok(())
    }
}

/// Errors produced by jobs (structure, validation and execution).
#[derive(Debug, Error)]
pub enum JobError {
    // ------ Structural errors ------
    /// Two steps share the same id.
    #[error("duplicate step id: '{0}'")]
    DuplicateStep(String),

    /// A lookup or edge names a step that is not part of the job.
    #[error("edge references unknown step '{step}' ({side} side)")]
    UnknownStepReference { step: String, side: &'static str },

    #[error("no step named '{0}' in job")]
    UnknownStep(String),

    /// The dependency graph is not acyclic. `cycle` starts and ends with the
    /// same step.
    #[error("circular dependency: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    /// More than one producer feeds the same key of a consumer.
    #[error("key '{key}' of step '{consumer}' has more than one producer")]
    ConflictingProducers { consumer: String, key: String },

    // ------ Validation errors ------
    #[error(transparent)]
    Validation(#[from] JobValidationError),

    // ------ Execution errors ------
    #[error("step '{step}' failed: {source}")]
    StepFailed { step: String, source: RunError },
}

impl JobError {
    /// True for errors detected before any step ran.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::StepFailed { .. })
    }
}
