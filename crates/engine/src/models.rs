//! Serializable job definitions.
//!
//! These types are what a job file looks like on disk. [`JobDefinition::into_job`]
//! turns one into an in-memory [`Job`] ready for validation and execution.

use serde::{Deserialize, Serialize};
use tools::{Configuration, ToolDefinition};

use crate::error::JobError;
use crate::job::{DependencyEdge, Job};
use crate::listener::Listeners;
use crate::Tool;

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

/// A single step in the job graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique identifier within this job (referenced by edges).
    pub id: String,
    /// Which built-in tool runs this step.
    pub tool: ToolDefinition,
    /// Configuration passed to the tool; keys fed by edges may be left out.
    #[serde(default)]
    pub config: Configuration,
    /// Overrides the tool's own signal-handling default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_signals: Option<bool>,
}

// ---------------------------------------------------------------------------
// JobDefinition
// ---------------------------------------------------------------------------

/// A complete job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

impl JobDefinition {
    /// Build the job. Every tool gets `defaults` in front of its own
    /// listeners.
    ///
    /// # Errors
    /// [`JobError::DuplicateStep`] if two steps share an id. Graph problems
    /// are left to [`Job::validate`].
    pub fn into_job(self, defaults: &Listeners) -> Result<Job, JobError> {
        let mut job = Job::new(self.name);
        for step in self.steps {
            let mut tool = Tool::from_boxed(step.tool.build(&step.id)).with_defaults(defaults);
            if let Some(handle_signals) = step.handle_signals {
                tool.set_handle_signals(handle_signals);
            }
            job.insert(step.id, tool, step.config)?;
        }
        for edge in self.edges {
            job.add_edge(edge);
        }
        Ok(job)
    }
}
