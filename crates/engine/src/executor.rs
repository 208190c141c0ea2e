//! Job execution engine.
//!
//! `JobExecutor` is the central orchestrator:
//! 1. Validates the job (structure first, then every step with its incoming
//!    keys) and produces a topological ordering.
//! 2. Iterates through steps in order, resolving each step's configuration
//!    from its producers' configurations.
//! 3. Runs each step through the standard [`Tool`](crate::Tool) lifecycle.
//! 4. Stops at the first failed step, or with `keep_going` skips only the
//!    steps downstream of a failure.
//!
//! A failed step always fails the job; the executor never reports success
//! for a job in which any step failed or was skipped.

use std::collections::{HashMap, HashSet};

use tools::Configuration;
use tracing::{error, info, instrument, warn};

use crate::error::{JobError, RunError};
use crate::tool::RunReport;
use crate::Job;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Keep running steps that do not depend on a failed step.
    pub keep_going: bool,
    /// Validate the whole job before the first step runs.
    pub validate_first: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            keep_going: false,
            validate_first: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Output of a job run
// ---------------------------------------------------------------------------

/// What happened to every step of a job.
#[derive(Debug, Default)]
pub struct JobReport {
    pub job: String,
    /// Execution order computed for the job.
    pub order: Vec<String>,
    /// Reports of the steps that ran successfully, in execution order.
    pub completed: Vec<(String, RunReport)>,
    /// Steps whose run failed.
    pub failed: Vec<(String, RunError)>,
    /// Steps that never ran because an upstream step failed.
    pub skipped: Vec<String>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// `Ok(self)` if every step succeeded, the first step failure otherwise.
    pub fn into_result(mut self) -> Result<Self, JobError> {
        if self.failed.is_empty() {
            return Ok(self);
        }
        let (step, source) = self.failed.remove(0);
        Err(JobError::StepFailed { step, source })
    }
}

// ---------------------------------------------------------------------------
// JobExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator that runs the steps of a job sequentially.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor {
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run the job and surface the first step failure.
    ///
    /// # Errors
    /// Returns `JobError` for structural problems, validation failures, or
    /// the first failed step.
    pub fn run(&self, job: &Job) -> Result<JobReport, JobError> {
        self.run_with_report(job)?.into_result()
    }

    /// Run the job and report every step. Only structural and validation
    /// errors are returned as `Err`; step failures are in the report.
    #[instrument(skip(self, job), fields(job = %job.name()))]
    pub fn run_with_report(&self, job: &Job) -> Result<JobReport, JobError> {
        // ------------------------------------------------------------------
        // Validate and topologically sort the job.
        // ------------------------------------------------------------------
        let order = if self.config.validate_first {
            job.validate()?
        } else {
            job.execution_order()?
        };
        info!("job validated, executing {} steps in order: {:?}", order.len(), order);

        let mut report = JobReport {
            job: job.name().to_string(),
            order: order.clone(),
            ..JobReport::default()
        };

        let mut resolved: HashMap<String, Configuration> = HashMap::new();
        let mut blocked: HashSet<String> = HashSet::new();

        // ------------------------------------------------------------------
        // Execute steps sequentially.
        // ------------------------------------------------------------------
        for (position, step_id) in order.iter().enumerate() {
            if let Some(upstream) = job
                .dependencies(step_id)
                .into_iter()
                .find(|dep| blocked.contains(*dep))
            {
                warn!("step '{}' skipped: upstream step '{}' did not succeed", step_id, upstream);
                blocked.insert(step_id.clone());
                report.skipped.push(step_id.clone());
                continue;
            }

            let step = job
                .step(step_id)
                .ok_or_else(|| JobError::UnknownStep(step_id.clone()))?;
            let config = job.resolve_step(step_id, &resolved)?;

            match step.tool.run(&config) {
                Ok(run) => {
                    info!("step '{}' succeeded", step_id);
                    report.completed.push((step_id.clone(), run));
                    resolved.insert(step_id.clone(), config);
                }
                Err(err) => {
                    error!("step '{}' failed: {}", step_id, err);
                    blocked.insert(step_id.clone());
                    report.failed.push((step_id.clone(), err));

                    if !self.config.keep_going {
                        report.skipped.extend(order[position + 1..].iter().cloned());
                        break;
                    }
                }
            }
        }

        if report.is_success() {
            info!("job '{}' succeeded", report.job);
        } else {
            error!(
                "job '{}' failed: {} failed, {} skipped",
                report.job,
                report.failed.len(),
                report.skipped.len()
            );
        }

        Ok(report)
    }
}
