//! The tool run lifecycle.
//!
//! Every run of a [`Tool`] walks the same state machine:
//!
//! ```text
//! Created → Validating → Running → Succeeding | Failing → CleaningUp → Finished
//! ```
//!
//! 1. `validate(config, None)`; a validation error ends the run before any
//!    listener fires or cleanup runs.
//! 2. If signal handling is on, a [`CancellationGuard`] is installed and kept
//!    until the run is finished.
//! 3. `on_start` listeners. Any failure here skips `call` and fails the run.
//! 4. `call(config)`.
//! 5. An error from `call`, a panic, or a signal recorded by the guard takes
//!    the failing branch (`on_fail`), otherwise `on_success` fires.
//! 6. `cleanup(config, failed)` exactly once, then `on_finish`.
//!
//! The error (if any) is returned to the caller only after step 6.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tools::{Configuration, ExecutableTool, Incoming, ToolError, ValidationError};
use tracing::{debug, error, field, instrument, warn, Span};
use uuid::Uuid;

use crate::cancellation::CancellationGuard;
use crate::error::{ConstructionError, RunError};
use crate::listener::{panic_message, Event, Listener, ListenerFailure, Listeners};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Created,
    Validating,
    Running,
    Succeeding,
    Failing,
    CleaningUp,
    Finished,
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed(RunError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// Everything observable about a single run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// States visited, in order, starting with `Created`.
    pub states: Vec<ToolState>,
    pub outcome: Outcome,
    pub listener_failures: Vec<ListenerFailure>,
    /// Error returned by `cleanup`; the outcome is decided before cleanup.
    pub cleanup_error: Option<String>,
}

impl RunReport {
    /// `Ok(self)` for a successful run, the run's error otherwise.
    pub fn into_result(mut self) -> Result<Self, RunError> {
        match std::mem::replace(&mut self.outcome, Outcome::Succeeded) {
            Outcome::Succeeded => Ok(self),
            Outcome::Failed(err) => Err(err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Per-run bookkeeping, turned into a [`RunReport`] when the run ends.
struct RunTrace {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    states: Vec<ToolState>,
    listener_failures: Vec<ListenerFailure>,
    cleanup_error: Option<String>,
}

impl RunTrace {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            states: vec![ToolState::Created],
            listener_failures: Vec::new(),
            cleanup_error: None,
        }
    }

    fn enter(&mut self, state: ToolState) {
        debug!(?state, "tool state transition");
        self.states.push(state);
    }

    fn finish(mut self, tool: &str, outcome: Outcome) -> RunReport {
        self.enter(ToolState::Finished);
        RunReport {
            run_id: self.run_id,
            tool: tool.to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            states: self.states,
            outcome,
            listener_failures: self.listener_failures,
            cleanup_error: self.cleanup_error,
        }
    }
}

/// A tool together with its listeners and signal-handling setting.
///
/// Constructed once, run any number of times; every run is independent.
#[derive(Clone)]
pub struct Tool {
    name: String,
    inner: Arc<dyn ExecutableTool>,
    listeners: Listeners,
    handle_signals: bool,
}

impl Tool {
    pub fn new<T>(inner: T) -> Self
    where
        T: ExecutableTool + 'static,
    {
        Self::from_arc(Arc::new(inner))
    }

    pub fn from_boxed(inner: Box<dyn ExecutableTool>) -> Self {
        Self::from_arc(Arc::from(inner))
    }

    pub fn from_arc(inner: Arc<dyn ExecutableTool>) -> Self {
        Self {
            name: inner.name().to_string(),
            handle_signals: inner.handle_signals(),
            inner,
            listeners: Listeners::new(),
        }
    }

    /// Start building a tool from closures.
    pub fn builder(name: impl Into<String>) -> ToolBuilder {
        ToolBuilder::new(name)
    }

    /// Override the implementation's default name for this instance.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Put `defaults` in front of the listeners registered so far.
    pub fn with_defaults(mut self, defaults: &Listeners) -> Self {
        let mut merged = defaults.clone();
        merged.extend(&self.listeners);
        self.listeners = merged;
        self
    }

    pub fn with_handle_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    pub fn add_listener(&mut self, event: Event, listener: Listener) -> &mut Self {
        self.listeners.push(event, listener);
        self
    }

    pub fn on_start(&mut self, listener: Listener) -> &mut Self {
        self.add_listener(Event::Start, listener)
    }

    pub fn on_success(&mut self, listener: Listener) -> &mut Self {
        self.add_listener(Event::Success, listener)
    }

    pub fn on_fail(&mut self, listener: Listener) -> &mut Self {
        self.add_listener(Event::Fail, listener)
    }

    pub fn on_finish(&mut self, listener: Listener) -> &mut Self {
        self.add_listener(Event::Finish, listener)
    }

    pub fn set_handle_signals(&mut self, handle_signals: bool) {
        self.handle_signals = handle_signals;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle_signals(&self) -> bool {
        self.handle_signals
    }

    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn inner(&self) -> &dyn ExecutableTool {
        self.inner.as_ref()
    }

    /// Validate `config`. Keys in `incoming` are supplied by upstream steps.
    pub fn validate(
        &self,
        config: &Configuration,
        incoming: Option<&Incoming>,
    ) -> Result<(), ValidationError> {
        self.inner.validate(config, incoming)
    }

    /// Run the tool and surface its error, if any.
    pub fn run(&self, config: &Configuration) -> Result<RunReport, RunError> {
        self.run_with_report(config).into_result()
    }

    /// Run the tool through the full lifecycle and report what happened.
    #[instrument(skip(self, config), fields(tool = %self.name, run_id = field::Empty))]
    pub fn run_with_report(&self, config: &Configuration) -> RunReport {
        let mut trace = RunTrace::new();
        Span::current().record("run_id", field::display(trace.run_id));

        trace.enter(ToolState::Validating);
        if let Err(source) = self.inner.validate(config, None) {
            let err = RunError::Validation {
                tool: self.name.clone(),
                source,
            };
            error!(error = %err, "tool validation failed");
            return trace.finish(&self.name, Outcome::Failed(err));
        }

        let guard = if self.handle_signals {
            match CancellationGuard::install() {
                Ok(guard) => Some(guard),
                Err(source) => {
                    let err = RunError::SignalSetup {
                        tool: self.name.clone(),
                        source,
                    };
                    error!(error = %err, "could not install cancellation guard");
                    return trace.finish(&self.name, Outcome::Failed(err));
                }
            }
        } else {
            None
        };

        trace.enter(ToolState::Running);
        let mut failure = self.start_and_call(config, &mut trace);

        // The guard is read once; anything it records from here on is ignored.
        if let Some(signal) = guard.as_ref().and_then(CancellationGuard::received) {
            warn!(signal, "tool interrupted by signal");
            failure = Some(RunError::Cancelled {
                tool: self.name.clone(),
                signal,
            });
        }

        let failed = failure.is_some();
        if failed {
            trace.enter(ToolState::Failing);
            self.notify(Event::Fail, config, &mut trace);
        } else {
            trace.enter(ToolState::Succeeding);
            self.notify(Event::Success, config, &mut trace);
        }

        trace.enter(ToolState::CleaningUp);
        if let Err(source) = self.cleanup(config, failed) {
            warn!(error = %source, failed, "cleanup failed");
            trace.cleanup_error = Some(source.to_string());
        }

        self.notify(Event::Finish, config, &mut trace);
        drop(guard);

        match failure {
            None => {
                debug!("tool run succeeded");
                trace.finish(&self.name, Outcome::Succeeded)
            }
            Some(err) => {
                error!(error = %err, "tool run failed");
                trace.finish(&self.name, Outcome::Failed(err))
            }
        }
    }

    fn start_and_call(&self, config: &Configuration, trace: &mut RunTrace) -> Option<RunError> {
        let start_failures = self.listeners.notify(Event::Start, self, config);
        if !start_failures.is_empty() {
            let message = start_failures
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            trace.listener_failures.extend(start_failures);
            return Some(RunError::StartListener {
                tool: self.name.clone(),
                message,
            });
        }

        let result = catch_unwind(AssertUnwindSafe(|| self.inner.call(config)))
            .unwrap_or_else(|panic| {
                Err(ToolError::failed(format!(
                    "call panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });

        result.err().map(|source| RunError::Failed {
            tool: self.name.clone(),
            source,
        })
    }

    fn cleanup(&self, config: &Configuration, failed: bool) -> Result<(), ToolError> {
        catch_unwind(AssertUnwindSafe(|| self.inner.cleanup(config, failed))).unwrap_or_else(
            |panic| {
                Err(ToolError::failed(format!(
                    "cleanup panicked: {}",
                    panic_message(panic.as_ref())
                )))
            },
        )
    }

    fn notify(&self, event: Event, config: &Configuration, trace: &mut RunTrace) {
        let failures = self.listeners.notify(event, self, config);
        trace.listener_failures.extend(failures);
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("listeners", &self.listeners)
            .field("handle_signals", &self.handle_signals)
            .finish()
    }
}

type CallFn = Box<dyn Fn(&Configuration) -> Result<(), ToolError> + Send + Sync>;
type ValidateFn =
    Box<dyn Fn(&Configuration, Option<&Incoming>) -> Result<(), ValidationError> + Send + Sync>;
type CleanupFn = Box<dyn Fn(&Configuration, bool) -> Result<(), ToolError> + Send + Sync>;

/// Builds a [`Tool`] from closures. `call` is mandatory; `build` fails with
/// [`ConstructionError::UnimplementedTool`] without it.
pub struct ToolBuilder {
    name: String,
    call: Option<CallFn>,
    validate: Option<ValidateFn>,
    cleanup: Option<CleanupFn>,
    defaults: Listeners,
    listeners: Listeners,
    handle_signals: bool,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            call: None,
            validate: None,
            cleanup: None,
            defaults: Listeners::new(),
            listeners: Listeners::new(),
            handle_signals: true,
        }
    }

    pub fn call<F>(mut self, f: F) -> Self
    where
        F: Fn(&Configuration) -> Result<(), ToolError> + Send + Sync + 'static,
    {
        self.call = Some(Box::new(f));
        self
    }

    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Configuration, Option<&Incoming>) -> Result<(), ValidationError>
            + Send
            + Sync
            + 'static,
    {
        self.validate = Some(Box::new(f));
        self
    }

    pub fn cleanup<F>(mut self, f: F) -> Self
    where
        F: Fn(&Configuration, bool) -> Result<(), ToolError> + Send + Sync + 'static,
    {
        self.cleanup = Some(Box::new(f));
        self
    }

    /// Listeners shared by every tool of a kind; they run before instance
    /// listeners.
    pub fn defaults(mut self, defaults: &Listeners) -> Self {
        self.defaults.extend(defaults);
        self
    }

    pub fn listener(mut self, event: Event, listener: Listener) -> Self {
        self.listeners.push(event, listener);
        self
    }

    pub fn handle_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    pub fn build(self) -> Result<Tool, ConstructionError> {
        let call = self
            .call
            .ok_or_else(|| ConstructionError::UnimplementedTool(self.name.clone()))?;

        let inner = FnTool {
            name: self.name,
            call,
            validate: self.validate,
            cleanup: self.cleanup,
            handle_signals: self.handle_signals,
        };

        let mut listeners = self.defaults;
        listeners.extend(&self.listeners);

        let mut tool = Tool::new(inner);
        tool.listeners = listeners;
        Ok(tool)
    }
}

struct FnTool {
    name: String,
    call: CallFn,
    validate: Option<ValidateFn>,
    cleanup: Option<CleanupFn>,
    handle_signals: bool,
}

impl ExecutableTool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, config: &Configuration) -> Result<(), ToolError> {
        (self.call)(config)
    }

    fn validate(
        &self,
        config: &Configuration,
        incoming: Option<&Incoming>,
    ) -> Result<(), ValidationError> {
        match &self.validate {
            Some(validate) => validate(config, incoming),
            None => Ok(()),
        }
    }

    fn cleanup(&self, config: &Configuration, failed: bool) -> Result<(), ToolError> {
        match &self.cleanup {
            Some(cleanup) => cleanup(config, failed),
            None => Ok(()),
        }
    }

    fn handle_signals(&self) -> bool {
        self.handle_signals
    }
}
