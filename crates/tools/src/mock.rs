//! `MockTool`: a test double for `ExecutableTool`.
//!
//! Useful in unit and integration tests where a real tool implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::{Configuration, ExecutableTool, Incoming, ToolError, ValidationError};

/// Shared, ordered event log. Tests hand the same log to tools and listeners
/// to assert on lifecycle ordering.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Behaviour injected into `MockTool` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return successfully.
    Succeed,
    /// Fail with `ToolError::Failed`.
    Fail(String),
    /// Deliver the given signal to the current process, then return normally.
    Raise(i32),
}

/// A mock tool that records every call it receives and behaves as the
/// programmer specified.
pub struct MockTool {
    /// Label used in test assertions.
    pub name: String,
    /// What the tool will do when `call` is invoked.
    pub behaviour: MockBehaviour,
    /// Keys `validate` insists on.
    pub required: Vec<String>,
    /// All configurations seen by `call` (in call order).
    pub calls: Arc<Mutex<Vec<Configuration>>>,
    /// The `failed` flag of every cleanup invocation.
    pub cleanups: Arc<Mutex<Vec<bool>>>,
    /// Optional shared event log.
    pub log: Option<EventLog>,
    pub handle_signals: bool,
}

impl MockTool {
    /// Create a mock that always succeeds.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Succeed)
    }

    /// Create a mock that always fails with the given message.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Fail(msg.into()))
    }

    /// Create a mock that raises `signal` while running.
    pub fn raising(name: impl Into<String>, signal: i32) -> Self {
        Self::with_behaviour(name, MockBehaviour::Raise(signal))
    }

    pub fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            required: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            cleanups: Arc::new(Mutex::new(Vec::new())),
            log: None,
            handle_signals: true,
        }
    }

    /// Require `keys` to be configured (or incoming) at validation time.
    pub fn requiring(mut self, keys: &[&str]) -> Self {
        self.required = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn logging_to(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn without_signals(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Number of times this tool has been called.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The `failed` flags of all cleanups so far.
    pub fn cleanup_flags(&self) -> Vec<bool> {
        self.cleanups.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(event);
        }
    }
}

impl ExecutableTool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, config: &Configuration) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(config.clone());
        self.record("call".into());

        match &self.behaviour {
            MockBehaviour::Succeed => Ok(()),
            MockBehaviour::Fail(msg) => Err(ToolError::Failed(msg.clone())),
            MockBehaviour::Raise(signal) => {
                signal_hook::low_level::raise(*signal)?;
                Ok(())
            }
        }
    }

    fn validate(
        &self,
        config: &Configuration,
        incoming: Option<&Incoming>,
    ) -> Result<(), ValidationError> {
        ValidationError::check_required(config, incoming, self.required.iter().map(String::as_str))
    }

    fn cleanup(&self, _config: &Configuration, failed: bool) -> Result<(), ToolError> {
        self.cleanups.lock().unwrap().push(failed);
        self.record(format!("cleanup(failed={failed})"));
        Ok(())
    }

    fn handle_signals(&self) -> bool {
        self.handle_signals
    }
}

/// Convenience for building a configuration from a `json!` object literal.
pub fn config(value: Value) -> Configuration {
    match value {
        Value::Object(map) => map,
        _ => Configuration::new(),
    }
}
