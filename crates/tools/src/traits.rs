//! The `ExecutableTool` trait, the contract every tool must fulfil.

use serde::{Deserialize, Serialize};

use crate::{ToolError, ValidationError};

/// Opaque key/value mapping handed unchanged to `validate`, `call` and
/// `cleanup`. The engine never mutates it.
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// One configuration key of a consumer that is produced by an upstream step.
///
/// Defined here (in the tools crate) so tool implementations can inspect it
/// without depending on the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingEdge {
    /// Step id of the producer inside the job.
    pub producer: String,
    /// Key on the consumer's configuration.
    pub key: String,
    /// Key on the producer's configuration the value is taken from.
    pub source_key: String,
}

impl IncomingEdge {
    pub fn new(
        producer: impl Into<String>,
        key: impl Into<String>,
        source_key: impl Into<String>,
    ) -> Self {
        Self {
            producer: producer.into(),
            key: key.into(),
            source_key: source_key.into(),
        }
    }
}

/// The set of dependency edges feeding a single step of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incoming {
    edges: Vec<IncomingEdge>,
}

impl Incoming {
    pub fn new(edges: Vec<IncomingEdge>) -> Self {
        Self { edges }
    }

    /// True if `key` will be populated by an upstream step.
    pub fn contains(&self, key: &str) -> bool {
        self.edges.iter().any(|e| e.key == key)
    }

    pub fn get(&self, key: &str) -> Option<&IncomingEdge> {
        self.edges.iter().find(|e| e.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().map(|e| e.key.as_str())
    }

    pub fn edges(&self) -> &[IncomingEdge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }
}

/// The core tool trait.
///
/// `call` is the only required capability. Everything else has a default
/// that matches a tool with no opinion: validation always passes, cleanup is
/// a no-op and signal handling is on.
pub trait ExecutableTool: Send + Sync {
    /// Default name of the tool. Instances may override it in the engine.
    fn name(&self) -> &str;

    /// Run the tool's core logic.
    fn call(&self, config: &Configuration) -> Result<(), ToolError>;

    /// Check `config` before anything runs. Keys listed in `incoming` are
    /// produced by upstream steps that have not executed yet and must not be
    /// reported as missing.
    fn validate(
        &self,
        _config: &Configuration,
        _incoming: Option<&Incoming>,
    ) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Called exactly once after every run, with `failed` telling which
    /// branch the run took.
    fn cleanup(&self, _config: &Configuration, _failed: bool) -> Result<(), ToolError> {
        Ok(())
    }

    /// Whether runs of this tool install a cancellation guard by default.
    fn handle_signals(&self) -> bool {
        true
    }
}
