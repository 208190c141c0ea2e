//! Jobs: tools wired together by dependency edges.
//!
//! A job holds steps (a tool plus the configuration it runs with) and the
//! edges that say which configuration keys of a consumer are produced by an
//! upstream step. It never runs anything itself; [`JobExecutor`] drives the
//! steps through [`Tool::run`].
//!
//! [`JobExecutor`]: crate::JobExecutor

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tools::{Configuration, Incoming, IncomingEdge};
use tracing::debug;

use crate::dag::validate_dag;
use crate::error::{JobError, JobValidationError};
use crate::Tool;

/// Configuration key `key` of `consumer` is produced by `producer`.
///
/// The value is taken from the producer's `source_key` (defaults to `key`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub producer: String,
    pub consumer: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
}

impl DependencyEdge {
    pub fn new(
        producer: impl Into<String>,
        consumer: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            producer: producer.into(),
            consumer: consumer.into(),
            key: key.into(),
            source_key: None,
        }
    }

    /// Take the value from `source_key` on the producer.
    pub fn from_key(mut self, source_key: impl Into<String>) -> Self {
        self.source_key = Some(source_key.into());
        self
    }

    pub fn source_key(&self) -> &str {
        self.source_key.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    pub tool: Arc<Tool>,
    pub config: Configuration,
}

#[derive(Debug, Clone, Default)]
pub struct Job {
    name: String,
    steps: Vec<Step>,
    edges: Vec<DependencyEdge>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a step named after its tool and return its id. A name that is
    /// already taken gets a `.2`, `.3`, ... suffix.
    pub fn add(&mut self, tool: impl Into<Arc<Tool>>, config: Configuration) -> String {
        let tool = tool.into();
        let base = tool.name().to_string();
        self.add_named(base, tool, config)
    }

    /// Like [`add`](Self::add) with an explicit base id.
    pub fn add_named(
        &mut self,
        id: impl Into<String>,
        tool: impl Into<Arc<Tool>>,
        config: Configuration,
    ) -> String {
        let base = id.into();
        let mut id = base.clone();
        let mut count = 2;
        while self.step(&id).is_some() {
            id = format!("{base}.{count}");
            count += 1;
        }
        self.steps.push(Step {
            id: id.clone(),
            tool: tool.into(),
            config,
        });
        id
    }

    /// Add a step under exactly `id`.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        tool: impl Into<Arc<Tool>>,
        config: Configuration,
    ) -> Result<(), JobError> {
        let id = id.into();
        if self.step(&id).is_some() {
            return Err(JobError::DuplicateStep(id));
        }
        self.steps.push(Step {
            id,
            tool: tool.into(),
            config,
        });
        Ok(())
    }

    /// Declare that `key` of `consumer` is produced by `producer` under the
    /// same key.
    pub fn connect(
        &mut self,
        producer: impl Into<String>,
        consumer: impl Into<String>,
        key: impl Into<String>,
    ) {
        self.edges.push(DependencyEdge::new(producer, consumer, key));
    }

    pub fn add_edge(&mut self, edge: DependencyEdge) {
        self.edges.push(edge);
    }

    /// Remove every edge feeding `key` of `consumer`. Returns how many were
    /// removed.
    pub fn disconnect(&mut self, consumer: &str, key: &str) -> usize {
        let before = self.edges.len();
        self.edges.retain(|e| !(e.consumer == consumer && e.key == key));
        before - self.edges.len()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Step ids that `id` directly depends on, in declaration order.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        let mut deps: Vec<&str> = self
            .edges
            .iter()
            .filter(|e| e.consumer == id && e.producer != id)
            .map(|e| e.producer.as_str())
            .collect();
        deps.sort_by_key(|p| self.position(p));
        deps.dedup();
        deps
    }

    pub(crate) fn position(&self, id: &str) -> usize {
        self.steps
            .iter()
            .position(|s| s.id == id)
            .unwrap_or(usize::MAX)
    }

    /// The edges feeding `id`.
    pub fn incoming(&self, id: &str) -> Incoming {
        Incoming::new(
            self.edges
                .iter()
                .filter(|e| e.consumer == id)
                .map(|e| IncomingEdge::new(&e.producer, &e.key, e.source_key()))
                .collect(),
        )
    }

    /// Topological execution order; producers always precede their
    /// consumers, ties are broken by declaration order.
    pub fn execution_order(&self) -> Result<Vec<String>, JobError> {
        validate_dag(self)
    }

    /// Validate the whole job before anything runs.
    ///
    /// Structural problems (duplicate ids, unknown steps, conflicting
    /// producers, cycles) are reported first and no step's `validate` is
    /// called. Otherwise every step is validated with its `incoming` set and
    /// all failures are collected. Returns the execution order on success.
    pub fn validate(&self) -> Result<Vec<String>, JobError> {
        let order = validate_dag(self)?;

        let mut errors = BTreeMap::new();
        for step in &self.steps {
            let incoming = self.incoming(&step.id);
            if let Err(err) = step.tool.validate(&step.config, Some(&incoming)) {
                debug!(step = %step.id, fields = err.errors.len(), "step failed validation");
                errors.insert(step.id.clone(), err);
            }
        }

        if errors.is_empty() {
            Ok(order)
        } else {
            Err(JobValidationError { errors }.into())
        }
    }

    /// `id`'s configuration with every incoming key filled in from its
    /// producer's resolved configuration.
    pub fn resolved_configuration(&self, id: &str) -> Result<Configuration, JobError> {
        let order = validate_dag(self)?;
        let mut resolved = HashMap::new();
        for step_id in order {
            let config = self.resolve_step(&step_id, &resolved)?;
            if step_id == id {
                return Ok(config);
            }
            resolved.insert(step_id, config);
        }
        Err(JobError::UnknownStep(id.to_string()))
    }

    /// Resolve a single step given the already resolved configurations of
    /// its producers. Values a producer does not have are left unset.
    pub(crate) fn resolve_step(
        &self,
        id: &str,
        resolved: &HashMap<String, Configuration>,
    ) -> Result<Configuration, JobError> {
        let step = self
            .step(id)
            .ok_or_else(|| JobError::UnknownStep(id.to_string()))?;
        let mut config = step.config.clone();
        for edge in self.edges.iter().filter(|e| e.consumer == id) {
            let value = resolved
                .get(&edge.producer)
                .and_then(|producer| producer.get(edge.source_key()));
            match value {
                Some(value) => {
                    config.insert(edge.key.clone(), value.clone());
                }
                None => {
                    config.remove(&edge.key);
                }
            }
        }
        Ok(config)
    }
}
