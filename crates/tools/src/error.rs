//! Tool-level error types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{Configuration, Incoming};

/// Errors returned by a tool's `call` or `cleanup` method.
///
/// The engine treats every variant the same way for branching purposes: the
/// run takes the failure path, `on_fail` listeners fire and cleanup runs with
/// `failed = true`.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool's own logic decided the run failed.
    #[error("{0}")]
    Failed(String),

    /// An external process exited with a non-zero status (or was killed).
    #[error("process terminated with {}", exit_description(.code))]
    ExitStatus { code: Option<i32> },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "a signal".to_string(),
    }
}

/// Structured validation failure: field name → human-readable problem.
///
/// Returned by [`ExecutableTool::validate`](crate::ExecutableTool::validate)
/// implementations. The map is ordered so operator-facing output is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize, Deserialize)]
pub struct ValidationError {
    pub errors: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a failure with a single offending field.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.insert(field, message);
        err
    }

    pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// `Ok(())` when nothing was recorded, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Check that every key in `required` is present in `config` or will be
    /// supplied by an upstream step listed in `incoming`.
    ///
    /// A key that is present but `null` is reported as unset. Keys covered by
    /// `incoming` are exempt from both checks.
    pub fn check_required<'a, I>(
        config: &Configuration,
        incoming: Option<&Incoming>,
        required: I,
    ) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut err = Self::new();
        for key in required {
            if incoming.is_some_and(|inc| inc.contains(key)) {
                continue;
            }
            match config.get(key) {
                None => err.insert(key, "Configuration value not specified"),
                Some(Value::Null) => err.insert(key, format!("No value specified for {key}")),
                Some(_) => {}
            }
        }
        err.into_result()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (field, msg) in &self.errors {
            write!(f, "\n{field}\t: {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IncomingEdge;
    use serde_json::json;

    fn config(value: Value) -> Configuration {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn missing_and_null_keys_are_reported_separately() {
        let cfg = config(json!({ "index": "genome.gem", "reads": null }));
        let err = ValidationError::check_required(&cfg, None, ["index", "reads", "output"])
            .unwrap_err();

        assert!(!err.contains("index"));
        assert_eq!(err.errors["reads"], "No value specified for reads");
        assert_eq!(err.errors["output"], "Configuration value not specified");
    }

    #[test]
    fn incoming_keys_are_exempt() {
        let cfg = config(json!({ "index": "genome.gem" }));
        let incoming = Incoming::new(vec![IncomingEdge::new("interleave", "reads", "output")]);

        assert!(ValidationError::check_required(&cfg, Some(&incoming), ["index", "reads"]).is_ok());
        assert!(ValidationError::check_required(&cfg, None, ["index", "reads"]).is_err());
    }

    #[test]
    fn display_lists_one_line_per_field() {
        let mut err = ValidationError::single("index", "not a gem index");
        err.insert("alignment", "Configuration value not specified");

        let text = err.to_string();
        assert!(text.starts_with("validation failed"));
        assert!(text.contains("\nalignment\t: Configuration value not specified"));
        assert!(text.contains("\nindex\t: not a gem index"));
    }

    #[test]
    fn exit_status_message_names_code_or_signal() {
        assert_eq!(
            ToolError::ExitStatus { code: Some(3) }.to_string(),
            "process terminated with exit status 3"
        );
        assert_eq!(
            ToolError::ExitStatus { code: None }.to_string(),
            "process terminated with a signal"
        );
    }
}
