//! `ScriptTool` renders a command template and runs it under an interpreter.
//!
//! Placeholders of the form `${key}` are replaced with values from the run's
//! configuration. Strings are inserted verbatim, arrays are joined with
//! spaces, other scalars use their JSON rendering. An unknown or `null`
//! placeholder is an error, so a half-configured command never runs.
//!
//! The rendered script is written to a temporary file and handed to the
//! interpreter. For `bash` the script is prefixed with `set -o pipefail`, so a
//! failing stage inside a shell pipe fails the whole script instead of being
//! masked by a downstream stage that exits cleanly.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Configuration, ExecutableTool, Incoming, ToolError, ValidationError};

pub const DEFAULT_INTERPRETER: &str = "bash";

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"))
}

#[derive(Debug, Clone)]
pub struct ScriptTool {
    name: String,
    interpreter: String,
    command: String,
    inputs: Vec<String>,
    /// Output key → default path template. A configured value for the key
    /// takes precedence over the template.
    outputs: BTreeMap<String, String>,
}

impl ScriptTool {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            command: command.into(),
            inputs: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Declare a required input key.
    pub fn input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(key.into());
        self
    }

    /// Declare an output key with a default path template.
    pub fn output(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), template.into());
        self
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// The fully rendered, dedented script for `config`.
    pub fn get_command(&self, config: &Configuration) -> Result<String, ToolError> {
        render(&self.command, config).map(|s| dedent(&s))
    }

    /// Output paths of a run with `config`.
    pub fn outputs(&self, config: &Configuration) -> Result<Vec<String>, ToolError> {
        let mut paths = Vec::with_capacity(self.outputs.len());
        for (key, template) in &self.outputs {
            match config.get(key) {
                Some(Value::Null) | None => {
                    if !template.is_empty() {
                        paths.push(render(template, config)?);
                    }
                }
                Some(value) => paths.extend(flatten(value)),
            }
        }
        Ok(paths)
    }

    /// True if the tool declares outputs and all of them already exist.
    pub fn is_done(&self, config: &Configuration) -> bool {
        match self.outputs(config) {
            Ok(outs) if !outs.is_empty() => outs.iter().all(|p| Path::new(p).exists()),
            _ => false,
        }
    }

    fn script(&self, config: &Configuration) -> Result<String, ToolError> {
        let body = self.get_command(config)?;
        if self.interpreter == DEFAULT_INTERPRETER {
            Ok(format!("set -o pipefail\n{body}"))
        } else {
            Ok(body)
        }
    }
}

impl ExecutableTool for ScriptTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, config: &Configuration) -> Result<(), ToolError> {
        let script = self.script(config)?;

        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        debug!(tool = %self.name, interpreter = %self.interpreter, "running script");
        let status = Command::new(&self.interpreter).arg(file.path()).status()?;

        if status.success() {
            Ok(())
        } else {
            Err(ToolError::ExitStatus {
                code: status.code(),
            })
        }
    }

    fn validate(
        &self,
        config: &Configuration,
        incoming: Option<&Incoming>,
    ) -> Result<(), ValidationError> {
        ValidationError::check_required(config, incoming, self.inputs.iter().map(String::as_str))
    }

    /// On failure, removes every declared output that exists.
    fn cleanup(&self, config: &Configuration, failed: bool) -> Result<(), ToolError> {
        if !failed {
            return Ok(());
        }
        for path in self.outputs(config)? {
            let path = Path::new(&path);
            if path.exists() {
                debug!(tool = %self.name, path = %path.display(), "removing output of failed run");
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(tool = %self.name, path = %path.display(), error = %e, "could not remove output");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

fn render(template: &str, config: &Configuration) -> Result<String, ToolError> {
    let mut missing = None;
    let rendered = placeholder().replace_all(template, |caps: &Captures<'_>| {
        let key = &caps[1];
        match config.get(key) {
            Some(Value::Null) | None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
            Some(value) => flatten(value).join(" "),
        }
    });
    match missing {
        Some(key) => Err(ToolError::failed(format!(
            "template variable '{key}' is not configured"
        ))),
        None => Ok(rendered.into_owned()),
    }
}

fn flatten(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(flatten).collect(),
        other => vec![other.to_string()],
    }
}

/// Remove the longest run of spaces and tabs shared by every non-blank line.
/// Blank lines become empty.
fn dedent(text: &str) -> String {
    let mut margin: Option<&str> = None;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let indent = &line[..line.len() - line.trim_start_matches(is_margin).len()];
        margin = Some(match margin {
            None => indent,
            Some(current) => common_prefix(current, indent),
        });
    }
    let margin = margin.unwrap_or("");

    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if !line.trim().is_empty() {
            out.push_str(line.strip_prefix(margin).unwrap_or(line));
        }
        out.push('\n');
    }
    out
}

fn is_margin(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// Both inputs are spaces and tabs only, so any byte offset is a char boundary.
fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let shared = a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count();
    &a[..shared]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::config;
    use crate::IncomingEdge;
    use serde_json::json;

    fn aligner() -> ScriptTool {
        ScriptTool::new(
            "aligner",
            "
            aligner --index ${index} -i ${reads} -o ${result}
            ",
        )
        .input("index")
        .input("reads")
        .output("result", "")
    }

    #[test]
    fn command_is_rendered_and_dedented() {
        let cfg = config(json!({
            "index": "genome.gem",
            "reads": ["r1.fastq", "r2.fastq"],
            "result": "out.map",
        }));
        let command = aligner().get_command(&cfg).unwrap();
        assert!(command
            .lines()
            .any(|l| l == "aligner --index genome.gem -i r1.fastq r2.fastq -o out.map"));
    }

    #[test]
    fn mixed_indentation_keeps_only_the_shared_margin() {
        let tool = ScriptTool::new("t", "\t  echo a\n\t echo b\n\n");
        assert_eq!(tool.get_command(&Configuration::new()).unwrap(), " echo a\necho b\n\n");

        // Non-breaking spaces are content, not margin.
        let tool = ScriptTool::new("t", " \u{a0}echo a\n\u{a0}echo b");
        assert_eq!(
            tool.get_command(&Configuration::new()).unwrap(),
            " \u{a0}echo a\n\u{a0}echo b\n"
        );
    }

    #[test]
    fn unconfigured_placeholder_is_an_error() {
        let cfg = config(json!({ "index": "genome.gem", "reads": null }));
        let err = aligner().get_command(&cfg).unwrap_err();
        assert!(err.to_string().contains("'reads'"));
    }

    #[test]
    fn validate_skips_incoming_inputs() {
        let cfg = config(json!({ "index": "genome.gem" }));
        let incoming = Incoming::new(vec![IncomingEdge::new("interleave", "reads", "output")]);

        assert!(aligner().validate(&cfg, Some(&incoming)).is_ok());
        let err = aligner().validate(&cfg, None).unwrap_err();
        assert!(err.contains("reads"));
    }

    #[test]
    fn output_defaults_render_from_configuration() {
        let tool = ScriptTool::new("touch", "touch ${file}")
            .input("name")
            .output("file", "${name}.txt");

        assert_eq!(tool.outputs(&config(json!({ "name": "a" }))).unwrap(), vec!["a.txt"]);
        assert_eq!(
            tool.outputs(&config(json!({ "name": "a", "file": "b.txt" }))).unwrap(),
            vec!["b.txt"]
        );
    }

    #[test]
    fn successful_script_writes_its_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let tool = ScriptTool::new("echo", "echo ${text} > ${output}").output("output", "");
        let cfg = config(json!({ "text": "hello", "output": out.to_str().unwrap() }));

        tool.call(&cfg).expect("script should succeed");
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\n");
        assert!(tool.is_done(&cfg));
    }

    #[test]
    fn failing_stage_in_a_pipe_fails_the_script() {
        let tool = ScriptTool::new("pipe", "false | cat > /dev/null");
        let err = tool.call(&Configuration::new()).unwrap_err();
        assert!(matches!(err, ToolError::ExitStatus { code: Some(1) }));
    }

    #[test]
    fn cleanup_after_failure_removes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("partial.txt");
        std::fs::write(&out, "half").unwrap();

        let tool = ScriptTool::new("t", "exit 1").output("output", "");
        let cfg = config(json!({ "output": out.to_str().unwrap() }));

        tool.cleanup(&cfg, false).unwrap();
        assert!(out.exists());
        tool.cleanup(&cfg, true).unwrap();
        assert!(!out.exists());
    }
}
