//! Serializable tool definitions used by job files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ExecutableTool, ScriptTool, WriteLines};

/// A built-in tool described as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDefinition {
    /// A command template run by an interpreter.
    Script {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        interpreter: Option<String>,
        command: String,
        #[serde(default)]
        inputs: Vec<String>,
        #[serde(default)]
        outputs: BTreeMap<String, String>,
    },
    /// Fixed lines written to the `output` file or stdout.
    Lines {
        #[serde(default)]
        name: Option<String>,
        lines: Vec<String>,
    },
}

impl ToolDefinition {
    /// Instantiate the tool. `fallback_name` is used when the definition
    /// carries no name of its own.
    pub fn build(&self, fallback_name: &str) -> Box<dyn ExecutableTool> {
        match self {
            Self::Script {
                name,
                interpreter,
                command,
                inputs,
                outputs,
            } => {
                let mut tool = ScriptTool::new(name.as_deref().unwrap_or(fallback_name), command);
                if let Some(interpreter) = interpreter {
                    tool = tool.interpreter(interpreter);
                }
                for input in inputs {
                    tool = tool.input(input);
                }
                for (key, template) in outputs {
                    tool = tool.output(key, template);
                }
                Box::new(tool)
            }
            Self::Lines { name, lines } => Box::new(WriteLines::new(
                name.as_deref().unwrap_or(fallback_name),
                lines.iter().cloned(),
            )),
        }
    }
}
