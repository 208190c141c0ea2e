//! `WriteLines` writes a fixed set of lines to an output sink.

use std::fs::File;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{Configuration, ExecutableTool, ToolError};

/// Where `WriteLines` sends its output.
#[derive(Debug, Clone)]
pub enum LineSink {
    /// The file named by the `output` configuration key, or stdout if unset.
    ConfiguredOutput,
    /// An in-memory buffer shared with the caller.
    Buffer(Arc<Mutex<Vec<u8>>>),
}

/// Writes `lines` to its sink, one per line. Has no validation of its own.
#[derive(Debug, Clone)]
pub struct WriteLines {
    name: String,
    lines: Vec<String>,
    sink: LineSink,
}

impl WriteLines {
    pub fn new<I, S>(name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            lines: lines.into_iter().map(Into::into).collect(),
            sink: LineSink::ConfiguredOutput,
        }
    }

    /// Write into `buffer` instead of the configured output.
    pub fn into_buffer(mut self, buffer: Arc<Mutex<Vec<u8>>>) -> Self {
        self.sink = LineSink::Buffer(buffer);
        self
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        for line in &self.lines {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

impl ExecutableTool for WriteLines {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, config: &Configuration) -> Result<(), ToolError> {
        match &self.sink {
            LineSink::Buffer(buffer) => {
                let mut buf = buffer
                    .lock()
                    .map_err(|_| ToolError::failed("output buffer lock poisoned"))?;
                self.write_to(&mut *buf)?;
            }
            LineSink::ConfiguredOutput => match config.get("output").and_then(|v| v.as_str()) {
                Some(path) => {
                    debug!(tool = %self.name, path, "writing lines to file");
                    let mut file = File::create(path)?;
                    self.write_to(&mut file)?;
                }
                None => self.write_to(&mut io::stdout().lock())?,
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::config;
    use serde_json::json;

    #[test]
    fn writes_lines_to_shared_buffer() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let tool = WriteLines::new("hello", ["Hello", "World"]).into_buffer(buffer.clone());

        assert!(tool.validate(&Configuration::new(), None).is_ok());
        tool.call(&Configuration::new()).expect("call should succeed");

        let written = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert_eq!(written, "Hello\nWorld\n");
    }

    #[test]
    fn writes_lines_to_configured_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let tool = WriteLines::new("hello", ["a", "b"]);

        tool.call(&config(json!({ "output": path.to_str().unwrap() })))
            .expect("call should succeed");

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }

    #[test]
    fn unwritable_output_is_an_io_error() {
        let tool = WriteLines::new("hello", ["a"]);
        let err = tool
            .call(&config(json!({ "output": "/nonexistent-dir/out.txt" })))
            .unwrap_err();
        assert!(matches!(err, ToolError::Io(_)));
    }
}
