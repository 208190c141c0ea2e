//! `tools` crate: the `ExecutableTool` trait and built-in tool implementations.
//!
//! Every tool, built-in or user-defined, must implement [`ExecutableTool`].
//! The engine crate drives the run lifecycle through this trait object.

pub mod definition;
pub mod error;
pub mod lines;
pub mod mock;
pub mod script;
pub mod traits;

pub use definition::ToolDefinition;
pub use error::{ToolError, ValidationError};
pub use lines::WriteLines;
pub use script::ScriptTool;
pub use traits::{Configuration, ExecutableTool, Incoming, IncomingEdge};
