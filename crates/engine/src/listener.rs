//! Lifecycle listeners.
//!
//! A [`Listeners`] value holds four ordered lists, one per [`Event`]. Lists
//! are append-only: defaults for a kind of tool come first, instance-level
//! additions follow. Invocation is synchronous and in registration order; a
//! listener that returns an error or panics is reported but never stops the
//! remaining listeners of the same event.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tools::Configuration;
use tracing::{info, warn};

use crate::Tool;

/// A lifecycle observer, called with the tool and the run's configuration.
pub type Listener = Arc<dyn Fn(&Tool, &Configuration) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Tool, &Configuration) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Start,
    Success,
    Fail,
    Finish,
}

impl Event {
    pub const ALL: [Event; 4] = [Event::Start, Event::Success, Event::Fail, Event::Finish];

    pub fn as_str(self) -> &'static str {
        match self {
            Event::Start => "on_start",
            Event::Success => "on_success",
            Event::Fail => "on_fail",
            Event::Finish => "on_finish",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listener that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerFailure {
    pub event: Event,
    /// Position of the listener in its event list.
    pub index: usize,
    pub message: String,
}

impl fmt::Display for ListenerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} listener #{} failed: {}", self.event, self.index, self.message)
    }
}

#[derive(Clone, Default)]
pub struct Listeners {
    on_start: Vec<Listener>,
    on_success: Vec<Listener>,
    on_fail: Vec<Listener>,
    on_finish: Vec<Listener>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event, listener: Listener) {
        self.list_mut(event).push(listener);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, event: Event, listener: Listener) -> Self {
        self.push(event, listener);
        self
    }

    /// Append every list of `other` after the corresponding list of `self`.
    pub fn extend(&mut self, other: &Listeners) {
        for event in Event::ALL {
            let extra = other.get(event).to_vec();
            self.list_mut(event).extend(extra);
        }
    }

    pub fn get(&self, event: Event) -> &[Listener] {
        match event {
            Event::Start => &self.on_start,
            Event::Success => &self.on_success,
            Event::Fail => &self.on_fail,
            Event::Finish => &self.on_finish,
        }
    }

    pub fn len(&self, event: Event) -> usize {
        self.get(event).len()
    }

    pub fn is_empty(&self) -> bool {
        Event::ALL.iter().all(|e| self.get(*e).is_empty())
    }

    fn list_mut(&mut self, event: Event) -> &mut Vec<Listener> {
        match event {
            Event::Start => &mut self.on_start,
            Event::Success => &mut self.on_success,
            Event::Fail => &mut self.on_fail,
            Event::Finish => &mut self.on_finish,
        }
    }

    /// Invoke every listener for `event`, in order, and collect failures.
    pub(crate) fn notify(
        &self,
        event: Event,
        tool: &Tool,
        config: &Configuration,
    ) -> Vec<ListenerFailure> {
        let mut failures = Vec::new();
        for (index, listener) in self.get(event).iter().enumerate() {
            let message = match catch_unwind(AssertUnwindSafe(|| listener(tool, config))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => format!("listener panicked: {}", panic_message(panic.as_ref())),
            };
            warn!(tool = %tool.name(), %event, index, %message, "listener failed");
            failures.push(ListenerFailure {
                event,
                index,
                message,
            });
        }
        failures
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("on_start", &self.on_start.len())
            .field("on_success", &self.on_success.len())
            .field("on_fail", &self.on_fail.len())
            .field("on_finish", &self.on_finish.len())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Default listeners that report every lifecycle event through `tracing`.
pub fn logging_listeners() -> Listeners {
    Listeners::new()
        .with(
            Event::Start,
            listener(|tool, _| {
                info!(tool = %tool.name(), "tool started");
                Ok(())
            }),
        )
        .with(
            Event::Success,
            listener(|tool, _| {
                info!(tool = %tool.name(), "tool succeeded");
                Ok(())
            }),
        )
        .with(
            Event::Fail,
            listener(|tool, _| {
                warn!(tool = %tool.name(), "tool failed");
                Ok(())
            }),
        )
        .with(
            Event::Finish,
            listener(|tool, _| {
                info!(tool = %tool.name(), "tool finished");
                Ok(())
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tools::mock::MockTool;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Listener {
        let log = Arc::clone(log);
        listener(move |_, _| {
            log.lock().unwrap().push(label.to_string());
            Ok(())
        })
    }

    #[test]
    fn extend_keeps_existing_listeners_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut defaults = Listeners::new().with(Event::Start, recorder(&log, "default"));
        let instance = Listeners::new().with(Event::Start, recorder(&log, "instance"));
        defaults.extend(&instance);

        let tool = Tool::new(MockTool::succeeding("t"));
        let failures = defaults.notify(Event::Start, &tool, &Configuration::new());

        assert!(failures.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["default", "instance"]);
        assert_eq!(defaults.len(Event::Start), 2);
        assert_eq!(defaults.len(Event::Finish), 0);
    }

    #[test]
    fn failing_listeners_do_not_stop_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Listeners::new()
            .with(Event::Finish, listener(|_, _| anyhow::bail!("broken observer")))
            .with(Event::Finish, listener(|_, _| panic!("exploding observer")))
            .with(Event::Finish, recorder(&log, "last"));

        let tool = Tool::new(MockTool::succeeding("t"));
        let failures = chain.notify(Event::Finish, &tool, &Configuration::new());

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].index, 0);
        assert_eq!(failures[0].message, "broken observer");
        assert_eq!(failures[1].message, "listener panicked: exploding observer");
        assert_eq!(*log.lock().unwrap(), vec!["last"]);
    }

    #[test]
    fn logging_listeners_cover_every_event() {
        let chain = logging_listeners();
        for event in Event::ALL {
            assert_eq!(chain.len(event), 1, "{event}");
        }
    }
}
