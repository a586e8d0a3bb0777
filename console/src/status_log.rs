//! Rendered status lines the executor has reported this session

use common::status::StatusEvent;
use std::sync::{Mutex, MutexGuard};

/// Append-only log of rendered status messages
///
/// Has its own lock so status delivery never waits on the coordinator
#[derive(Debug, Default)]
pub struct StatusLog {
    lines: Mutex<Vec<String>>,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lines(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Renders and appends one event, returns the rendered line
    pub fn on_status(&self, event: &StatusEvent) -> String {
        let line = event.render();
        self.lines().push(line.clone());
        line
    }

    pub fn len(&self) -> usize {
        self.lines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines().clone()
    }

    /// Lines appended after the first `from`
    pub fn since(&self, from: usize) -> Vec<String> {
        self.lines().iter().skip(from).cloned().collect()
    }
}
