//! Command history for an interactive debugger session.

/// Ordered record of the commands entered during one session.
///
/// Owned by the command loop and freed with it; the process-control layer
/// never sees it.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<String>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command line.
    pub fn append(&mut self, line: impl Into<String>) {
        self.entries.push(line.into());
    }

    /// The most recently recorded command, recalled on blank input.
    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
