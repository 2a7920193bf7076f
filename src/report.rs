//! Per-item outcomes of batch operations
//!
//! Every selector, identifier or archive a batch touches gets exactly one
//! entry, so nothing is skipped silently and the exit status can reflect any
//! failure.

use crate::error::SyncError;
use std::fmt;

/// Result of processing one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded(String),
    Skipped(String),
    Failed(String),
}

/// One reported item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Selector, identifier or archive name
    pub subject: String,
    pub outcome: Outcome,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Succeeded(msg) => write!(f, "✓ {}: {msg}", self.subject),
            Outcome::Skipped(msg) => write!(f, "- {}: {msg}", self.subject),
            Outcome::Failed(msg) => write!(f, "✗ {}: {msg}", self.subject),
        }
    }
}

/// Ordered collection of outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    entries: Vec<Entry>,
}

impl Report {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeeded(&mut self, subject: impl Into<String>, msg: impl Into<String>) {
        self.push(subject.into(), Outcome::Succeeded(msg.into()));
    }

    pub fn skipped(&mut self, subject: impl Into<String>, msg: impl Into<String>) {
        self.push(subject.into(), Outcome::Skipped(msg.into()));
    }

    /// Record a failure; only the first line of the error is kept
    pub fn failed(&mut self, subject: impl Into<String>, err: &SyncError) {
        let text = err.to_string();
        let headline = text.lines().next().unwrap_or_default().to_string();
        self.push(subject.into(), Outcome::Failed(headline));
    }

    fn push(&mut self, subject: String, outcome: Outcome) {
        match &outcome {
            Outcome::Succeeded(msg) => tracing::info!(subject = %subject, "{msg}"),
            Outcome::Skipped(msg) => tracing::info!(subject = %subject, "Skipped: {msg}"),
            Outcome::Failed(msg) => tracing::error!(subject = %subject, "{msg}"),
        }
        self.entries.push(Entry { subject, outcome });
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Succeeded(_)))
    }

    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }

    /// Entry for `subject`, if reported
    #[must_use]
    pub fn find(&self, subject: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.subject == subject)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        write!(
            f,
            "{} succeeded, {} skipped, {} failed",
            self.succeeded_count(),
            self.skipped_count(),
            self.failed_count()
        )
    }
}
