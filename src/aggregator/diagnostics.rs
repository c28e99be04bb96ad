//! Bounded collection of non-fatal query diagnostics.

use crate::utils::config::MAX_DIAGNOSTICS;
use serde::{Deserialize, Serialize};

/// Diagnostic messages, capped at `MAX_DIAGNOSTICS`
///
/// **Public** - attached to match reports and flamegraphs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub messages: Vec<String>,

    /// Messages not kept because the cap was reached
    pub dropped: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        if self.messages.len() < MAX_DIAGNOSTICS {
            self.messages.push(message.into());
        } else {
            self.dropped += 1;
        }
    }

    /// Append another collection, keeping both dropped counts
    pub fn merge(&mut self, other: &Diagnostics) {
        for message in &other.messages {
            self.push(message.clone());
        }
        self.dropped += other.dropped;
    }

    /// Total number of diagnostics raised, kept or not
    pub fn total(&self) -> usize {
        self.messages.len() + self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
