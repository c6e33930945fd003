//! Provider Fallback
//!
//! State machine that walks an ordered provider sequence until one attempt
//! succeeds. The cursor is reset at the start of every top-level request.

use crate::config::ProviderEntry;
use crate::error::{AgentError, Result};

/// Sequencer state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    /// Next attempt goes to the entry at this index
    Pending(usize),
    /// The entry at this index answered the last attempt
    Resolved(usize),
    /// Every entry failed
    Exhausted,
}

#[derive(Debug)]
pub struct FallbackSequencer {
    entries: Vec<ProviderEntry>,
    state: SequencerState,
    last_error: Option<AgentError>,
}

impl FallbackSequencer {
    /// Sequencer over a non-empty provider sequence.
    pub fn new(entries: Vec<ProviderEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(AgentError::Config(
                "Provider sequence must contain at least one provider".into(),
            ));
        }
        Ok(Self {
            entries,
            state: SequencerState::Pending(0),
            last_error: None,
        })
    }

    /// Start a new top-level request from the first provider.
    pub fn reset(&mut self) {
        self.state = SequencerState::Pending(0);
        self.last_error = None;
    }

    pub const fn state(&self) -> SequencerState {
        self.state
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    /// Index and entry for the next attempt; `None` once exhausted.
    ///
    /// A resolved provider keeps serving follow-up calls of the same request.
    pub fn current(&self) -> Option<(usize, &ProviderEntry)> {
        match self.state {
            SequencerState::Pending(i) | SequencerState::Resolved(i) => {
                self.entries.get(i).map(|e| (i, e))
            }
            SequencerState::Exhausted => None,
        }
    }

    /// Record a successful attempt on the current entry.
    pub fn succeed(&mut self) {
        if let SequencerState::Pending(i) | SequencerState::Resolved(i) = self.state {
            self.state = SequencerState::Resolved(i);
            self.last_error = None;
        }
    }

    /// Record a failed attempt and move to the next entry.
    pub fn fail(&mut self, error: AgentError) {
        let next = match self.state {
            SequencerState::Pending(i) | SequencerState::Resolved(i) => i + 1,
            SequencerState::Exhausted => self.entries.len(),
        };
        self.last_error = Some(error);
        self.state = if next < self.entries.len() {
            SequencerState::Pending(next)
        } else {
            SequencerState::Exhausted
        };
    }

    /// Label of the provider that answered last, if any.
    pub fn active_provider(&self) -> Option<&str> {
        match self.state {
            SequencerState::Resolved(i) => self.entries.get(i).map(ProviderEntry::label),
            _ => None,
        }
    }

    /// The error that exhausted the sequence.
    pub fn take_error(&mut self) -> AgentError {
        self.last_error.take().unwrap_or_else(|| {
            AgentError::Provider("Provider sequence exhausted without an attempt".into())
        })
    }
}
