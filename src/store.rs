use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::types::{PromptEntry, ResultEntry, ResultState};

pub(crate) const INTERRUPTED_MESSAGE: &str = "Generation was interrupted";

/// Ordered per-prompt outcomes, one per loaded prompt.
///
/// Clones are handles to the same collection: the pipeline is the only
/// writer, the view reads snapshots while a run is in progress.
#[derive(Clone, Default)]
pub(crate) struct ResultStore {
    entries: Arc<RwLock<Vec<ResultEntry>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StateCounts {
    pub pending: usize,
    pub generating: usize,
    pub success: usize,
    pub error: usize,
}

impl ResultStore {
    pub fn replace_all(&self, prompts: &[PromptEntry]) {
        *self.entries.write() = prompts.iter().map(ResultEntry::pending).collect();
    }

    pub fn update(&self, index: usize, state: ResultState) {
        match self.entries.write().get_mut(index) {
            Some(entry) => entry.state = state,
            None => warn!("Ignoring update for unknown result index {index}"),
        }
    }

    pub fn snapshot(&self) -> Vec<ResultEntry> {
        self.entries.read().clone()
    }

    pub fn get(&self, index: usize) -> Option<ResultEntry> {
        self.entries.read().get(index).cloned()
    }

    pub fn successful(&self) -> Vec<ResultEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.image().is_some())
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for entry in self.entries.read().iter() {
            match entry.state {
                ResultState::Pending => counts.pending += 1,
                ResultState::Generating => counts.generating += 1,
                ResultState::Success(_) => counts.success += 1,
                ResultState::Error(_) => counts.error += 1,
            }
        }
        counts
    }

    pub fn reset_pending(&self) {
        for entry in self.entries.write().iter_mut() {
            entry.state = ResultState::Pending;
        }
    }

    /// Marks whatever is still in flight as failed. Returns how many were touched.
    pub fn interrupt_generating(&self) -> usize {
        let mut touched = 0;
        for entry in self.entries.write().iter_mut().filter(|e| e.is_generating()) {
            entry.state = ResultState::Error(INTERRUPTED_MESSAGE.to_string());
            touched += 1;
        }
        touched
    }
}
