//! Completion Tracker
//!
//! Counts how many branches of a fan-out request have reached their terminal
//! event. The merge loop consults it to decide when the outbound stream is
//! finished, so a branch must only ever be counted once no matter how many
//! times it is reported.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::events::BranchId;

/// Thread-safe terminal-branch counter
#[derive(Debug, Default)]
pub struct CompletionTracker {
    /// Branches already counted
    terminal: Mutex<HashSet<BranchId>>,
    /// Cached `terminal.len()` for lock-free reads
    count: AtomicUsize,
}

impl CompletionTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a branch emitted its terminal event
    ///
    /// Returns `true` the first time a branch is marked and `false` for every
    /// repeat, which leaves the count unchanged.
    pub fn mark_terminal(&self, branch: BranchId) -> bool {
        let mut terminal = self.terminal.lock();
        let inserted = terminal.insert(branch);
        if inserted {
            self.count.store(terminal.len(), Ordering::Release);
        }
        inserted
    }

    /// Number of distinct branches marked terminal
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Whether `total` branches have all been marked terminal
    #[must_use]
    pub fn is_complete(&self, total: usize) -> bool {
        self.count() >= total
    }

    /// Whether a specific branch has been marked terminal
    #[must_use]
    pub fn is_terminal(&self, branch: BranchId) -> bool {
        self.terminal.lock().contains(&branch)
    }
}
