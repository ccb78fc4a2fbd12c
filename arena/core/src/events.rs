//! Branch Events
//!
//! Events produced by a single branch of a fan-out request. Every event is
//! tagged with the branch that produced it, so the consumer can attribute
//! output even when several branches target the same model.
//!
//! # Lifecycle
//!
//! A branch emits zero or more [`BranchEventKind::Fragment`] events followed by
//! exactly one terminal event ([`BranchEventKind::Done`] or
//! [`BranchEventKind::Error`]).

use std::fmt;

/// Branch identifier
///
/// The position of the model in the request's model list. Duplicate model ids
/// in one request still get distinct branch ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub usize);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch-{}", self.0)
    }
}

/// Lifecycle state of a branch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BranchState {
    /// Not yet opened
    #[default]
    Pending,
    /// Underlying stream is open and producing fragments
    Streaming,
    /// Completed normally
    Done,
    /// Ended with an error
    Failed,
}

impl BranchState {
    /// Whether the branch can emit no further events
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// An event from one branch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchEvent {
    /// The branch this event belongs to
    pub branch: BranchId,
    /// Model identifier of the branch
    pub model: String,
    /// The event kind
    pub kind: BranchEventKind,
}

/// Kind of branch event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchEventKind {
    /// An incremental piece of the response (may be empty)
    Fragment {
        /// Fragment text
        text: String,
    },
    /// The branch failed; no further events follow
    Error {
        /// Failure description
        message: String,
    },
    /// The branch completed; no further events follow
    Done,
}

impl BranchEvent {
    /// Create a fragment event
    pub fn fragment(branch: BranchId, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            branch,
            model: model.into(),
            kind: BranchEventKind::Fragment { text: text.into() },
        }
    }

    /// Create an error event
    pub fn error(branch: BranchId, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            branch,
            model: model.into(),
            kind: BranchEventKind::Error {
                message: message.into(),
            },
        }
    }

    /// Create a done event
    pub fn done(branch: BranchId, model: impl Into<String>) -> Self {
        Self {
            branch,
            model: model.into(),
            kind: BranchEventKind::Done,
        }
    }

    /// Whether this is the last event its branch will emit
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            BranchEventKind::Done | BranchEventKind::Error { .. }
        )
    }
}
