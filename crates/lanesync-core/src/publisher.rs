//! Last-write-wins holder of the externally visible engine state.

use serde::Serialize;
use tokio::sync::watch;

use crate::fetcher::{Failure, FailureKind};
use crate::history::HistorySnapshot;
use crate::snapshot::Snapshot;

/// What observers see after a poll: either a live view or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PublishedState {
    Live {
        snapshot: Snapshot,
        history: HistorySnapshot,
    },
    Failed {
        kind: FailureKind,
        detail: String,
    },
}

impl PublishedState {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            PublishedState::Live { snapshot, .. } => Some(snapshot),
            PublishedState::Failed { .. } => None,
        }
    }

    pub fn history(&self) -> Option<&HistorySnapshot> {
        match self {
            PublishedState::Live { history, .. } => Some(history),
            PublishedState::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PublishedState::Live { .. } => None,
            PublishedState::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.failure_kind() == Some(FailureKind::Unauthenticated)
    }
}

impl From<Failure> for PublishedState {
    fn from(failure: Failure) -> Self {
        PublishedState::Failed {
            kind: failure.kind,
            detail: failure.detail,
        }
    }
}

/// Single-slot publisher. No queuing: observers only see the most recent state.
///
/// `None` until the first poll settles.
#[derive(Debug)]
pub struct StatePublisher {
    tx: watch::Sender<Option<PublishedState>>,
}

impl StatePublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Replaces the current state and wakes subscribers.
    pub fn publish(&self, state: PublishedState) {
        self.tx.send_replace(Some(state));
    }

    pub fn current(&self) -> Option<PublishedState> {
        self.tx.borrow().clone()
    }

    /// Receiver that is marked changed after every publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<PublishedState>> {
        self.tx.subscribe()
    }
}

impl Default for StatePublisher {
    fn default() -> Self {
        Self::new()
    }
}
