use tokio::sync::mpsc::UnboundedSender;

use super::report::FailureKind;
use crate::album::PageToken;

/// States of one synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Enumerating,
    Dispatching,
    Draining,
    Done,
    Cancelled,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncState::Enumerating => "enumerating",
            SyncState::Dispatching => "dispatching",
            SyncState::Draining => "draining",
            SyncState::Done => "done",
            SyncState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Progress published by the synchronizer.
///
/// After `Enumerated { total }`, every one of those `total` items produces
/// exactly one of `Skipped`, `Planned`, `Downloaded`, `Failed` or
/// `Abandoned`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    StateChanged(SyncState),
    PageListed { page: PageToken, items: usize },
    Enumerated { total: usize },
    Skipped { identifier: String },
    Planned { identifier: String },
    Downloaded { identifier: String, bytes: u64 },
    Failed {
        identifier: String,
        kind: FailureKind,
        reason: String,
    },
    Abandoned { identifier: String },
    CommentWritten { identifier: String },
}

/// Optional event sink. A closed receiver is not an error.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<UnboundedSender<SyncEvent>>);

impl EventSink {
    pub(crate) fn new(tx: UnboundedSender<SyncEvent>) -> Self {
        Self(Some(tx))
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(event);
        }
    }
}
