//! Event channels a search session reports through.
//!
//! One channel per event kind. Each is meant for a single subscriber:
//! progress fires any number of times per session, finished or cancelled
//! exactly once.

use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::progress::SearchProgress;
use crate::record::Record;

/// Terminal result of a session. Ownership of the record passes to the
/// receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchOutcome {
    pub record: Record,
    /// One line per provider that reported an error, if any did.
    pub errors: Option<String>,
}

/// Receiving ends handed to the caller.
#[derive(Debug)]
pub struct SearchEvents {
    pub progress: UnboundedReceiver<SearchProgress>,
    pub finished: UnboundedReceiver<SearchOutcome>,
    pub cancelled: UnboundedReceiver<SearchOutcome>,
}

#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    progress: UnboundedSender<SearchProgress>,
    finished: UnboundedSender<SearchOutcome>,
    cancelled: UnboundedSender<SearchOutcome>,
}

pub(crate) fn channel() -> (EventSender, SearchEvents) {
    let (progress_tx, progress_rx) = unbounded_channel();
    let (finished_tx, finished_rx) = unbounded_channel();
    let (cancelled_tx, cancelled_rx) = unbounded_channel();
    (
        EventSender {
            progress: progress_tx,
            finished: finished_tx,
            cancelled: cancelled_tx,
        },
        SearchEvents {
            progress: progress_rx,
            finished: finished_rx,
            cancelled: cancelled_rx,
        },
    )
}

impl EventSender {
    pub(crate) fn progress(&self, p: SearchProgress) {
        if self.progress.send(p).is_err() {
            tracing::trace!("Progress receiver dropped");
        }
    }

    pub(crate) fn finished(&self, outcome: SearchOutcome) {
        if self.finished.send(outcome).is_err() {
            tracing::debug!("Finished receiver dropped, result discarded");
        }
    }

    pub(crate) fn cancelled(&self, outcome: SearchOutcome) {
        if self.cancelled.send(outcome).is_err() {
            tracing::debug!("Cancelled receiver dropped, result discarded");
        }
    }
}
