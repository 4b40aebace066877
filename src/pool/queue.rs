//! Queue entries and the active-slot guard.

use std::cmp::{Ordering, Reverse};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::JobError;

/// What a queued caller receives: a slot to run in, or the reason it never will.
pub(crate) type DispatchSignal = Result<super::ActiveSlot, JobError>;

/// A submitted operation waiting for a free slot.
///
/// Ordered by priority (higher first), then by submission order.
#[derive(Debug)]
pub(crate) struct QueuedOperation {
    pub(crate) id: String,
    pub(crate) priority: i32,
    pub(crate) seq: u64,
    pub(crate) enqueued_at: Instant,
    pub(crate) dispatch: oneshot::Sender<DispatchSignal>,
}

impl QueuedOperation {
    pub(crate) fn new(
        seq: u64,
        priority: i32,
        dispatch: oneshot::Sender<DispatchSignal>,
    ) -> Self {
        Self {
            id: format!("op-{seq}"),
            priority,
            seq,
            enqueued_at: Instant::now(),
            dispatch,
        }
    }

    /// The caller stopped waiting for this entry.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.dispatch.is_closed()
    }

    fn sort_key(&self) -> (i32, Reverse<u64>) {
        (self.priority, Reverse(self.seq))
    }
}

impl PartialEq for QueuedOperation {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedOperation {}

impl PartialOrd for QueuedOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedOperation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
