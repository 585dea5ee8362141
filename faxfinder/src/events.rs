//! Run context shared between a batch worker and whoever is watching it
//!
//! The worker reports through an [`EventSender`] and polls a [`CancelToken`];
//! the front end holds the receiving half of the channel and a clone of the
//! token. Nothing else crosses between them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// A record is about to be processed; `index` is 1-based
    Progress {
        name: String,
        index: usize,
        total: usize,
    },
    Log {
        message: String,
    },
    Completed {
        success_count: usize,
        error_count: usize,
        skipped_count: usize,
    },
    Cancelled {
        processed: usize,
    },
    Failed {
        reason: String,
    },
}

impl BatchEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchEvent::Completed { .. } | BatchEvent::Cancelled { .. } | BatchEvent::Failed { .. }
        )
    }
}

/// Cooperative cancellation flag, checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sending half of the event channel. A sender without a channel drops
/// everything, which suits one-off lookups and tests.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<UnboundedSender<BatchEvent>>,
}

impl EventSender {
    pub fn channel() -> (Self, UnboundedReceiver<BatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: BatchEvent) {
        if let Some(tx) = &self.tx {
            // The receiver going away just means nobody is listening any more.
            let _ = tx.send(event);
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("{}", message);
        self.send(BatchEvent::Log { message });
    }
}

/// Per-run state owned by the worker.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub cancel: CancelToken,
    pub events: EventSender,
}

impl RunContext {
    pub fn new(cancel: CancelToken, events: EventSender) -> Self {
        Self { cancel, events }
    }
}
