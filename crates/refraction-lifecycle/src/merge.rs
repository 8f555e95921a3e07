//! Merging two independent lifecycles into one
//!
//! The merged lifecycle ends as soon as either parent ends and reports that
//! parent's error. A background watcher fans the two parent signals in; the
//! terminal error is written under a lock before the done signal fires, so
//! concurrent observers agree on a single outcome.

use crate::latch::Latch;
use crate::{Lifecycle, LifecycleError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::trace;

/// Lifecycle derived from a `main` and a `sub` parent
pub struct MergedLifecycle {
    main: Arc<dyn Lifecycle>,
    sub: Arc<dyn Lifecycle>,
    latch: Latch,
}

/// Derive one lifecycle from two parents.
///
/// Returns immediately and spawns the watcher on the current tokio runtime, so
/// it must be called from within one.
pub fn merge(main: Arc<dyn Lifecycle>, sub: Arc<dyn Lifecycle>) -> Arc<MergedLifecycle> {
    let merged = Arc::new(MergedLifecycle {
        main,
        sub,
        latch: Latch::new(),
    });

    tokio::spawn(Arc::clone(&merged).watch());
    merged
}

impl MergedLifecycle {
    /// End the merged lifecycle without touching either parent.
    ///
    /// Also releases the watcher task. No-op if already ended.
    pub fn cancel(&self) {
        self.latch.set(LifecycleError::Canceled);
    }

    async fn watch(self: Arc<Self>) {
        let err = tokio::select! {
            _ = self.main.done() => self.main.err(),
            _ = self.sub.done() => self.sub.err(),
            _ = self.latch.wait() => return,
        };

        // A parent whose signal fired always reports a cause; fall back to
        // Canceled rather than leave the slot empty.
        if !self.latch.set(err.unwrap_or(LifecycleError::Canceled)) {
            trace!("merged lifecycle finalized concurrently");
        }
    }
}

#[async_trait]
impl Lifecycle for MergedLifecycle {
    async fn done(&self) {
        self.latch.wait().await
    }

    fn is_done(&self) -> bool {
        self.latch.is_set()
    }

    fn err(&self) -> Option<LifecycleError> {
        self.latch.err()
    }

    /// The earlier of the two parent deadlines, or whichever one exists.
    fn deadline(&self) -> Option<Instant> {
        match (self.main.deadline(), self.sub.deadline()) {
            (Some(main), Some(sub)) => Some(main.min(sub)),
            (main, sub) => main.or(sub),
        }
    }
}

impl std::fmt::Debug for MergedLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedLifecycle")
            .field("err", &self.latch.err())
            .field("deadline", &self.deadline())
            .finish()
    }
}
