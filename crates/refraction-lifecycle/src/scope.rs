//! Root lifecycle owned by whoever starts the work

use crate::latch::Latch;
use crate::{Lifecycle, LifecycleError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// A lifecycle that ends on [`Scope::cancel`] or when its deadline passes.
#[derive(Debug, Default)]
pub struct Scope {
    latch: Latch,
    deadline: Option<Instant>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            latch: Latch::new(),
            deadline: None,
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            latch: Latch::new(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// End the scope. No-op if it already ended.
    pub fn cancel(&self) {
        self.latch.set(LifecycleError::Canceled);
    }

    fn expire_if_due(&self) {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.latch.set(LifecycleError::DeadlineExceeded);
            }
        }
    }
}

#[async_trait]
impl Lifecycle for Scope {
    async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.latch.wait() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        self.latch.set(LifecycleError::DeadlineExceeded);
                    }
                }
            }
            None => self.latch.wait().await,
        }
    }

    fn is_done(&self) -> bool {
        self.expire_if_due();
        self.latch.is_set()
    }

    fn err(&self) -> Option<LifecycleError> {
        self.expire_if_due();
        self.latch.err()
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
