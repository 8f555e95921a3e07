//! Close-once terminal state shared by all lifecycle implementations

use crate::LifecycleError;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Terminal error slot guarding a one-shot done signal.
///
/// The error is stored before the signal fires and the first writer wins.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    signal: CancellationToken,
    err: Mutex<Option<LifecycleError>>,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record `err` and fire the signal. Returns false if already finalized.
    pub(crate) fn set(&self, err: LifecycleError) -> bool {
        let mut slot = self.err.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        drop(slot);

        self.signal.cancel();
        true
    }

    pub(crate) fn err(&self) -> Option<LifecycleError> {
        *self.err.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_set(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub(crate) async fn wait(&self) {
        self.signal.cancelled().await
    }
}
