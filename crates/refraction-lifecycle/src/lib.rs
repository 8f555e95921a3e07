//! Cancellation lifecycles for tunnel sessions
//!
//! A [`Lifecycle`] is a done signal plus the error that ended it and an optional
//! deadline. The station hands every tunnel two of them (the manager root and the
//! request that produced the connection pair) and [`merge`] folds them into one.
//!
//! # Example
//!
//! ```ignore
//! use refraction_lifecycle::{merge, Lifecycle, Scope};
//! use std::sync::Arc;
//!
//! let root = Arc::new(Scope::new());
//! let request = Arc::new(Scope::with_timeout(std::time::Duration::from_secs(30)));
//!
//! let merged = merge(root.clone(), request);
//! root.cancel();
//! merged.done().await;
//! assert!(merged.err().is_some());
//! ```

mod latch;
mod merge;
mod scope;

pub use merge::{merge, MergedLifecycle};
pub use scope::Scope;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a lifecycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("lifecycle canceled")]
    Canceled,

    #[error("lifecycle deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellable lifecycle with an optional deadline
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Resolves once the lifecycle has ended
    async fn done(&self);

    /// Non-blocking check of the done signal
    fn is_done(&self) -> bool;

    /// `None` while running, the terminal error afterwards
    fn err(&self) -> Option<LifecycleError>;

    /// Point in time at which the lifecycle ends by itself, if any
    fn deadline(&self) -> Option<Instant>;
}

/// A bare token is a lifecycle without a deadline that can only be canceled.
#[async_trait]
impl Lifecycle for CancellationToken {
    async fn done(&self) {
        self.cancelled().await
    }

    fn is_done(&self) -> bool {
        self.is_cancelled()
    }

    fn err(&self) -> Option<LifecycleError> {
        self.is_cancelled().then_some(LifecycleError::Canceled)
    }

    fn deadline(&self) -> Option<Instant> {
        None
    }
}
