//! Tunnel launch under a merged manager/request lifecycle

use crate::{Conn, ProxyConfig, ProxyError, Tunnel};
use refraction_lifecycle::{merge, Lifecycle, LifecycleError, MergedLifecycle};
use refraction_stats::{GlobalStats, TunnelMetadata, TunnelStats};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Span};
use uuid::Uuid;

/// Launches tunnels that all end when the manager's root lifecycle ends
pub struct TunnelManager {
    root: Arc<dyn Lifecycle>,
    global: Arc<GlobalStats>,
    config: ProxyConfig,
    admission: Option<Arc<Semaphore>>,
}

/// Handle on a running tunnel
pub struct TunnelHandle {
    id: Uuid,
    lifecycle: Arc<MergedLifecycle>,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The merged lifecycle the tunnel runs under
    pub fn lifecycle(&self) -> &Arc<MergedLifecycle> {
        &self.lifecycle
    }

    /// Tear this tunnel down without affecting its parents.
    pub fn cancel(&self) {
        self.lifecycle.cancel();
    }

    /// Wait for the tunnel to close both connections and log its record.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            warn!(tunnel_id = %self.id, "Tunnel task failed: {}", e);
        }
    }
}

impl TunnelManager {
    pub fn new(
        root: Arc<dyn Lifecycle>,
        global: Arc<GlobalStats>,
        config: ProxyConfig,
    ) -> Result<Self, ProxyError> {
        config.validate()?;
        let admission = config
            .max_sessions
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Ok(Self {
            root,
            global,
            config,
            admission,
        })
    }

    pub fn global(&self) -> &Arc<GlobalStats> {
        &self.global
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Fresh stats bound to this manager's aggregator.
    ///
    /// Create these as soon as a connection is accepted so dial and connect
    /// errors can be recorded even if forwarding never starts.
    pub fn new_stats(&self, metadata: TunnelMetadata) -> TunnelStats {
        TunnelStats::new(self.global.clone(), metadata)
    }

    /// Forward traffic between `src` and `dst` in the background.
    ///
    /// `src -> dst` is upload, `dst -> src` is download. The tunnel ends when
    /// either the manager root or `request` ends, both sides close, or an I/O
    /// error occurs. Fails once the root has ended, or when `max_sessions` is
    /// configured and reached.
    pub fn launch<S: Conn, D: Conn>(
        &self,
        request: Arc<dyn Lifecycle>,
        src: S,
        dst: D,
        stats: TunnelStats,
        span: Span,
    ) -> Result<TunnelHandle, ProxyError> {
        self.launch_tagged(request, src, dst, stats, span, String::new())
    }

    /// [`launch`](Self::launch) with an opaque tag attached to the tunnel's logs.
    pub fn launch_tagged<S: Conn, D: Conn>(
        &self,
        request: Arc<dyn Lifecycle>,
        src: S,
        dst: D,
        stats: TunnelStats,
        span: Span,
        tag: String,
    ) -> Result<TunnelHandle, ProxyError> {
        if self.root.is_done() {
            let cause = self.root.err().unwrap_or(LifecycleError::Canceled);
            debug!("Rejecting tunnel, manager root ended: {}", cause);
            return Err(ProxyError::ShuttingDown(cause));
        }

        let permit = match &self.admission {
            Some(semaphore) => match semaphore.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    let limit = self.config.max_sessions.unwrap_or_default();
                    debug!(limit, "Rejecting tunnel, session limit reached");
                    return Err(ProxyError::AtCapacity { limit });
                }
            },
            None => None,
        };

        let lifecycle = merge(self.root.clone(), request);
        let tunnel =
            Tunnel::new(src, dst, stats, span, self.config.copy_buffer_size).with_tag(tag);
        let id = tunnel.id();

        let run_lifecycle = lifecycle.clone();
        let task = tokio::spawn(async move {
            tunnel.run(run_lifecycle).await;
            drop(permit);
        });

        Ok(TunnelHandle {
            id,
            lifecycle,
            task,
        })
    }
}
