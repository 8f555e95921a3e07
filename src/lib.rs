//! Refraction station tunnel core - public API
//!
//! Re-exports the forwarding, lifecycle and stats crates so an embedding
//! station only depends on this one.
//!
//! # Quick Start
//!
//! ```ignore
//! use refraction::{
//!     spawn_stats_reporter, GlobalStats, ProxyConfig, Scope, TunnelManager, TunnelMetadata,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     refraction::init_tracing("info")?;
//!
//!     let root = Arc::new(Scope::new());
//!     let global = GlobalStats::global();
//!     let config = ProxyConfig::default();
//!     spawn_stats_reporter(global.clone(), config.stats_interval(), root.clone());
//!
//!     let manager = TunnelManager::new(root.clone(), global, config)?;
//!
//!     // For every registered client, once both sides are connected:
//!     // let mut stats = manager.new_stats(TunnelMetadata { .. });
//!     // manager.launch(request, client_conn, covert_conn, stats, span)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Key Components
//!
//! - **TunnelManager**: launches tunnels under a merged root/request lifecycle
//! - **Tunnel**: bidirectional copy between one pair of connections
//! - **merge / MergedLifecycle**: one lifecycle derived from two parents
//! - **TunnelStats**: per-tunnel counters and the close record
//! - **GlobalStats**: process-wide counters, snapshot and reset per epoch

pub use refraction_lifecycle::{merge, Lifecycle, LifecycleError, MergedLifecycle, Scope};
pub use refraction_proxy::{
    spawn_stats_reporter, Conn, ConfigError, ProxyConfig, ProxyError, Tunnel, TunnelHandle,
    TunnelManager,
};
pub use refraction_stats::{
    Direction, GlobalStats, StatsSnapshot, TunnelMetadata, TunnelRecord, TunnelStats,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `log_level` when set.
pub fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
