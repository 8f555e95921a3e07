//! Tunnel forwarding for the refraction station
//!
//! [`TunnelManager::launch`] takes two established connections and relays bytes
//! between them until either side closes, an I/O error occurs, or the merged
//! manager/request lifecycle ends. In terms of direction, `src -> dst` is
//! upload and `dst -> src` is download.

mod config;
mod error;
mod manager;
mod reporter;
mod tunnel;

pub use config::ProxyConfig;
pub use error::{ConfigError, ProxyError};
pub use manager::{TunnelHandle, TunnelManager};
pub use reporter::spawn_stats_reporter;
pub use tunnel::Tunnel;

use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte stream the tunnel can own
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Conn for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
