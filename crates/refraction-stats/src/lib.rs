//! Traffic statistics for proxied tunnels
//!
//! Two layers:
//! - [`TunnelStats`]: one per tunnel, byte counters plus descriptive metadata,
//!   serialized once when the tunnel closes.
//! - [`GlobalStats`]: shared by every tunnel in the process, lock-free counters
//!   that an external scheduler snapshots and resets once per epoch.

mod global;
mod tunnel;

pub use global::{GlobalStats, StatsSnapshot};
pub use tunnel::{TunnelMetadata, TunnelRecord, TunnelStats};

use serde::Serialize;
use std::fmt;

/// Direction of a byte transfer. `src -> dst` is upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client side to far side
    Upload,
    /// Far side to client side
    Download,
}

impl Direction {
    pub fn is_upload(self) -> bool {
        matches!(self, Direction::Upload)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}
