//! Process-wide traffic aggregate
//!
//! Every field is an independent atomic. Tunnels update them without any shared
//! lock, and a reset stores zero field by field, so a reader racing a reset may
//! see some counters from before it and some from after.

use crate::Direction;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::info;

static GLOBAL_STATS: OnceLock<Arc<GlobalStats>> = OnceLock::new();

/// Aggregated byte transfer metrics across all tunnels
#[derive(Debug)]
pub struct GlobalStats {
    /// Epoch start, unix milliseconds
    epoch_start_ms: AtomicI64,

    /// Open tunnels (gauge, never reset)
    sessions_proxying: AtomicI64,

    /// Bytes transferred during the epoch, counted as they flow
    new_bytes_up: AtomicU64,
    new_bytes_down: AtomicU64,

    /// Bytes carried by tunnels that closed during the epoch
    complete_bytes_up: AtomicU64,
    complete_bytes_down: AtomicU64,

    /// Closed tunnels that moved no bytes in that direction
    zero_byte_tunnels_up: AtomicU64,
    zero_byte_tunnels_down: AtomicU64,

    completed_sessions: AtomicU64,
}

/// Point-in-time view of [`GlobalStats`] for one epoch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub epoch_start: DateTime<Utc>,
    pub epoch_ms: i64,
    pub active_sessions: i64,
    pub new_bytes_up: u64,
    pub up_bytes_per_sec: f64,
    pub new_bytes_down: u64,
    pub down_bytes_per_sec: f64,
    pub completed_sessions: u64,
    pub zero_byte_tunnels_up: u64,
    pub zero_byte_tunnels_down: u64,
    pub complete_bytes_up: u64,
    pub complete_bytes_down: u64,
    pub avg_complete_bytes_up: f64,
    pub avg_complete_bytes_down: f64,
}

impl GlobalStats {
    pub fn new() -> Self {
        Self {
            epoch_start_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            sessions_proxying: AtomicI64::new(0),
            new_bytes_up: AtomicU64::new(0),
            new_bytes_down: AtomicU64::new(0),
            complete_bytes_up: AtomicU64::new(0),
            complete_bytes_down: AtomicU64::new(0),
            zero_byte_tunnels_up: AtomicU64::new(0),
            zero_byte_tunnels_down: AtomicU64::new(0),
            completed_sessions: AtomicU64::new(0),
        }
    }

    /// The shared process-wide instance, created on first use.
    pub fn global() -> Arc<GlobalStats> {
        GLOBAL_STATS
            .get_or_init(|| Arc::new(GlobalStats::new()))
            .clone()
    }

    pub fn add_session(&self) {
        self.sessions_proxying.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove_session(&self) {
        self.sessions_proxying.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> i64 {
        self.sessions_proxying.load(Ordering::Relaxed)
    }

    pub(crate) fn add_bytes(&self, nb: u64, direction: Direction) {
        match direction {
            Direction::Upload => self.new_bytes_up.fetch_add(nb, Ordering::Relaxed),
            Direction::Download => self.new_bytes_down.fetch_add(nb, Ordering::Relaxed),
        };
    }

    pub(crate) fn add_completed(&self, nb: u64, direction: Direction) {
        match direction {
            Direction::Upload => {
                self.complete_bytes_up.fetch_add(nb, Ordering::Relaxed);
                if nb == 0 {
                    self.zero_byte_tunnels_up.fetch_add(1, Ordering::Relaxed);
                }

                // Only the upload side closes a session so a tunnel counts once
                self.completed_sessions.fetch_add(1, Ordering::Relaxed);
            }
            Direction::Download => {
                self.complete_bytes_down.fetch_add(nb, Ordering::Relaxed);
                if nb == 0 {
                    self.zero_byte_tunnels_down.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Read the current epoch without resetting it.
    pub fn snapshot(&self) -> StatsSnapshot {
        let epoch_start_ms = self.epoch_start_ms.load(Ordering::Relaxed);
        let elapsed_ms = Utc::now().timestamp_millis() - epoch_start_ms;
        self.snapshot_with_elapsed(epoch_start_ms, elapsed_ms)
    }

    fn snapshot_with_elapsed(&self, epoch_start_ms: i64, elapsed_ms: i64) -> StatsSnapshot {
        // prevent div by 0 on very short epochs or a starved scheduler
        let epoch_ms = elapsed_ms.max(1);

        let new_bytes_up = self.new_bytes_up.load(Ordering::Relaxed);
        let new_bytes_down = self.new_bytes_down.load(Ordering::Relaxed);
        let completed_sessions = self.completed_sessions.load(Ordering::Relaxed);
        let zero_byte_tunnels_up = self.zero_byte_tunnels_up.load(Ordering::Relaxed);
        let zero_byte_tunnels_down = self.zero_byte_tunnels_down.load(Ordering::Relaxed);
        let complete_bytes_up = self.complete_bytes_up.load(Ordering::Relaxed);
        let complete_bytes_down = self.complete_bytes_down.load(Ordering::Relaxed);

        StatsSnapshot {
            epoch_start: Utc
                .timestamp_millis_opt(epoch_start_ms)
                .single()
                .unwrap_or_else(Utc::now),
            epoch_ms,
            active_sessions: self.active_sessions(),
            new_bytes_up,
            up_bytes_per_sec: new_bytes_up as f64 / epoch_ms as f64 * 1000.0,
            new_bytes_down,
            down_bytes_per_sec: new_bytes_down as f64 / epoch_ms as f64 * 1000.0,
            completed_sessions,
            zero_byte_tunnels_up,
            zero_byte_tunnels_down,
            complete_bytes_up,
            complete_bytes_down,
            avg_complete_bytes_up: average(
                complete_bytes_up,
                completed_sessions,
                zero_byte_tunnels_up,
            ),
            avg_complete_bytes_down: average(
                complete_bytes_down,
                completed_sessions,
                zero_byte_tunnels_down,
            ),
        }
    }

    /// Log the current epoch as one line, then start a new epoch.
    pub fn print_and_reset(&self) -> StatsSnapshot {
        let snapshot = self.snapshot();
        info!("{}", snapshot);
        self.reset();
        snapshot
    }

    /// Zero every cumulative counter and restart the epoch clock.
    ///
    /// The session gauge tracks current concurrency and is left alone.
    pub fn reset(&self) {
        self.new_bytes_up.store(0, Ordering::Relaxed);
        self.new_bytes_down.store(0, Ordering::Relaxed);
        self.complete_bytes_up.store(0, Ordering::Relaxed);
        self.complete_bytes_down.store(0, Ordering::Relaxed);
        self.zero_byte_tunnels_up.store(0, Ordering::Relaxed);
        self.zero_byte_tunnels_down.store(0, Ordering::Relaxed);
        self.completed_sessions.store(0, Ordering::Relaxed);
        self.epoch_start_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean over tunnels that carried data; zero-byte tunnels are left out.
fn average(bytes: u64, completed: u64, zero_byte: u64) -> f64 {
    let denominator = completed.saturating_sub(zero_byte).max(1);
    bytes as f64 / denominator as f64
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proxy-stats:{} {} {:.6} {} {:.6} {} {} {} {:.6} {:.6}",
            self.active_sessions,
            self.new_bytes_up,
            self.up_bytes_per_sec,
            self.new_bytes_down,
            self.down_bytes_per_sec,
            self.completed_sessions,
            self.zero_byte_tunnels_up,
            self.zero_byte_tunnels_down,
            self.avg_complete_bytes_up,
            self.avg_complete_bytes_down,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_gauge_is_pure_counter() {
        let stats = GlobalStats::new();
        for _ in 0..10 {
            stats.add_session();
        }
        for _ in 0..10 {
            stats.remove_session();
        }
        assert_eq!(stats.active_sessions(), 0);
    }

    #[test]
    fn test_completed_upload_counts_session() {
        let stats = GlobalStats::new();
        stats.add_completed(10, Direction::Upload);
        stats.add_completed(10, Direction::Download);
        stats.add_completed(0, Direction::Download);

        let snap = stats.snapshot();
        assert_eq!(snap.completed_sessions, 1);
        assert_eq!(snap.complete_bytes_up, 10);
        assert_eq!(snap.complete_bytes_down, 10);
        assert_eq!(snap.zero_byte_tunnels_up, 0);
        assert_eq!(snap.zero_byte_tunnels_down, 1);
    }

    #[test]
    fn test_zero_byte_completion() {
        let stats = GlobalStats::new();
        stats.add_completed(0, Direction::Upload);

        let snap = stats.snapshot();
        assert_eq!(snap.zero_byte_tunnels_up, 1);
        assert_eq!(snap.complete_bytes_up, 0);
        assert_eq!(snap.completed_sessions, 1);
    }

    #[test]
    fn test_rates_use_epoch_milliseconds() {
        let stats = GlobalStats::new();
        stats.add_bytes(5000, Direction::Upload);
        stats.add_bytes(250, Direction::Download);

        let snap = stats.snapshot_with_elapsed(0, 2000);
        assert_eq!(snap.epoch_ms, 2000);
        assert_eq!(snap.up_bytes_per_sec, 2500.0);
        assert_eq!(snap.down_bytes_per_sec, 125.0);
    }

    #[test]
    fn test_zero_length_epoch_floors_to_one_ms() {
        let stats = GlobalStats::new();
        stats.add_bytes(3, Direction::Upload);

        let snap = stats.snapshot_with_elapsed(0, 0);
        assert_eq!(snap.epoch_ms, 1);
        assert_eq!(snap.up_bytes_per_sec, 3000.0);

        let snap = stats.snapshot_with_elapsed(0, -50);
        assert_eq!(snap.epoch_ms, 1);
    }

    #[test]
    fn test_average_excludes_zero_byte_tunnels() {
        assert_eq!(average(300, 3, 1), 150.0);
        assert_eq!(average(0, 0, 0), 0.0);
        // torn read: more zero-byte tunnels than sessions
        assert_eq!(average(40, 1, 2), 40.0);
    }

    #[test]
    fn test_snapshot_line_format() {
        let stats = GlobalStats::new();
        stats.add_session();
        stats.add_bytes(1000, Direction::Upload);
        stats.add_completed(1000, Direction::Upload);
        stats.add_completed(0, Direction::Download);

        let line = stats.snapshot_with_elapsed(0, 1000).to_string();
        assert_eq!(
            line,
            "proxy-stats:1 1000 1000.000000 0 0.000000 1 0 1 1000.000000 0.000000"
        );
    }

    #[test]
    fn test_reset_preserves_gauge() {
        let stats = GlobalStats::new();
        stats.add_session();
        stats.add_session();
        stats.add_bytes(42, Direction::Upload);

        stats.print_and_reset();

        assert_eq!(stats.active_sessions(), 2);
        assert_eq!(stats.snapshot().new_bytes_up, 0);
    }

    #[test]
    fn test_global_is_shared() {
        let a = GlobalStats::global();
        let b = GlobalStats::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
