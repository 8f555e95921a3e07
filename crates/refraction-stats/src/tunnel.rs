//! Per-tunnel statistics record

use crate::{Direction, GlobalStats};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace, warn};

/// Descriptive data about a tunnel, filled in by the stages that set it up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelMetadata {
    pub phantom_addr: String,
    pub phantom_dst_port: u16,
    pub tunnel_count: u32,
    pub v6: bool,
    /// Autonomous system number of the client, 0 if unknown
    pub asn: u32,
    /// Client country code
    pub cc: String,
    pub transport: String,
    pub registrar: String,
    pub lib_ver: u32,
    pub generation: u32,
    pub transport_opts: Vec<String>,
    pub reg_opts: Vec<String>,
    pub tags: Vec<String>,
}

/// Byte counters and metadata for one tunnel.
///
/// Setters take `&mut self` and are meant for the dial and connect stages;
/// once the stats move into a running tunnel only the atomic counters change.
#[derive(Debug)]
pub struct TunnelStats {
    global: Arc<GlobalStats>,

    duration_ns: AtomicU64,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,

    covert_dial_err: String,
    covert_conn_err: String,
    client_conn_err: String,

    metadata: TunnelMetadata,
}

/// Serialized form of [`TunnelStats`], emitted when the tunnel closes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TunnelRecord {
    pub duration: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,

    pub covert_dial_err: String,
    pub covert_conn_err: String,
    pub client_conn_err: String,

    pub phantom_addr: String,
    pub phantom_dst_port: u16,

    pub tunnel_count: u32,
    #[serde(rename = "V6")]
    pub v6: bool,
    #[serde(rename = "ASN", skip_serializing_if = "is_zero")]
    pub asn: u32,
    #[serde(rename = "CC", skip_serializing_if = "String::is_empty")]
    pub cc: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub transport: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub registrar: String,
    pub lib_ver: u32,
    #[serde(rename = "Gen")]
    pub generation: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transport_opts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reg_opts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl TunnelStats {
    pub fn new(global: Arc<GlobalStats>, metadata: TunnelMetadata) -> Self {
        Self {
            global,
            duration_ns: AtomicU64::new(0),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            covert_dial_err: String::new(),
            covert_conn_err: String::new(),
            client_conn_err: String::new(),
            metadata,
        }
    }

    pub fn set_covert_dial_err(&mut self, err: impl Into<String>) {
        self.covert_dial_err = err.into();
    }

    pub fn set_covert_conn_err(&mut self, err: impl Into<String>) {
        self.covert_conn_err = err.into();
    }

    pub fn set_client_conn_err(&mut self, err: impl Into<String>) {
        self.client_conn_err = err.into();
    }

    /// The aggregator this tunnel reports into
    pub fn global(&self) -> &Arc<GlobalStats> {
        &self.global
    }

    pub fn metadata(&self) -> &TunnelMetadata {
        &self.metadata
    }

    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    /// Latched tunnel duration, zero until the first direction finished
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_ns.load(Ordering::Relaxed))
    }

    /// Count `n` freshly transferred bytes, both here and in the in-flight aggregate.
    pub fn add_bytes(&self, n: u64, direction: Direction) {
        match direction {
            Direction::Upload => self.bytes_up.fetch_add(n, Ordering::Relaxed),
            Direction::Download => self.bytes_down.fetch_add(n, Ordering::Relaxed),
        };
        self.global.add_bytes(n, direction);
    }

    /// Fold this direction's final byte count into the completed aggregate.
    pub fn completed(&self, direction: Direction) {
        let total = match direction {
            Direction::Upload => self.bytes_up(),
            Direction::Download => self.bytes_down(),
        };
        self.global.add_completed(total, direction);
    }

    /// Record the tunnel duration. Only the first direction to close sets it,
    /// which gives the lower bound on how long the session lasted.
    pub fn record_duration(&self, elapsed: Duration, direction: Direction) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        if self
            .duration_ns
            .compare_exchange(0, nanos, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            trace!(direction = %direction, duration_ns = nanos, "tunnel duration latched");
        }
    }

    pub fn record(&self) -> TunnelRecord {
        let meta = &self.metadata;
        TunnelRecord {
            duration: self.duration_ns.load(Ordering::Relaxed),
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            covert_dial_err: self.covert_dial_err.clone(),
            covert_conn_err: self.covert_conn_err.clone(),
            client_conn_err: self.client_conn_err.clone(),
            phantom_addr: meta.phantom_addr.clone(),
            phantom_dst_port: meta.phantom_dst_port,
            tunnel_count: meta.tunnel_count,
            v6: meta.v6,
            asn: meta.asn,
            cc: meta.cc.clone(),
            transport: meta.transport.clone(),
            registrar: meta.registrar.clone(),
            lib_ver: meta.lib_ver,
            generation: meta.generation,
            transport_opts: meta.transport_opts.clone(),
            reg_opts: meta.reg_opts.clone(),
            tags: meta.tags.clone(),
        }
    }

    /// Emit the full record as one log line in the current span.
    pub fn print(&self) {
        match serde_json::to_string(&self.record()) {
            Ok(json) => info!("proxy closed {}", json),
            Err(e) => warn!("Failed to serialize tunnel stats: {}", e),
        }
    }
}
