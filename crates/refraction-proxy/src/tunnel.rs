//! Bidirectional forwarding between one pair of connections

use crate::Conn;
use refraction_lifecycle::{Lifecycle, MergedLifecycle};
use refraction_stats::{Direction, TunnelStats};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, Instrument, Span};
use uuid::Uuid;

/// One forwarding session. Owns both connections and closes them when done.
pub struct Tunnel<S, D> {
    id: Uuid,
    src: S,
    dst: D,
    stats: Arc<TunnelStats>,
    span: Span,
    tag: String,
    buffer_size: usize,
}

/// Why a single direction stopped copying
enum PumpEnd {
    Eof,
    Canceled,
    /// The other direction failed and tore the tunnel down
    PeerFailed,
    ReadFailed(io::Error),
    WriteFailed(io::Error),
}

impl PumpEnd {
    fn is_error(&self) -> bool {
        matches!(self, PumpEnd::ReadFailed(_) | PumpEnd::WriteFailed(_))
    }

    /// Ended at EOF rather than by cancel, teardown or I/O error
    fn is_clean(&self) -> bool {
        matches!(self, PumpEnd::Eof)
    }
}

impl fmt::Display for PumpEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpEnd::Eof => f.write_str("eof"),
            PumpEnd::Canceled => f.write_str("canceled"),
            PumpEnd::PeerFailed => f.write_str("peer direction failed"),
            PumpEnd::ReadFailed(e) => write!(f, "read error: {}", e),
            PumpEnd::WriteFailed(e) => write!(f, "write error: {}", e),
        }
    }
}

impl<S: Conn, D: Conn> Tunnel<S, D> {
    pub fn new(src: S, dst: D, stats: TunnelStats, span: Span, buffer_size: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            src,
            dst,
            stats: Arc::new(stats),
            span,
            tag: String::new(),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Shared handle on the stats so callers can watch counters while forwarding.
    pub fn stats(&self) -> Arc<TunnelStats> {
        self.stats.clone()
    }

    /// Forward until both directions finish, then close and log the record.
    pub async fn run(self, lifecycle: Arc<MergedLifecycle>) {
        let span = self.span.clone();
        self.forward(lifecycle).instrument(span).await
    }

    async fn forward(self, lifecycle: Arc<MergedLifecycle>) {
        let Tunnel {
            id,
            src,
            dst,
            stats,
            tag,
            buffer_size,
            ..
        } = self;

        let global = stats.global().clone();
        global.add_session();
        debug!(tunnel_id = %id, tag = %tag, "Tunnel started");

        let started = Instant::now();
        // Fired when either direction fails so the other stops as well
        let teardown = CancellationToken::new();

        let (mut src_read, mut src_write) = tokio::io::split(src);
        let (mut dst_read, mut dst_write) = tokio::io::split(dst);

        let upload = Pump {
            direction: Direction::Upload,
            stats: &stats,
            lifecycle: lifecycle.as_ref(),
            teardown: &teardown,
            started,
            buffer_size,
        };
        let download = Pump {
            direction: Direction::Download,
            ..upload
        };

        let (up, down) = tokio::join!(
            upload.run(&mut src_read, &mut dst_write),
            download.run(&mut dst_read, &mut src_write),
        );

        let mut src = src_read.unsplit(src_write);
        let mut dst = dst_read.unsplit(dst_write);
        if up.is_clean() && down.is_clean() {
            tokio::select! {
                _ = lifecycle.done() => trace!(tunnel_id = %id, "Close interrupted"),
                _ = async {
                    close(&mut src, "src").await;
                    close(&mut dst, "dst").await;
                } => {}
            }
        } else {
            // a buffered writer facing a stalled peer would never finish shutdown
            trace!(tunnel_id = %id, "Dropping connections without shutdown");
        }
        drop(src);
        drop(dst);

        // release the merge watcher now rather than when a parent ends
        lifecycle.cancel();
        global.remove_session();

        debug!(
            tunnel_id = %id,
            bytes_up = stats.bytes_up(),
            bytes_down = stats.bytes_down(),
            "Tunnel closed"
        );
        stats.print();
    }
}

/// Per-direction copy state
#[derive(Clone, Copy)]
struct Pump<'a> {
    direction: Direction,
    stats: &'a TunnelStats,
    lifecycle: &'a MergedLifecycle,
    teardown: &'a CancellationToken,
    started: Instant,
    buffer_size: usize,
}

impl Pump<'_> {
    async fn run<R, W>(self, reader: &mut R, writer: &mut W) -> PumpEnd
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let end = self.copy(reader, writer).await;

        match &end {
            // propagate the half-close so the far end sees EOF too
            PumpEnd::Eof => {
                tokio::select! {
                    _ = self.lifecycle.done() => {}
                    _ = self.teardown.cancelled() => {}
                    result = writer.shutdown() => {
                        if let Err(e) = result {
                            trace!(direction = %self.direction, "Half-close failed: {}", e);
                        }
                    }
                }
            }
            end if end.is_error() => self.teardown.cancel(),
            _ => {}
        }

        debug!(direction = %self.direction, reason = %end, "Direction finished");
        self.stats
            .record_duration(self.started.elapsed(), self.direction);
        self.stats.completed(self.direction);
        end
    }

    async fn copy<R, W>(&self, reader: &mut R, writer: &mut W) -> PumpEnd
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut done = self.lifecycle.done();
        let torn_down = self.teardown.cancelled();
        tokio::pin!(torn_down);

        loop {
            let n = tokio::select! {
                _ = &mut done => return PumpEnd::Canceled,
                _ = &mut torn_down => return PumpEnd::PeerFailed,
                read = reader.read(&mut buffer) => match read {
                    Ok(0) => return PumpEnd::Eof,
                    Ok(n) => n,
                    Err(e) => return PumpEnd::ReadFailed(e),
                },
            };

            let mut chunk = &buffer[..n];
            while !chunk.is_empty() {
                let written = tokio::select! {
                    _ = &mut done => return PumpEnd::Canceled,
                    _ = &mut torn_down => return PumpEnd::PeerFailed,
                    written = writer.write(chunk) => match written {
                        Ok(0) => return PumpEnd::WriteFailed(io::ErrorKind::WriteZero.into()),
                        Ok(w) => w,
                        Err(e) => return PumpEnd::WriteFailed(e),
                    },
                };
                // counted as accepted so a cancel mid-chunk keeps the partial write
                self.stats.add_bytes(written as u64, self.direction);
                chunk = &chunk[written..];
            }

            tokio::select! {
                _ = &mut done => return PumpEnd::Canceled,
                _ = &mut torn_down => return PumpEnd::PeerFailed,
                flushed = writer.flush() => {
                    if let Err(e) = flushed {
                        return PumpEnd::WriteFailed(e);
                    }
                }
            }
        }
    }
}

/// Shut a connection down, ignoring errors from an already-closed peer.
async fn close<T: AsyncWrite + Unpin>(conn: &mut T, side: &'static str) {
    if let Err(e) = conn.shutdown().await {
        trace!(side, "Shutdown on close failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refraction_lifecycle::{merge, Scope};
    use refraction_stats::{GlobalStats, TunnelMetadata};
    use std::time::Duration;
    use tokio::io::BufWriter;
    use tokio::time::timeout;

    fn lifecycle() -> (Arc<Scope>, Arc<MergedLifecycle>) {
        let root = Arc::new(Scope::new());
        let merged = merge(root.clone(), Arc::new(Scope::new()));
        (root, merged)
    }

    #[tokio::test]
    async fn test_forwards_both_directions() {
        let global = Arc::new(GlobalStats::new());
        let (client, src) = tokio::io::duplex(1024);
        let (dst, far) = tokio::io::duplex(1024);

        let tunnel = Tunnel::new(
            src,
            dst,
            TunnelStats::new(global.clone(), TunnelMetadata::default()),
            Span::none(),
            64,
        );
        let stats = tunnel.stats();
        let (_root, merged) = lifecycle();
        let handle = tokio::spawn(tunnel.run(merged));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut far_read, mut far_write) = tokio::io::split(far);

        client_write.write_all(b"hello far side").await.unwrap();
        let mut buf = [0u8; 14];
        far_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello far side");

        far_write.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        client_write.shutdown().await.unwrap();
        far_write.shutdown().await.unwrap();

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("tunnel did not finish")
            .unwrap();

        assert_eq!(stats.bytes_up(), 14);
        assert_eq!(stats.bytes_down(), 2);
        assert!(stats.duration() > Duration::ZERO);
        assert_eq!(global.active_sessions(), 0);
        assert_eq!(global.snapshot().completed_sessions, 1);
    }

    #[tokio::test]
    async fn test_small_buffer_splits_chunks() {
        let global = Arc::new(GlobalStats::new());
        let (mut client, src) = tokio::io::duplex(4096);
        let (dst, mut far) = tokio::io::duplex(4096);

        let tunnel = Tunnel::new(
            src,
            dst,
            TunnelStats::new(global, TunnelMetadata::default()),
            Span::none(),
            3,
        );
        let stats = tunnel.stats();
        let (root, merged) = lifecycle();
        let handle = tokio::spawn(tunnel.run(merged));

        let payload = vec![7u8; 1000];
        client.write_all(&payload).await.unwrap();
        let mut received = vec![0u8; 1000];
        far.read_exact(&mut received).await.unwrap();
        assert_eq!(received, payload);

        root.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(stats.bytes_up(), 1000);
    }

    #[tokio::test]
    async fn test_buffered_writer_is_flushed_per_chunk() {
        let global = Arc::new(GlobalStats::new());
        let (mut client, src) = tokio::io::duplex(1024);
        let (dst, mut far) = tokio::io::duplex(1024);

        let tunnel = Tunnel::new(
            src,
            BufWriter::new(dst),
            TunnelStats::new(global, TunnelMetadata::default()),
            Span::none(),
            64,
        );
        let (root, merged) = lifecycle();
        let handle = tokio::spawn(tunnel.run(merged));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        timeout(Duration::from_secs(1), far.read_exact(&mut buf))
            .await
            .expect("relayed bytes stuck in the writer buffer")
            .unwrap();
        assert_eq!(&buf, b"ping");

        root.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_with_stalled_peer_still_closes() {
        let global = Arc::new(GlobalStats::new());
        let (mut client, src) = tokio::io::duplex(8192);
        // the far end never reads, so the buffered writer can never drain
        let (dst, _far) = tokio::io::duplex(16);

        let tunnel = Tunnel::new(
            src,
            BufWriter::new(dst),
            TunnelStats::new(global.clone(), TunnelMetadata::default()),
            Span::none(),
            4096,
        );
        let (root, merged) = lifecycle();
        let handle = tokio::spawn(tunnel.run(merged));

        client.write_all(&[9u8; 4000]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(global.active_sessions(), 1);

        root.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("teardown blocked on a stalled peer")
            .unwrap();
        assert_eq!(global.active_sessions(), 0);
        assert_eq!(global.snapshot().completed_sessions, 1);
    }

    #[tokio::test]
    async fn test_partial_write_counted_on_cancel() {
        let global = Arc::new(GlobalStats::new());
        let (mut client, src) = tokio::io::duplex(8192);
        let (dst, _far) = tokio::io::duplex(16);

        let tunnel = Tunnel::new(
            src,
            dst,
            TunnelStats::new(global, TunnelMetadata::default()),
            Span::none(),
            4096,
        );
        let stats = tunnel.stats();
        let (root, merged) = lifecycle();
        let handle = tokio::spawn(tunnel.run(merged));

        client.write_all(&[3u8; 100]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        root.cancel();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        // only the 16 bytes the far side buffered were ever accepted
        assert_eq!(stats.bytes_up(), 16);
    }
}
