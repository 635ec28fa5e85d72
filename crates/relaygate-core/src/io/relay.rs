//! Bidirectional tunnel byte pump with transfer accounting.
//!
//! Both directions are pumped concurrently; the first direction to finish
//! (EOF or I/O error) ends the whole tunnel and the other direction is
//! abandoned. There is no half-close draining: once one side is done both
//! sockets are dropped by the caller.
//!
//! The pump never swallows its outcome — it always returns a [`PumpEnd`]
//! carrying the byte totals for each direction and the cause of
//! termination, so callers can account and log deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Trait for recording transferred bytes, invoked once per chunk.
///
/// Implementors are called from both pump directions concurrently and must
/// be thread-safe. The server implementation accumulates into the session
/// tracker; tests use counters.
pub trait TransferCounter: Sync {
    /// Record bytes moving client → upstream.
    fn count_up(&self, bytes: u64);
    /// Record bytes moving upstream → client.
    fn count_down(&self, bytes: u64);
}

/// No-op counter for callers that do not account traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCount;

impl TransferCounter for NoCount {
    #[inline]
    fn count_up(&self, _bytes: u64) {}
    #[inline]
    fn count_down(&self, _bytes: u64) {}
}

/// Why the tunnel ended.
#[derive(Debug)]
pub enum PumpCause {
    /// One side reached EOF.
    Eof,
    /// One side failed with an I/O error.
    Error(std::io::Error),
    /// Neither direction moved data within the idle timeout.
    Idle,
}

/// Final outcome of a tunnel, with exact per-direction byte totals.
#[derive(Debug)]
pub struct PumpEnd {
    pub up: u64,
    pub down: u64,
    pub cause: PumpCause,
}

impl PumpEnd {
    /// Whether the tunnel ended cleanly (EOF or idle, not an I/O error).
    pub fn is_clean(&self) -> bool {
        !matches!(self.cause, PumpCause::Error(_))
    }
}

/// One-directional copy loop: read a chunk, write it through, flush,
/// invoke the chunk callback. Returns on EOF or error.
async fn copy_direction<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    mut on_chunk: F,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64),
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        on_chunk(n as u64);
    }
}

/// Pump bytes in both directions until the first direction finishes.
///
/// * `client` — the inbound connection
/// * `upstream` — the dialed destination or relay node
/// * `idle_timeout` — `None` disables the idle check; with `Some(t)` the
///   tunnel ends with [`PumpCause::Idle`] when neither direction has moved
///   data for `t`
/// * `buffer_size` — per-direction read buffer
/// * `counter` — per-chunk transfer accounting
pub async fn pump_until_first_close<A, B, C>(
    client: A,
    upstream: B,
    idle_timeout: Option<Duration>,
    buffer_size: usize,
    counter: &C,
) -> PumpEnd
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    C: TransferCounter,
{
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut upstream_r, mut upstream_w) = tokio::io::split(upstream);

    let up_total = AtomicU64::new(0);
    let down_total = AtomicU64::new(0);
    // Millis since pump start of the last transferred chunk, for the idle check.
    let start = Instant::now();
    let last_activity = AtomicU64::new(0);

    let up = copy_direction(&mut client_r, &mut upstream_w, buffer_size, |n| {
        up_total.fetch_add(n, Ordering::Relaxed);
        counter.count_up(n);
        last_activity.store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
    });
    let down = copy_direction(&mut upstream_r, &mut client_w, buffer_size, |n| {
        down_total.fetch_add(n, Ordering::Relaxed);
        counter.count_down(n);
        last_activity.store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
    });

    let idle = async {
        match idle_timeout {
            Some(timeout) => loop {
                tokio::time::sleep(timeout / 2).await;
                let last_ms = last_activity.load(Ordering::Relaxed);
                let idle_for = start.elapsed().saturating_sub(Duration::from_millis(last_ms));
                if idle_for >= timeout {
                    return;
                }
            },
            None => std::future::pending().await,
        }
    };

    tokio::pin!(up, down, idle);

    let cause = tokio::select! {
        res = &mut up => match res {
            Ok(()) => PumpCause::Eof,
            Err(err) => PumpCause::Error(err),
        },
        res = &mut down => match res {
            Ok(()) => PumpCause::Eof,
            Err(err) => PumpCause::Error(err),
        },
        _ = &mut idle => PumpCause::Idle,
    };

    PumpEnd {
        up: up_total.load(Ordering::Relaxed),
        down: down_total.load(Ordering::Relaxed),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct TestCounter {
        up: AtomicU64,
        down: AtomicU64,
    }

    impl TransferCounter for TestCounter {
        fn count_up(&self, bytes: u64) {
            self.up.fetch_add(bytes, Ordering::Relaxed);
        }
        fn count_down(&self, bytes: u64) {
            self.down.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn pump_counts_both_directions() {
        let (client, proxy_side) = duplex(1024);
        let (upstream_side, upstream) = duplex(1024);

        let counter = TestCounter::default();
        let pump = tokio::spawn(async move {
            pump_until_first_close(proxy_side, upstream_side, None, 1024, &counter).await
        });

        let (mut client_r, mut client_w) = tokio::io::split(client);
        let (mut upstream_r, mut upstream_w) = tokio::io::split(upstream);

        client_w.write_all(b"hello up").await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = upstream_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello up");

        upstream_w.write_all(b"down").await.unwrap();
        let n = client_r.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"down");

        // Client closes; its pump direction hits EOF and the tunnel ends.
        drop(client_w);
        drop(client_r);

        let end = pump.await.unwrap();
        assert_eq!(end.up, 8);
        assert_eq!(end.down, 4);
        assert!(matches!(end.cause, PumpCause::Eof));
        assert!(end.is_clean());
    }

    #[tokio::test]
    async fn pump_reports_exact_totals_to_counter() {
        let (client, proxy_side) = duplex(64);
        let (upstream_side, upstream) = duplex(64);

        let counter = std::sync::Arc::new(TestCounter::default());
        let pump_counter = counter.clone();
        let pump = tokio::spawn(async move {
            pump_until_first_close(proxy_side, upstream_side, None, 16, &*pump_counter).await
        });

        let (_client_r, mut client_w) = tokio::io::split(client);
        let (mut upstream_r, upstream_w) = tokio::io::split(upstream);

        // More than one buffer's worth, to exercise chunked callbacks.
        let payload = vec![0xAB; 100];
        client_w.write_all(&payload).await.unwrap();
        client_w.shutdown().await.unwrap();

        let mut received = Vec::new();
        upstream_r.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), 100);
        drop(upstream_w);

        let end = pump.await.unwrap();
        assert_eq!(end.up, 100);
        assert_eq!(counter.up.load(Ordering::Relaxed), 100);
        assert_eq!(counter.down.load(Ordering::Relaxed), end.down);
    }

    #[tokio::test(start_paused = true)]
    async fn pump_idle_timeout_fires() {
        let (_client, proxy_side) = duplex(64);
        let (upstream_side, _upstream) = duplex(64);

        let end = pump_until_first_close(
            proxy_side,
            upstream_side,
            Some(Duration::from_millis(100)),
            64,
            &NoCount,
        )
        .await;

        assert!(matches!(end.cause, PumpCause::Idle));
        assert_eq!(end.up, 0);
        assert_eq!(end.down, 0);
    }
}
