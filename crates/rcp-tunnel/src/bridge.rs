//! Duplex bridge between two established connections.
//!
//! One copy task per direction. The bridge returns as soon as either
//! direction finishes or the cancellation token fires; closing one side
//! is what unblocks the other direction, so it never waits for both.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{ErrorClass, classify_io_error};

/// One named side of a session.
pub struct Leg<S> {
    pub name: &'static str,
    pub stream: S,
}

impl<S> Leg<S> {
    pub const fn new(name: &'static str, stream: S) -> Self {
        Self { name, stream }
    }
}

/// A copy direction, `from` → `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Direction {
    pub from: &'static str,
    pub to: &'static str,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// Why a relay returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// This direction finished first (end of stream or an I/O error).
    Closed(Direction),
    Cancelled,
}

/// Relay bytes between `a` and `b` until one direction ends or `cancel`
/// fires.
///
/// Both streams are moved into the copy tasks. When this returns, both
/// tasks have been aborted and joined, so both connections are dropped
/// (closed) and nothing outlives the call.
pub async fn relay<A, B>(cancel: &CancellationToken, a: Leg<A>, b: Leg<B>) -> SessionEnd
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a.stream);
    let (b_read, b_write) = tokio::io::split(b.stream);

    // Room for both reports, so a task never blocks after we return.
    let (done_tx, mut done_rx) = mpsc::channel::<Direction>(2);

    let forward = Direction {
        from: a.name,
        to: b.name,
    };
    let backward = Direction {
        from: b.name,
        to: a.name,
    };
    let forward_task = tokio::spawn(copy_direction(forward, a_read, b_write, done_tx.clone()));
    let backward_task = tokio::spawn(copy_direction(backward, b_read, a_write, done_tx));

    let end = tokio::select! {
        finished = done_rx.recv() => {
            // `None` only if both tasks died without reporting.
            let direction = finished.unwrap_or(forward);
            info!(%direction, "Connection closed");
            SessionEnd::Closed(direction)
        }
        () = cancel.cancelled() => {
            info!("Relay cancelled");
            SessionEnd::Cancelled
        }
    };

    forward_task.abort();
    backward_task.abort();
    let _ = forward_task.await;
    let _ = backward_task.await;

    end
}

async fn copy_direction<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    done: mpsc::Sender<Direction>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(bytes) => {
            debug!(%direction, bytes, "End of stream");
            // Pass the half-close on; the peer may already be gone.
            let _ = writer.shutdown().await;
        }
        Err(e) => match classify_io_error(&e) {
            ErrorClass::Closed | ErrorClass::Refused => {
                debug!(%direction, error = %e, "Connection closed while copying");
            }
            ErrorClass::Other => {
                error!(%direction, error = %e, "Error copying");
            }
        },
    }
    let _ = done.try_send(direction);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    #[tokio::test]
    async fn relays_both_directions() {
        let (a_outer, a_inner) = duplex(1024);
        let (b_outer, b_inner) = duplex(1024);
        let cancel = CancellationToken::new();

        let bridge = tokio::spawn({
            let cancel = cancel.clone();
            async move { relay(&cancel, Leg::new("a", a_inner), Leg::new("b", b_inner)).await }
        });

        let (mut a_rd, mut a_wr) = tokio::io::split(a_outer);
        let (mut b_rd, mut b_wr) = tokio::io::split(b_outer);

        a_wr.write_all(b"hello from a").await.unwrap();
        let mut buf = [0u8; 12];
        b_rd.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello from a");

        b_wr.write_all(b"hello from b").await.unwrap();
        a_rd.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello from b");

        // Closing a ends the a->b direction, which ends the relay.
        drop(a_wr);
        drop(a_rd);
        let end = tokio::time::timeout(Duration::from_secs(5), bridge)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            end,
            SessionEnd::Closed(Direction { from: "a", to: "b" })
        );
    }

    #[tokio::test]
    async fn preserves_byte_order_for_large_payloads() {
        let (a_outer, a_inner) = duplex(64);
        let (b_outer, b_inner) = duplex(64);
        let cancel = CancellationToken::new();

        let bridge = tokio::spawn({
            let cancel = cancel.clone();
            async move { relay(&cancel, Leg::new("a", a_inner), Leg::new("b", b_inner)).await }
        });

        let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let (_a_rd, mut a_wr) = tokio::io::split(a_outer);
        let writer = tokio::spawn(async move {
            a_wr.write_all(&payload).await.unwrap();
            a_wr
        });

        let (mut b_rd, _b_wr) = tokio::io::split(b_outer);
        let mut received = vec![0u8; expected.len()];
        b_rd.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        let _a_wr = writer.await.unwrap();
        cancel.cancel();
        assert_eq!(bridge.await.unwrap(), SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn cancellation_returns_promptly() {
        let (_a_outer, a_inner) = duplex(64);
        let (_b_outer, b_inner) = duplex(64);
        let cancel = CancellationToken::new();

        let bridge = tokio::spawn({
            let cancel = cancel.clone();
            async move { relay(&cancel, Leg::new("a", a_inner), Leg::new("b", b_inner)).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), bridge)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::Cancelled);
    }

    #[tokio::test]
    async fn connections_are_closed_on_return() {
        let (a_outer, a_inner) = duplex(64);
        let (b_outer, b_inner) = duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let end = relay(&cancel, Leg::new("a", a_inner), Leg::new("b", b_inner)).await;
        assert_eq!(end, SessionEnd::Cancelled);

        // Both inner halves were dropped, so the outer ends see EOF.
        let (mut a_rd, _) = tokio::io::split(a_outer);
        let (mut b_rd, _) = tokio::io::split(b_outer);
        let mut buf = Vec::new();
        assert_eq!(a_rd.read_to_end(&mut buf).await.unwrap(), 0);
        assert_eq!(b_rd.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[test]
    fn direction_display() {
        let d = Direction {
            from: "rendezvous",
            to: "local",
        };
        assert_eq!(d.to_string(), "rendezvous->local");
    }
}
