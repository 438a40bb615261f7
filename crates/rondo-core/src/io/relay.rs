//! Bidirectional forwarding loop for routed sessions.
//!
//! Once a session is active the router (or a relay proxy using this crate)
//! shuttles opaque payload between the client leg and the host leg. Each
//! direction is driven as an independent poll-based state machine within a
//! single future, so a saturated write on one direction stops only that
//! direction's reads: backpressure is inherent and a slow peer cannot cause
//! unbounded buffering.
//!
//! The loop observes a cancellation token between I/O waits, so closing one
//! leg (or terminating the session from the management surface) stops the
//! paired leg within one I/O cycle. EOF on either leg ends the whole
//! session; there is no half-open state.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;

/// Trait for recording forwarded byte counts.
///
/// The router records to Prometheus; tests use counters or `NoOpMetrics`.
pub trait ForwardMetrics {
    /// Record bytes moved from the client leg to the host leg.
    fn record_client_to_host(&self, bytes: u64);
    /// Record bytes moved from the host leg to the client leg.
    fn record_host_to_client(&self, bytes: u64);
}

/// No-op metrics implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl ForwardMetrics for NoOpMetrics {
    #[inline]
    fn record_client_to_host(&self, _bytes: u64) {}
    #[inline]
    fn record_host_to_client(&self, _bytes: u64) {}
}

/// Why the forwarding loop ended.
///
/// An `Err` from [`forward_bidirectional`] means one leg failed; everything
/// here is a clean outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// One leg reached EOF; both write sides were shut down.
    Finished,
    /// Neither direction moved data within the idle timeout.
    IdleTimeout,
    /// The session was cancelled (leg disconnect or forced termination).
    Cancelled,
}

/// State machine for one-directional copy with flush.
enum CopyState {
    Reading,
    Writing(usize, usize), // (pos, len)
    Flushing(usize),       // bytes flushing
    ShuttingDown,
    Done,
}

/// Result of polling one copy direction.
enum CopyPoll {
    /// Data was flushed; contains the byte count for metrics.
    Flushed(usize),
    /// Direction finished (EOF + shutdown).
    Finished,
}

/// Poll-driven one-directional copy: read, write, flush.
fn poll_copy_direction<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
) -> Poll<io::Result<CopyPoll>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match state {
            CopyState::Reading => {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            *state = CopyState::ShuttingDown;
                        } else {
                            *state = CopyState::Writing(0, n);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Writing(pos, len) => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*pos..*len]) {
                    Poll::Ready(Ok(n)) => {
                        *pos += n;
                        if *pos >= *len {
                            let total = *len;
                            *state = CopyState::Flushing(total);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Flushing(bytes) => {
                let bytes = *bytes;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *state = CopyState::Reading;
                        return Poll::Ready(Ok(CopyPoll::Flushed(bytes)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::ShuttingDown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                Poll::Ready(_) => {
                    *state = CopyState::Done;
                    return Poll::Ready(Ok(CopyPoll::Finished));
                }
                Poll::Pending => return Poll::Pending,
            },
            CopyState::Done => return Poll::Ready(Ok(CopyPoll::Finished)),
        }
    }
}

/// Forward payload between the two legs of a session until EOF, error,
/// idle timeout, or cancellation.
///
/// A read/write failure on either leg aborts the whole loop: the two legs
/// are inseparable, so partial forwarding is never attempted. The caller
/// tears down the session and frees the relay slot on any return.
///
/// # Arguments
///
/// * `client_leg` - stream attached to the client side
/// * `host_leg` - stream attached to the host side
/// * `idle_timeout` - maximum time without data in either direction
/// * `buffer_size` - per-direction read buffer size
/// * `cancel` - observed between I/O waits; fires [`ForwardOutcome::Cancelled`]
/// * `metrics` - byte counters per direction
pub async fn forward_bidirectional<A, B, M>(
    client_leg: A,
    host_leg: B,
    idle_timeout: Duration,
    buffer_size: usize,
    cancel: &CancellationToken,
    metrics: &M,
) -> io::Result<ForwardOutcome>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    M: ForwardMetrics,
{
    let (mut client_r, mut client_w) = tokio::io::split(client_leg);
    let (mut host_r, mut host_w) = tokio::io::split(host_leg);

    let mut buf_c2h = vec![0u8; buffer_size];
    let mut buf_h2c = vec![0u8; buffer_size];
    let mut state_c2h = CopyState::Reading;
    let mut state_h2c = CopyState::Reading;

    let idle_sleep = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle_sleep);

    let mut c2h_done = false;
    let mut h2c_done = false;

    loop {
        // A finished direction already shut down its own writer; tear the
        // other direction down too instead of waiting on the idle timer.
        if c2h_done || h2c_done {
            let _ = client_w.shutdown().await;
            let _ = host_w.shutdown().await;
            return Ok(ForwardOutcome::Finished);
        }

        // Poll both directions within one future. Each direction registers
        // its own waker, so one blocked write cannot stall the other.
        let both = std::future::poll_fn(|cx| {
            let mut any_ready = false;
            let mut activity = false;
            let mut error: Option<io::Error> = None;

            if !c2h_done {
                match poll_copy_direction(cx, &mut client_r, &mut host_w, &mut buf_c2h, &mut state_c2h)
                {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        metrics.record_client_to_host(n as u64);
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        c2h_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        error = Some(e);
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if !h2c_done {
                match poll_copy_direction(cx, &mut host_r, &mut client_w, &mut buf_h2c, &mut state_h2c)
                {
                    Poll::Ready(Ok(CopyPoll::Flushed(n))) => {
                        metrics.record_host_to_client(n as u64);
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(CopyPoll::Finished)) => {
                        h2c_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        error = Some(e);
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if let Some(e) = error {
                return Poll::Ready(Err(e));
            }

            if any_ready {
                Poll::Ready(Ok(activity))
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            result = both => {
                let activity = result?;
                if activity {
                    idle_sleep.as_mut().reset(TokioInstant::now() + idle_timeout);
                }
            }
            _ = cancel.cancelled() => {
                return Ok(ForwardOutcome::Cancelled);
            }
            _ = &mut idle_sleep => {
                return Ok(ForwardOutcome::IdleTimeout);
            }
        }
    }
}
