//! Egress scheduling and in-order dispatch.
//!
//! Worker threads never touch sockets. After parking a completed frame they
//! call [`EgressHandle::schedule`], which posts an [`EgressTask`] onto the I/O
//! loop's run queue. The I/O loop later calls [`dispatch`], which drains the
//! contiguous run of completed frames from the registry into the
//! connection's [`Outbound`] queue, and polls [`Outbound::poll_write`]
//! whenever that connection's socket can take more.
//!
//! Neither step waits on a socket. A peer that stops reading fills only its
//! own outbound queue; every other connection keeps flowing. Frames leave an
//! outbound queue in the order they were drained, and only the I/O loop
//! drains, so per-connection order survives the hand-off.

use std::{
    collections::VecDeque,
    fmt,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures::{Sink, SinkExt};
use log::debug;
use thiserror::Error;
use tokio::{sync::mpsc, time::Instant};
use tokio_tungstenite::tungstenite::Message;

use crate::{
    reassembly::Drained,
    session::{ConnectionId, ConnectionRegistry},
};

/// Request to flush completed frames for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EgressTask {
    /// Connection whose buffer gained a slot.
    pub connection: ConnectionId,
    /// Sequence number that completed.
    pub sequence: u64,
}

/// Cloneable, non-blocking sender used by workers to reach the I/O loop.
#[derive(Clone, Debug)]
pub struct EgressHandle(mpsc::UnboundedSender<EgressTask>);

/// Receiving end of the egress channel, owned by the I/O loop.
#[derive(Debug)]
pub struct EgressQueue(mpsc::UnboundedReceiver<EgressTask>);

/// Create a connected egress handle and queue.
#[must_use]
pub fn channel() -> (EgressHandle, EgressQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EgressHandle(tx), EgressQueue(rx))
}

impl EgressHandle {
    /// Schedule a dispatch for `connection` on the I/O loop.
    ///
    /// Never blocks. Returns `false` if the I/O loop has stopped, in which case
    /// the frame can no longer be delivered.
    pub fn schedule(&self, connection: ConnectionId, sequence: u64) -> bool {
        self.0
            .send(EgressTask {
                connection,
                sequence,
            })
            .is_ok()
    }
}

impl EgressQueue {
    /// Receive the next task, or `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<EgressTask> { self.0.recv().await }

    /// Receive a task without waiting.
    pub fn try_recv(&mut self) -> Option<EgressTask> { self.0.try_recv().ok() }
}

/// Errors raised while dispatching frames to a connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The connection was removed before dispatch ran.
    #[error("connection {0} no longer registered")]
    Gone(ConnectionId),
    /// The peer is not reading and its outbound queue is full.
    #[error("outbound queue for {connection} exceeded {capacity} frames")]
    Overflow {
        connection: ConnectionId,
        capacity: usize,
    },
    /// Writing to the socket failed.
    #[error("write to {connection} failed: {reason}")]
    Write {
        connection: ConnectionId,
        reason: String,
    },
    /// The socket accepted nothing for longer than the write timeout.
    #[error("write to {connection} stalled for {after:?}")]
    Timeout {
        connection: ConnectionId,
        after: Duration,
    },
}

/// Result of one [`dispatch`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dispatched {
    /// Frames moved into the outbound queue.
    pub queued: usize,
    /// Lost slots stepped over.
    pub skipped: u64,
    /// `last_sent` after the drain.
    pub last_sent: u64,
}

/// Frames drained for one connection that its socket has not yet taken.
#[derive(Debug)]
pub struct Outbound {
    frames: VecDeque<(u64, Bytes)>,
    capacity: usize,
    unflushed: bool,
    progress_at: Instant,
}

impl Outbound {
    /// Create an empty queue holding at most `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity,
            unflushed: false,
            progress_at: Instant::now(),
        }
    }

    /// Frames waiting for the socket.
    #[must_use]
    pub fn len(&self) -> usize { self.frames.len() }

    /// Whether no frames are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    /// Whether every frame has been written and flushed.
    #[must_use]
    pub fn is_idle(&self) -> bool { self.frames.is_empty() && !self.unflushed }

    /// How long the socket has made no progress while output is pending.
    #[must_use]
    pub fn stalled_for(&self, now: Instant) -> Option<Duration> {
        (!self.is_idle()).then(|| now.saturating_duration_since(self.progress_at))
    }

    fn extend(
        &mut self,
        connection: ConnectionId,
        frames: Vec<(u64, Bytes)>,
    ) -> Result<(), DispatchError> {
        if self.frames.len() + frames.len() > self.capacity {
            return Err(DispatchError::Overflow {
                connection,
                capacity: self.capacity,
            });
        }
        if self.is_idle() {
            self.progress_at = Instant::now();
        }
        self.frames.extend(frames);
        Ok(())
    }

    /// Hand waiting frames to `sink` for as long as it is ready, then flush.
    ///
    /// Returns `Ready(Ok(n))` once the socket took `n` frames or finished a
    /// flush, and `Pending` when it could take nothing; the waker is then
    /// registered with `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Write`] if the sink fails.
    pub fn poll_write<S>(
        &mut self,
        connection: ConnectionId,
        sink: &mut S,
        cx: &mut Context<'_>,
    ) -> Poll<Result<usize, DispatchError>>
    where
        S: Sink<Message> + Unpin,
        S::Error: fmt::Display,
    {
        let failed = |e: S::Error| DispatchError::Write {
            connection,
            reason: e.to_string(),
        };
        let mut written = 0;
        while !self.frames.is_empty() {
            match sink.poll_ready_unpin(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(failed(e))),
                Poll::Pending => break,
            }
            let Some((sequence, frame)) = self.frames.pop_front() else {
                break;
            };
            if let Err(e) = sink.start_send_unpin(Message::Binary(frame.to_vec())) {
                return Poll::Ready(Err(failed(e)));
            }
            debug!("frame queued for send: connection={connection}, sequence={sequence}");
            written += 1;
            self.unflushed = true;
        }

        let mut flushed = false;
        if self.unflushed {
            match sink.poll_flush_unpin(cx) {
                Poll::Ready(Ok(())) => {
                    self.unflushed = false;
                    flushed = true;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(failed(e))),
                Poll::Pending => {}
            }
        }
        if written == 0 && !flushed {
            return Poll::Pending;
        }
        self.progress_at = Instant::now();
        Poll::Ready(Ok(written))
    }
}

/// Drain `connection`'s ready frames into `outbound`.
///
/// The drain happens under the registry lock; nothing here touches the
/// socket.
///
/// # Errors
///
/// Returns [`DispatchError::Gone`] if the connection is no longer registered
/// and [`DispatchError::Overflow`] if the run does not fit in `outbound`. An
/// overflowing run is discarded along with the connection.
pub fn dispatch(
    registry: &ConnectionRegistry,
    connection: ConnectionId,
    outbound: &mut Outbound,
) -> Result<Dispatched, DispatchError> {
    let Drained { frames, lost } = registry
        .drain_ready(connection)
        .ok_or(DispatchError::Gone(connection))?;
    let queued = frames.len();
    outbound.extend(connection, frames)?;
    Ok(Dispatched {
        queued,
        skipped: lost,
        last_sent: registry
            .sequence_state(connection)
            .map_or(0, |state| state.last_sent),
    })
}
