//! The single task that owns every socket.
//!
//! The I/O loop multiplexes five event sources: shutdown, egress tasks posted
//! by workers, freshly upgraded connections, sockets ready to take queued
//! output, and inbound messages from every open connection. Socket halves
//! live in its connection table and are touched nowhere else. Nothing it does
//! inline waits on a socket: output is drained into a bounded per-connection
//! queue and written only as far as each socket is ready.

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::{
    SinkExt,
    StreamExt,
    future,
    stream::{self, BoxStream, SelectAll, SplitSink, SplitStream},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    select,
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval, timeout},
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{self, Message},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::connection::Established;
use crate::{
    codec::ImageCodec,
    config::TransportConfig,
    dispatch::{self, DispatchError, EgressQueue, Outbound},
    error::FrameError,
    metrics::{self, Direction},
    queue::{FrameJob, FrameQueue, Pushed, QueueError},
    session::{ConnectionId, ConnectionRegistry},
};

/// Shared state and channels handed to [`IoLoop::new`].
pub(super) struct IoLoopOptions<S> {
    pub registry: Arc<ConnectionRegistry>,
    pub queue: Arc<FrameQueue<FrameJob>>,
    pub codec: Arc<dyn ImageCodec>,
    pub egress: EgressQueue,
    pub established: mpsc::Receiver<Established<S>>,
    pub transport: TransportConfig,
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
}

enum Inbound {
    Message(ConnectionId, Result<Message, tungstenite::Error>),
    Ended(ConnectionId),
}

type WriteEvents = Vec<(ConnectionId, Result<usize, DispatchError>)>;

struct Connection<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    outbound: Outbound,
    peer: SocketAddr,
    last_seen: Instant,
    // Frames accepted into the queue and not evicted from it.
    submitted: u64,
    reader: CancellationToken,
}

impl<S> Connection<S> {
    /// Whether results are still owed to the peer.
    fn awaiting_results(&self, last_sent: u64) -> bool {
        self.submitted > last_sent || !self.outbound.is_idle()
    }
}

pub(super) struct IoLoop<S> {
    registry: Arc<ConnectionRegistry>,
    queue: Arc<FrameQueue<FrameJob>>,
    codec: Arc<dyn ImageCodec>,
    egress: EgressQueue,
    established: mpsc::Receiver<Established<S>>,
    transport: TransportConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    connections: HashMap<ConnectionId, Connection<S>>,
    // Connections with output not yet written and flushed.
    writing: HashSet<ConnectionId>,
    readers: SelectAll<BoxStream<'static, Inbound>>,
}

impl<S> IoLoop<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(super) fn new(options: IoLoopOptions<S>) -> Self {
        let IoLoopOptions {
            registry,
            queue,
            codec,
            egress,
            established,
            transport,
            shutdown,
            tracker,
        } = options;
        Self {
            registry,
            queue,
            codec,
            egress,
            established,
            transport,
            shutdown,
            tracker,
            connections: HashMap::new(),
            writing: HashSet::new(),
            readers: SelectAll::new(),
        }
    }

    /// Service sockets until shutdown, then close every connection.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    pub(super) async fn run(mut self) {
        let mut housekeeping = interval(housekeeping_period(&self.transport));
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let writing = !self.writing.is_empty();
            select! {
                biased;

                () = self.shutdown.cancelled() => break,
                Some(task) = self.egress.recv() => self.dispatch(task.connection),
                Some(established) = self.established.recv() => self.register(established),
                events = future::poll_fn(|cx| poll_writers(&mut self.connections, &self.writing, cx)),
                    if writing => self.written(events),
                Some(event) = self.readers.next(), if !self.readers.is_empty() => {
                    self.handle(event);
                }
                _ = housekeeping.tick() => self.housekeep(),
            }
        }
        self.close_all();
    }

    fn register(&mut self, established: Established<S>) {
        let Established { ws, peer } = established;
        let id = self.registry.connect();
        let (sink, stream) = ws.split();
        let reader = self.shutdown.child_token();
        self.readers.push(read_events(id, stream, reader.clone()));
        self.connections.insert(
            id,
            Connection {
                sink,
                outbound: Outbound::new(self.transport.outbound_capacity),
                peer,
                last_seen: Instant::now(),
                submitted: 0,
                reader,
            },
        );
        metrics::inc_connections();
        info!("connection opened: connection={id}, peer_addr={peer}");
    }

    fn handle(&mut self, event: Inbound) {
        let (id, message) = match event {
            Inbound::Ended(id) => return self.disconnect(id, "stream ended"),
            Inbound::Message(id, Err(e)) => {
                debug!("read error: connection={id}, error={e}");
                return self.disconnect(id, "read error");
            }
            Inbound::Message(id, Ok(message)) => (id, message),
        };
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        connection.last_seen = Instant::now();
        match message {
            Message::Binary(payload) => self.ingest(id, &payload),
            Message::Close(_) => self.disconnect(id, "closed by peer"),
            Message::Text(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    fn ingest(&mut self, id: ConnectionId, payload: &[u8]) {
        let image = match self.codec.decode(payload) {
            Ok(image) => image,
            Err(source) => {
                let err = FrameError::Decode {
                    connection: id,
                    source,
                };
                warn!("dropping undecodable frame: {err}");
                metrics::inc_errors(err.kind());
                return;
            }
        };
        metrics::inc_frames(Direction::Inbound, 1);
        let pushed = self.queue.push(FrameJob {
            connection: id,
            image,
        });
        if pushed.is_ok()
            && let Some(connection) = self.connections.get_mut(&id)
        {
            connection.submitted += 1;
        }
        let dropped = match pushed {
            Ok(Pushed::Queued) => return,
            Ok(Pushed::Evicted(oldest)) => {
                if let Some(owner) = self.connections.get_mut(&oldest.connection) {
                    owner.submitted = owner.submitted.saturating_sub(1);
                }
                FrameError::QueueOverflow {
                    connection: oldest.connection,
                    source: QueueError::Evicted,
                }
            }
            Err(source) => FrameError::QueueOverflow {
                connection: id,
                source,
            },
        };
        warn!("frame queue overflow: {dropped}");
        metrics::inc_queue_dropped(1);
        metrics::inc_errors(dropped.kind());
    }

    fn dispatch(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(&id) else {
            debug!("{}", FrameError::Dispatch { connection: id });
            return;
        };
        match dispatch::dispatch(&self.registry, id, &mut connection.outbound) {
            Ok(sent) => {
                if sent.skipped > 0 {
                    debug!(
                        "skipped lost frames: connection={id}, skipped={}, last_sent={}",
                        sent.skipped, sent.last_sent
                    );
                }
                if !connection.outbound.is_idle() {
                    self.writing.insert(id);
                }
            }
            Err(DispatchError::Gone(_)) => {
                debug!("{}", FrameError::Dispatch { connection: id });
            }
            Err(e) => {
                warn!("closing slow connection: {e}");
                self.disconnect(id, "outbound overflow");
            }
        }
    }

    fn written(&mut self, events: WriteEvents) {
        for (id, result) in events {
            match result {
                Ok(written) => {
                    if written > 0 {
                        metrics::inc_frames(
                            Direction::Outbound,
                            u64::try_from(written).unwrap_or(u64::MAX),
                        );
                    }
                    if let Some(connection) = self.connections.get_mut(&id) {
                        connection.last_seen = Instant::now();
                        if connection.outbound.is_idle() {
                            self.writing.remove(&id);
                        }
                    }
                }
                Err(e) => {
                    warn!("closing connection after failed write: {e}");
                    self.disconnect(id, "write failed");
                }
            }
        }
    }

    fn housekeep(&mut self) {
        let now = Instant::now();
        let limit = self.transport.write_timeout;
        let stalled: Vec<_> = self
            .writing
            .iter()
            .copied()
            .filter(|id| {
                self.connections
                    .get(id)
                    .and_then(|connection| connection.outbound.stalled_for(now))
                    .is_some_and(|stalled| stalled >= limit)
            })
            .collect();
        for id in stalled {
            let err = DispatchError::Timeout {
                connection: id,
                after: limit,
            };
            warn!("closing connection after failed write: {err}");
            self.disconnect(id, "write timed out");
        }
        self.reap_idle(now);
    }

    /// Close connections that have been silent for the idle timeout and are
    /// owed no results.
    fn reap_idle(&mut self, now: Instant) {
        let Some(limit) = self.transport.idle_timeout else {
            return;
        };
        let idle: Vec<_> = self
            .connections
            .iter()
            .filter(|(id, connection)| {
                let last_sent = self
                    .registry
                    .sequence_state(**id)
                    .map_or(0, |state| state.last_sent);
                now.saturating_duration_since(connection.last_seen) >= limit
                    && !connection.awaiting_results(last_sent)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in idle {
            self.disconnect(id, "idle timeout");
        }
    }

    fn close_all(&mut self) {
        let ids: Vec<_> = self.connections.keys().copied().collect();
        for id in ids {
            self.disconnect(id, "shutdown");
        }
    }

    /// Tear down `id`: stop its reader, drop its registry state and queued
    /// output, and send a Close frame in the background. Idempotent.
    fn disconnect(&mut self, id: ConnectionId, reason: &str) {
        let Some(connection) = self.connections.remove(&id) else {
            return;
        };
        self.writing.remove(&id);
        let Connection {
            mut sink,
            outbound,
            peer,
            reader,
            ..
        } = connection;
        reader.cancel();
        let dropped = self.registry.disconnect(id).unwrap_or_default() + outbound.len();
        metrics::dec_connections();
        info!(
            "connection closed: connection={id}, peer_addr={peer}, reason={reason}, \
             dropped_frames={dropped}"
        );
        let limit = self.transport.write_timeout;
        self.tracker.spawn(async move {
            if let Ok(Err(e)) = timeout(limit, sink.close()).await {
                debug!("close handshake failed: connection={id}, error={e}");
            }
        });
    }
}

/// Half the shortest timeout the loop enforces, at least 1 ms.
fn housekeeping_period(transport: &TransportConfig) -> Duration {
    let shortest = transport
        .idle_timeout
        .map_or(transport.write_timeout, |idle| idle.min(transport.write_timeout));
    (shortest / 2).max(Duration::from_millis(1))
}

/// Give every connection with pending output a chance to write.
///
/// Ready with the connections that made progress or failed; pending, with
/// wakers registered on the stalled sockets, when none did.
fn poll_writers<S>(
    connections: &mut HashMap<ConnectionId, Connection<S>>,
    writing: &HashSet<ConnectionId>,
    cx: &mut Context<'_>,
) -> Poll<WriteEvents>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut events = Vec::new();
    for id in writing {
        let Some(connection) = connections.get_mut(id) else {
            continue;
        };
        if let Poll::Ready(result) = connection.outbound.poll_write(*id, &mut connection.sink, cx) {
            events.push((*id, result));
        }
    }
    if events.is_empty() {
        Poll::Pending
    } else {
        Poll::Ready(events)
    }
}

fn read_events<S>(
    id: ConnectionId,
    stream: SplitStream<WebSocketStream<S>>,
    stop: CancellationToken,
) -> BoxStream<'static, Inbound>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    stream
        .map(move |message| Inbound::Message(id, message))
        .take_until(stop.cancelled_owned())
        .chain(stream::once(future::ready(Inbound::Ended(id))))
        .boxed()
}
