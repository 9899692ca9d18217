//! Worker pool: dequeue, process, encode, park, schedule.
//!
//! Each worker is an OS thread owning exactly one pipeline engine built from
//! the shared [`EngineFactory`]. Engines may block for as long as they like;
//! nothing on the I/O loop ever waits for them. A worker whose engine fails to
//! build logs the failure and exits, leaving the rest of the pool running.
//!
//! Sequence numbers are claimed inside [`FrameQueue::pop_with`], so the order
//! in which jobs leave the queue is the order in which each connection's
//! numbers are handed out. Every failure after that point, including a panic
//! inside the engine, parks a [`Slot::Lost`](crate::reassembly::Slot::Lost)
//! marker so the connection's stream keeps moving.

use std::{
    io,
    num::NonZeroUsize,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::{
    codec::ImageCodec,
    dispatch::EgressHandle,
    engine::{EngineFactory, PipelineEngine},
    error::FrameError,
    metrics,
    panic::format_panic,
    queue::{FrameJob, FrameQueue},
    reassembly::InsertOutcome,
    session::{ConnectionId, ConnectionRegistry},
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(5);

/// Everything a worker thread shares with the rest of the server.
pub struct WorkerContext<F> {
    /// Source of jobs.
    pub queue: Arc<FrameQueue<FrameJob>>,
    /// Sequencing state and reassembly buffers.
    pub registry: Arc<ConnectionRegistry>,
    /// Encoder for processed frames.
    pub codec: Arc<dyn ImageCodec>,
    /// Channel back to the I/O loop.
    pub egress: EgressHandle,
    /// Builds one engine per worker.
    pub factory: Arc<F>,
}

impl<F> Clone for WorkerContext<F> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            registry: Arc::clone(&self.registry),
            codec: Arc::clone(&self.codec),
            egress: self.egress.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

/// Summary of a completed [`WorkerPool::shutdown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued jobs discarded because the grace period ran out.
    pub abandoned: usize,
    /// Worker threads that terminated by panicking.
    pub panicked: usize,
}

/// Fixed set of worker threads consuming one [`FrameQueue`].
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<FrameQueue<FrameJob>>,
    handles: Vec<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Start `count` workers and wait until each has built its engine or
    /// given up.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the operating system refuses to create a
    /// thread. Workers started before the failure are stopped and joined.
    pub fn spawn<F: EngineFactory>(count: NonZeroUsize, ctx: &WorkerContext<F>) -> io::Result<Self> {
        let live = Arc::new(AtomicUsize::new(0));
        let (init_tx, init_rx) = mpsc::channel::<()>();
        let mut handles = Vec::with_capacity(count.get());
        for index in 0..count.get() {
            let worker_ctx = ctx.clone();
            let worker_live = Arc::clone(&live);
            let worker_init = init_tx.clone();
            let spawned = spawn_thread(format!("framepipe-worker-{index}"), move || {
                run_worker(index, &worker_ctx, &worker_live, worker_init);
            });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    ctx.queue.abandon();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }
        drop(init_tx);
        // Each worker holds a sender until its engine is built or has failed.
        for () in init_rx {}

        let started = live.load(Ordering::SeqCst);
        info!("worker pool started: workers={started}, requested={count}");
        if started == 0 {
            error!("no worker could build an engine; frames will not be processed");
        }
        Ok(Self {
            queue: Arc::clone(&ctx.queue),
            handles,
            live,
        })
    }

    /// Number of workers currently running their job loop.
    #[must_use]
    pub fn live_workers(&self) -> usize { self.live.load(Ordering::SeqCst) }

    /// Number of threads the pool started.
    #[must_use]
    pub fn spawned(&self) -> usize { self.handles.len() }

    /// Close the queue, let workers drain it for up to `grace`, abandon
    /// whatever is left and join every thread.
    ///
    /// Blocks the calling thread; run it via `spawn_blocking` from async code.
    pub fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        self.queue.close();
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && !self.handles.iter().all(JoinHandle::is_finished) {
            thread::sleep(SHUTDOWN_POLL);
        }
        let abandoned = self.queue.abandon();
        if abandoned > 0 {
            warn!("shutdown grace elapsed; abandoning queued frames: abandoned={abandoned}");
        }
        let panicked = std::mem::take(&mut self.handles)
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();
        info!("worker pool stopped: abandoned={abandoned}, panicked={panicked}");
        ShutdownReport {
            abandoned,
            panicked,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            // Detached workers exit once the queue reports closed and empty.
            self.queue.abandon();
        }
    }
}

/// Spawn a named thread that inherits the caller's `tracing` dispatcher.
fn spawn_thread<F, T>(name: String, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(Clone::clone);
    thread::Builder::new()
        .name(name)
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn run_worker<F: EngineFactory>(
    index: usize,
    ctx: &WorkerContext<F>,
    live: &AtomicUsize,
    init: mpsc::Sender<()>,
) {
    let span = tracing::info_span!("worker", index);
    let _entered = span.enter();

    let mut engine = match catch_unwind(AssertUnwindSafe(|| ctx.factory.build())) {
        Ok(Ok(engine)) => engine,
        Ok(Err(source)) => {
            let err = FrameError::EngineInit {
                worker: index,
                source,
            };
            error!("worker exiting: worker={index}, error={err}");
            metrics::inc_errors(err.kind());
            return;
        }
        Err(panic) => {
            let panic = format_panic(panic);
            error!("engine construction panicked: worker={index}, panic={panic}");
            tracing::error!(worker = index, panic = %panic, "engine construction panicked");
            metrics::inc_errors("engine_init");
            return;
        }
    };
    live.fetch_add(1, Ordering::SeqCst);
    drop(init);

    while let Some((job, sequence)) = ctx.queue.pop_with(|job| {
        let sequence = ctx.registry.assign_sequence(job.connection);
        (job, sequence)
    }) {
        match sequence {
            Some(sequence) => process_job(index, &mut engine, ctx, job, sequence),
            None => debug!(
                "discarding frame for closed connection: worker={index}, connection={}",
                job.connection
            ),
        }
    }

    live.fetch_sub(1, Ordering::SeqCst);
    debug!("worker stopped: worker={index}");
}

fn process_job<F: EngineFactory>(
    index: usize,
    engine: &mut F::Engine,
    ctx: &WorkerContext<F>,
    job: FrameJob,
    sequence: u64,
) {
    let connection = job.connection;
    let started = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| {
        let processed = engine
            .process(job.image)
            .map_err(|source| FrameError::Engine {
                connection,
                sequence,
                source,
            })?;
        ctx.codec
            .encode(&processed)
            .map_err(|source| FrameError::Encode {
                connection,
                sequence,
                source,
            })
    }));

    let inserted = match result {
        Ok(Ok(frame)) => {
            debug!(
                "frame processed: worker={index}, connection={connection}, sequence={sequence}, \
                 elapsed_ms={}",
                started.elapsed().as_millis()
            );
            ctx.registry.complete(connection, sequence, frame)
        }
        Ok(Err(err)) => {
            warn!("frame dropped: worker={index}, error={err}");
            metrics::inc_errors(err.kind());
            ctx.registry.mark_lost(connection, sequence)
        }
        Err(panic) => {
            let panic = format_panic(panic);
            error!(
                "engine panicked: worker={index}, connection={connection}, sequence={sequence}, \
                 panic={panic}"
            );
            tracing::error!(
                worker = index,
                %connection,
                sequence,
                panic = %panic,
                "engine panicked"
            );
            metrics::inc_errors("panic");
            ctx.registry.mark_lost(connection, sequence)
        }
    };

    match inserted {
        Some(InsertOutcome::Accepted) => schedule(ctx, connection, sequence),
        Some(InsertOutcome::Overflow { skipped }) => {
            warn!(
                "reassembly bound exceeded; skipping missing frames: connection={connection}, \
                 skipped={skipped}"
            );
            schedule(ctx, connection, sequence);
        }
        Some(InsertOutcome::Duplicate | InsertOutcome::Stale) => {
            debug!("discarding late frame: connection={connection}, sequence={sequence}");
        }
        None => debug!("connection closed before completion: connection={connection}"),
    }
}

fn schedule<F>(ctx: &WorkerContext<F>, connection: ConnectionId, sequence: u64) {
    if !ctx.egress.schedule(connection, sequence) {
        let err = FrameError::Dispatch { connection };
        debug!("egress unavailable: {err}");
    }
}
