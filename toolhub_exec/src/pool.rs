//! Persistent worker pool keyed by execution profile.
//!
//! The pool amortizes process start-up cost across many invocations sharing
//! an execution profile. Each profile owns one long-lived worker process and
//! one serialization loop; request/response pairs travel over the worker's
//! stdin/stdout as [`frame`](crate::frame)s. Calls sharing a profile are
//! strictly serialized in submission order by that loop, which is what keeps
//! frames from two callers from ever interleaving on the shared pipe. Calls
//! with different profiles execute fully in parallel. A worker idle beyond
//! its window tears itself down; the next call respawns it.

use crate::config::PoolConfig;
use crate::frame::{read_frame, write_frame};
use crate::runner::{RunError, StreamOptions, run_stream};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot};

static WORKER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors surfaced to the caller of [`WorkerPool::run`].
///
/// Each failure is delivered only to the originating task; it never aborts
/// the worker loop or affects sibling tasks. The pool performs no retries.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] RunError),

    #[error("no input data")]
    EmptyInput,

    #[error("failed to read task input: {0}")]
    ReadInput(#[source] std::io::Error),

    #[error("failed to write request to worker stdin: {0}")]
    WriteRequest(#[source] std::io::Error),

    #[error("failed to read response from worker stdout: {0}")]
    ReadResponse(#[source] std::io::Error),

    #[error("worker queue closed")]
    QueueClosed,
}

/// One unit of work for a pooled worker.
pub struct WorkerInput {
    /// Task payload; read fully into memory before framing.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Execution profile selecting (or creating) the worker.
    pub options: StreamOptions,
    /// Argv used to spawn the worker process when it is not yet running.
    pub command: Vec<String>,
}

impl WorkerInput {
    pub fn new(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        options: StreamOptions,
        command: Vec<String>,
    ) -> Self {
        Self {
            reader,
            options,
            command,
        }
    }

    /// Convenience constructor for callers that already hold the payload in
    /// memory.
    pub fn from_bytes(
        payload: impl Into<Vec<u8>>,
        options: StreamOptions,
        command: Vec<String>,
    ) -> Self {
        Self {
            reader: Box::new(std::io::Cursor::new(payload.into())),
            options,
            command,
        }
    }
}

impl std::fmt::Debug for WorkerInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerInput")
            .field("options", &self.options)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Live connection to a worker process: the two pipe ends the serialization
/// loop owns exclusively, plus the channel the exit watcher signals on.
pub struct WorkerConnection {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    /// Completed by the background exit watcher once the process is gone.
    pub exited: oneshot::Receiver<()>,
}

/// Seam for launching worker processes.
///
/// The production implementation is [`ProcessSpawner`]; tests inject an
/// in-memory fake so pool behavior can be exercised without forking.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(
        &self,
        options: &StreamOptions,
        command: &[String],
    ) -> Result<WorkerConnection, RunError>;
}

/// Spawns real worker processes through the streaming runner.
///
/// Each spawned worker gets a background stderr drain (lines surface in the
/// logs at `warn`) and a background exit watcher that reaps the process and
/// signals the serialization loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSpawner;

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(
        &self,
        options: &StreamOptions,
        command: &[String],
    ) -> Result<WorkerConnection, RunError> {
        let mut stream = run_stream(options, command)?;
        let stdin = stream.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = stream.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

        if let Some(stderr) = stream.stderr.take() {
            // Drain stderr so the worker can never block on a full pipe.
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::warn!(target: "worker_stderr", "{line}");
                    }
                }
            });
        }

        let (exit_tx, exited) = oneshot::channel();
        tokio::spawn(async move {
            match stream.wait().await {
                Ok(status) => tracing::warn!(%status, "worker process exited"),
                Err(error) => tracing::warn!(%error, "worker process exited"),
            }
            let _ = exit_tx.send(());
        });

        Ok(WorkerConnection {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            exited,
        })
    }
}

fn missing_pipe(name: &str) -> RunError {
    RunError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("worker {name} pipe unavailable"),
    ))
}

struct Task {
    input: WorkerInput,
    reply: oneshot::Sender<Result<Vec<u8>, PoolError>>,
}

struct WorkerHandle {
    worker_id: u64,
    queue: mpsc::Sender<Task>,
    stop: oneshot::Sender<()>,
}

struct PoolInner {
    config: PoolConfig,
    spawner: Arc<dyn WorkerSpawner>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

/// Pool of persistent workers, one per execution profile.
///
/// Explicitly constructed; independent pools share no state.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a pool that spawns real worker processes.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_spawner(config, Arc::new(ProcessSpawner))
    }

    /// Creates a pool with a custom [`WorkerSpawner`].
    pub fn with_spawner(config: PoolConfig, spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                spawner,
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Executes one task on the worker owning the input's profile and awaits
    /// its result.
    ///
    /// The worker entry is created on first use; the underlying process is
    /// spawned lazily by the loop on the first dequeued task. If the worker
    /// was evicted between lookup and submission the task fails with
    /// [`PoolError::QueueClosed`]; retrying is the caller's decision.
    pub async fn run(&self, input: WorkerInput) -> Result<Vec<u8>, PoolError> {
        let key = input.options.profile_key();
        let queue = self.sender_for(&key);

        let (reply_tx, reply_rx) = oneshot::channel();
        let task = Task {
            input,
            reply: reply_tx,
        };
        if queue.send(task).await.is_err() {
            return Err(PoolError::QueueClosed);
        }
        reply_rx.await.map_err(|_| PoolError::QueueClosed)?
    }

    /// Number of currently registered workers.
    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().unwrap().len()
    }

    /// Tears down every worker: deregisters all entries and signals their
    /// loops, which drain still-queued tasks with [`PoolError::QueueClosed`].
    ///
    /// The pool stays usable; a later call simply registers a fresh worker.
    pub fn shutdown(&self) {
        let workers: Vec<(String, WorkerHandle)> = {
            let mut map = self.inner.workers.lock().unwrap();
            map.drain().collect()
        };
        for (key, handle) in workers {
            tracing::debug!(key = %key, "stopping worker");
            let _ = handle.stop.send(());
        }
    }

    /// Returns the task queue for `key`, registering a new worker (and
    /// starting its serialization loop) when none exists.
    fn sender_for(&self, key: &str) -> mpsc::Sender<Task> {
        let (queue_tx, worker) = {
            let mut workers = self.inner.workers.lock().unwrap();
            if let Some(handle) = workers.get(key) {
                return handle.queue.clone();
            }

            let worker_id = WORKER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
            let (queue_tx, queue_rx) = mpsc::channel(self.inner.config.queue_capacity.max(1));
            let (stop_tx, stop_rx) = oneshot::channel();
            workers.insert(
                key.to_string(),
                WorkerHandle {
                    worker_id,
                    queue: queue_tx.clone(),
                    stop: stop_tx,
                },
            );
            let worker = Worker {
                id: worker_id,
                key: key.to_string(),
                pool: Arc::clone(&self.inner),
                queue: queue_rx,
                stop: stop_rx,
                state: ProcessState::Unstarted,
            };
            (queue_tx, worker)
        };

        // The registry lock is released before the loop starts; the lock
        // only ever covers map access.
        tracing::debug!(key, "registered worker");
        tokio::spawn(worker.run());
        queue_tx
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("workers", &self.worker_count())
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a worker's underlying process.
enum ProcessState {
    Unstarted,
    Running(WorkerConnection),
    Exited,
}

/// State owned by one serialization loop. The loop is the single consumer of
/// its queue and the exclusive owner of the worker's pipes.
struct Worker {
    id: u64,
    key: String,
    pool: Arc<PoolInner>,
    queue: mpsc::Receiver<Task>,
    stop: oneshot::Receiver<()>,
    state: ProcessState,
}

impl Worker {
    async fn run(mut self) {
        let idle_timeout = self.pool.config.idle_timeout();
        loop {
            let idle = tokio::time::sleep(idle_timeout);
            tokio::pin!(idle);
            tokio::select! {
                biased;
                _ = &mut self.stop => {
                    tracing::debug!(key = %self.key, "worker stopping on pool shutdown");
                    break;
                }
                maybe = self.queue.recv() => match maybe {
                    Some(task) => self.handle(task).await,
                    None => break,
                },
                () = &mut idle => {
                    self.deregister();
                    tracing::debug!(key = %self.key, "worker idle window elapsed, stopping");
                    break;
                }
            }
        }
        self.drain();
    }

    async fn handle(&mut self, mut task: Task) {
        let result = self.execute(&mut task.input).await;
        // The reply channel holds one slot, so delivery never blocks the
        // loop even when the caller has not started awaiting yet.
        if task.reply.send(result).is_err() {
            tracing::debug!(key = %self.key, "caller abandoned task before delivery");
        }
    }

    async fn execute(&mut self, input: &mut WorkerInput) -> Result<Vec<u8>, PoolError> {
        let mut conn = self.connect(&input.options, &input.command).await?;
        let result = async {
            let mut payload = Vec::new();
            input
                .reader
                .read_to_end(&mut payload)
                .await
                .map_err(PoolError::ReadInput)?;
            if payload.is_empty() {
                return Err(PoolError::EmptyInput);
            }
            write_frame(&mut conn.stdin, &payload)
                .await
                .map_err(PoolError::WriteRequest)?;
            read_frame(&mut conn.stdout)
                .await
                .map_err(PoolError::ReadResponse)
        }
        .await;
        // The connection is kept even after an I/O failure; whether the
        // process is really gone is the exit watcher's call, checked on the
        // next task.
        self.state = ProcessState::Running(conn);
        result
    }

    /// Hands out the live connection, spawning the process when this worker
    /// has never run one or when the exit watcher reported the previous one
    /// gone. A spawn failure fails only the current task; the next task
    /// retries.
    async fn connect(
        &mut self,
        options: &StreamOptions,
        command: &[String],
    ) -> Result<WorkerConnection, PoolError> {
        match std::mem::replace(&mut self.state, ProcessState::Exited) {
            ProcessState::Running(mut conn) => {
                use tokio::sync::oneshot::error::TryRecvError;
                if matches!(conn.exited.try_recv(), Err(TryRecvError::Empty)) {
                    return Ok(conn);
                }
                tracing::debug!(key = %self.key, "worker process gone, respawning");
            }
            ProcessState::Unstarted | ProcessState::Exited => {}
        }

        let conn = self
            .pool
            .spawner
            .spawn(options, command)
            .await
            .map_err(PoolError::Spawn)?;
        tracing::debug!(key = %self.key, "spawned worker process");
        Ok(conn)
    }

    /// Removes this worker's registry entry, unless the key has already been
    /// re-registered to a newer worker.
    fn deregister(&self) {
        let mut workers = self.pool.workers.lock().unwrap();
        if workers
            .get(&self.key)
            .is_some_and(|handle| handle.worker_id == self.id)
        {
            workers.remove(&self.key);
        }
    }

    /// Closes the queue and fails every task that was enqueued but never
    /// consumed, so no caller is left hanging. Dropping the connection
    /// closes the worker's pipes.
    fn drain(&mut self) {
        self.queue.close();
        while let Ok(task) = self.queue.try_recv() {
            let _ = task.reply.send(Err(PoolError::QueueClosed));
        }
        if matches!(self.state, ProcessState::Running(_)) {
            tracing::debug!(key = %self.key, "closing worker pipes");
            self.state = ProcessState::Exited;
        }
    }
}
