use std::{
    any::Any,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::{FutureExt, future::BoxFuture};
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::{error::ClusterError, shard::ShardId};

/// Runs a detached task without blocking the caller.
pub trait TaskSpawner: Send + Sync + 'static {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Spawns on the tokio runtime, either a fixed one or the caller's.
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner {
    handle: Option<Handle>,
}

impl TokioSpawner {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        match &self.handle {
            Some(handle) => {
                handle.spawn(task);
            }
            None => {
                tokio::spawn(task);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Write,
    WriteAll,
    Trim,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write => f.write_str("write"),
            Operation::WriteAll => f.write_str("write_all"),
            Operation::Trim => f.write_str("trim"),
        }
    }
}

/// A failure that could not be returned to the caller.
#[derive(Debug)]
pub struct AsyncFailure {
    pub shard: ShardId,
    pub operation: Operation,
    pub error: ClusterError,
}

pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, failure: AsyncFailure);
}

impl<F> ErrorHandler for F
where
    F: Fn(AsyncFailure) + Send + Sync + 'static,
{
    fn handle(&self, failure: AsyncFailure) {
        self(failure)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, failure: AsyncFailure) {
        error!(
            "{} on shard {} failed: {}",
            failure.operation, failure.shard, failure.error
        );
    }
}

/// Result of a write dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched<R> {
    Done(R),
    /// Handed to the spawner; the outcome goes to the error handler.
    Detached,
}

impl<R> Dispatched<R> {
    pub fn into_done(self) -> Option<R> {
        match self {
            Dispatched::Done(r) => Some(r),
            Dispatched::Detached => None,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Dispatched::Detached)
    }
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    inline: AtomicU64,
    detached: AtomicU64,
    detached_failures: AtomicU64,
    trims: AtomicU64,
    trim_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub inline: u64,
    pub detached: u64,
    pub detached_failures: u64,
    pub trims: u64,
    pub trim_failures: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inline: self.inline.load(Ordering::Relaxed),
            detached: self.detached.load(Ordering::Relaxed),
            detached_failures: self.detached_failures.load(Ordering::Relaxed),
            trims: self.trims.load(Ordering::Relaxed),
            trim_failures: self.trim_failures.load(Ordering::Relaxed),
        }
    }
}

/// Inline or detached execution of write operations.
#[derive(Clone)]
pub struct Execution {
    async_writes: bool,
    spawner: Arc<dyn TaskSpawner>,
    error_handler: Arc<dyn ErrorHandler>,
    stats: Arc<DispatchStats>,
}

impl Execution {
    pub fn new(
        async_writes: bool,
        spawner: Arc<dyn TaskSpawner>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            async_writes,
            spawner,
            error_handler,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn async_writes(&self) -> bool {
        self.async_writes
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Runs `task` inline, or detaches it when async writes are enabled.
    pub async fn dispatch<Fut, R>(
        &self,
        shard: &ShardId,
        operation: Operation,
        task: Fut,
    ) -> Result<Dispatched<R>, ClusterError>
    where
        Fut: Future<Output = Result<R, ClusterError>> + Send + 'static,
        R: Send + 'static,
    {
        if self.async_writes {
            self.detach(shard.clone(), operation, task);
            Ok(Dispatched::Detached)
        } else {
            self.stats.inline.fetch_add(1, Ordering::Relaxed);
            task.await.map(Dispatched::Done)
        }
    }

    fn detach<Fut, R>(&self, shard: ShardId, operation: Operation, task: Fut)
    where
        Fut: Future<Output = Result<R, ClusterError>> + Send + 'static,
        R: Send + 'static,
    {
        debug!("detach {} on shard {}", operation, shard);
        self.stats.detached.fetch_add(1, Ordering::Relaxed);
        let handler = self.error_handler.clone();
        let stats = self.stats.clone();
        self.spawner.spawn(Box::pin(async move {
            let error = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(_)) => return,
                Ok(Err(error)) => error,
                Err(panic) => ClusterError::TaskPanicked(panic_message(panic)),
            };
            stats.detached_failures.fetch_add(1, Ordering::Relaxed);
            handler.handle(AsyncFailure {
                shard,
                operation,
                error,
            });
        }));
    }

    /// Runs a trim inline. Failures are reported, never returned.
    pub async fn trim<Fut>(&self, shard: &ShardId, task: Fut)
    where
        Fut: Future<Output = Result<(), ClusterError>>,
    {
        self.stats.trims.fetch_add(1, Ordering::Relaxed);
        if let Err(error) = task.await {
            self.stats.trim_failures.fetch_add(1, Ordering::Relaxed);
            self.error_handler.handle(AsyncFailure {
                shard: shard.clone(),
                operation: Operation::Trim,
                error,
            });
        }
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("async_writes", &self.async_writes)
            .field("stats", &self.stats)
            .finish()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".into()
    }
}
