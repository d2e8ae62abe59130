use std::{collections::BTreeMap, future::Future, sync::Arc};

use futures_util::{Stream, stream};
use tracing::debug;

use crate::{
    connector::ShardConnector,
    error::ClusterError,
    execution::{
        Dispatched, DispatchStats, ErrorHandler, Execution, LogErrorHandler,
        Operation, TaskSpawner, TokioSpawner,
    },
    grouper::group_by_shard,
    router::{KeyHasher, Murmur3Hasher, ShardRouter},
    shard::{ClusterOptions, ShardId, ShardRegistry},
};

/// Routes cache operations to shards and runs them there.
pub struct ShardCluster<C: ShardConnector> {
    router: ShardRouter,
    connector: Arc<C>,
    execution: Execution,
}

pub struct ShardClusterBuilder<C: ShardConnector> {
    options: ClusterOptions,
    connector: Arc<C>,
    hasher: Arc<dyn KeyHasher>,
    spawner: Arc<dyn TaskSpawner>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl<C: ShardConnector> ShardClusterBuilder<C> {
    pub fn hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    pub fn build(self) -> Result<ShardCluster<C>, ClusterError> {
        let registry = Arc::new(ShardRegistry::new(&self.options)?);
        debug!(
            "cluster with shards {:?}, async writes {}",
            registry.shards(),
            self.options.async_writes
        );
        Ok(ShardCluster {
            router: ShardRouter::with_hasher(registry, self.hasher),
            connector: self.connector,
            execution: Execution::new(
                self.options.async_writes,
                self.spawner,
                self.error_handler,
            ),
        })
    }
}

impl<C: ShardConnector> ShardCluster<C> {
    pub fn new(options: ClusterOptions, connector: C) -> Result<Self, ClusterError> {
        Self::builder(options, connector).build()
    }

    pub fn builder(options: ClusterOptions, connector: C) -> ShardClusterBuilder<C> {
        ShardClusterBuilder {
            options,
            connector: Arc::new(connector),
            hasher: Arc::new(Murmur3Hasher::default()),
            spawner: Arc::new(TokioSpawner::default()),
            error_handler: Arc::new(LogErrorHandler),
        }
    }

    pub fn shards(&self) -> &[ShardId] {
        self.router.registry().shards()
    }

    pub fn async_writes(&self) -> bool {
        self.execution.async_writes()
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn stats(&self) -> &DispatchStats {
        self.execution.stats()
    }

    pub fn shard_for(&self, key: &[u8]) -> Result<&ShardId, ClusterError> {
        self.router.shard_for(key)
    }

    pub fn group<T, K>(
        &self,
        items: Vec<T>,
        key_of: K,
    ) -> Result<BTreeMap<ShardId, Vec<T>>, ClusterError>
    where
        K: Fn(&T) -> &[u8],
    {
        group_by_shard(&self.router, items, key_of)
    }

    /// Runs `op` once on every configured shard, lazily.
    ///
    /// Each item of the stream is produced by connecting to the next shard and
    /// dispatching `op` there, so nothing happens until the stream is polled.
    pub fn writing_all_shards<'a, F, Fut, R>(
        &'a self,
        op: F,
    ) -> impl Stream<Item = Result<Dispatched<R>, ClusterError>> + 'a
    where
        F: FnMut(C::Conn) -> Fut + 'a,
        Fut: Future<Output = Result<R, ClusterError>> + Send + 'static,
        R: Send + 'static,
    {
        stream::unfold((op, 0usize), move |(mut op, index)| async move {
            let shard = self.shards().get(index)?;
            let result = match self.connector.connect(shard).await {
                Ok(conn) => {
                    self.execution
                        .dispatch(shard, Operation::WriteAll, op(conn))
                        .await
                }
                Err(e) => Err(e),
            };
            Some((result, (op, index + 1)))
        })
    }

    /// Writes `list` grouped by shard, one `op` call per shard.
    ///
    /// With `trim`, the shard is trimmed by the size of its group right after
    /// `op` is dispatched, on the calling task, even when `op` was detached.
    pub async fn writing_across_shards<T, K, F, Fut, R>(
        &self,
        list: Vec<T>,
        key_of: K,
        trim: bool,
        mut op: F,
    ) -> Result<Vec<Dispatched<R>>, ClusterError>
    where
        K: Fn(&T) -> &[u8],
        F: FnMut(C::Conn, Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, ClusterError>> + Send + 'static,
        R: Send + 'static,
    {
        let groups = self.group(list, key_of)?;
        let mut results = Vec::with_capacity(groups.len());
        for (shard, items) in groups {
            let count = items.len();
            let conn = self.connector.connect(&shard).await?;
            let dispatched = self
                .execution
                .dispatch(&shard, Operation::Write, op(conn.clone(), items))
                .await?;
            if trim {
                self.execution
                    .trim(&shard, self.connector.trim(&conn, count))
                    .await;
            }
            results.push(dispatched);
        }
        Ok(results)
    }

    /// Reads `list` grouped by shard. Always inline.
    pub async fn reading_across_shards<T, K, F, Fut, R>(
        &self,
        list: Vec<T>,
        key_of: K,
        mut op: F,
    ) -> Result<Vec<R>, ClusterError>
    where
        K: Fn(&T) -> &[u8],
        F: FnMut(C::Conn, Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, ClusterError>>,
    {
        let groups = self.group(list, key_of)?;
        let mut results = Vec::with_capacity(groups.len());
        for (shard, items) in groups {
            let conn = self.connector.connect(&shard).await?;
            results.push(op(conn, items).await?);
        }
        Ok(results)
    }

    /// Like [`Self::reading_across_shards`], concatenating the per-shard results.
    pub async fn reading_across_shards_flat<T, K, F, Fut, I>(
        &self,
        list: Vec<T>,
        key_of: K,
        op: F,
    ) -> Result<Vec<I::Item>, ClusterError>
    where
        K: Fn(&T) -> &[u8],
        F: FnMut(C::Conn, Vec<T>) -> Fut,
        Fut: Future<Output = Result<I, ClusterError>>,
        I: IntoIterator,
    {
        let results = self.reading_across_shards(list, key_of, op).await?;
        Ok(results.into_iter().flatten().collect())
    }

    pub async fn writing_shard<F, Fut, R>(
        &self,
        key: &[u8],
        trim: bool,
        op: F,
    ) -> Result<Dispatched<R>, ClusterError>
    where
        F: FnOnce(C::Conn) -> Fut,
        Fut: Future<Output = Result<R, ClusterError>> + Send + 'static,
        R: Send + 'static,
    {
        let shard = self.router.shard_for(key)?;
        let conn = self.connector.connect(shard).await?;
        let dispatched = self
            .execution
            .dispatch(shard, Operation::Write, op(conn.clone()))
            .await?;
        if trim {
            self.execution
                .trim(shard, self.connector.trim(&conn, 1))
                .await;
        }
        Ok(dispatched)
    }

    pub async fn reading_shard<F, Fut, R>(
        &self,
        key: &[u8],
        op: F,
    ) -> Result<R, ClusterError>
    where
        F: FnOnce(C::Conn) -> Fut,
        Fut: Future<Output = Result<R, ClusterError>>,
    {
        let shard = self.router.shard_for(key)?;
        let conn = self.connector.connect(shard).await?;
        op(conn).await
    }
}

impl<C: ShardConnector> std::fmt::Debug for ShardCluster<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCluster")
            .field("router", &self.router)
            .field("execution", &self.execution)
            .finish()
    }
}
