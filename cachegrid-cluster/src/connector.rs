use crate::{error::ClusterError, shard::ShardId};

/// Storage side of the cluster: hands out shard-scoped connections.
///
/// Everything issued through a connection returned by `connect` targets that
/// shard. Connections are plain values, so nested calls to another shard just
/// connect again.
#[async_trait::async_trait]
pub trait ShardConnector: Send + Sync + 'static {
    type Conn: Clone + Send + Sync + 'static;

    async fn connect(&self, shard: &ShardId) -> Result<Self::Conn, ClusterError>;

    /// Enforce the shard's size bound after `count` records were written.
    async fn trim(
        &self,
        conn: &Self::Conn,
        count: usize,
    ) -> Result<(), ClusterError>;
}
