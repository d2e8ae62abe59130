mod cluster;
mod connector;
mod error;
mod execution;
mod grouper;
pub mod memory;
mod router;
mod shard;

use std::collections::BTreeMap;

use envconfig::Envconfig;

pub use cluster::{ShardCluster, ShardClusterBuilder};
pub use connector::ShardConnector;
pub use error::{ClusterError, ClusterResult};
pub use execution::{
    AsyncFailure, DispatchStats, Dispatched, ErrorHandler, Execution,
    LogErrorHandler, Operation, StatsSnapshot, TaskSpawner, TokioSpawner,
};
pub use grouper::group_by_shard;
pub use router::{KeyHasher, Murmur3Hasher, ShardRouter};
pub use shard::{
    ClusterOptions, DEFAULT_BACKEND, ShardId, ShardRegistry, ShardSelection,
};

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Comma separated shard names. Unset means no sharding.
    #[envconfig(from = "CACHEGRID_SHARDS")]
    pub shards: Option<String>,
    /// Comma separated `shard=database` pairs.
    #[envconfig(from = "CACHEGRID_SHARD_DATABASES", default = "")]
    pub shard_databases: String,
    #[envconfig(from = "CACHEGRID_ASYNC_WRITES", default = "false")]
    pub async_writes: bool,
    #[envconfig(from = "CACHEGRID_MAX_ENTRIES", default = "10000")]
    pub max_entries: usize,
}

impl Config {
    pub fn cluster_options(&self) -> Result<ClusterOptions, ClusterError> {
        let shards = match &self.shards {
            Some(shards) if !shards.trim().is_empty() => {
                ShardSelection::Shards(split_list(shards).map(String::from).collect())
            }
            _ => ShardSelection::Unsharded,
        };

        let mut shard_databases = BTreeMap::new();
        for pair in split_list(&self.shard_databases) {
            let Some((shard, database)) = pair.split_once('=') else {
                return Err(ClusterError::configuration(format!(
                    "invalid shard database `{pair}`, expected `shard=database`"
                )));
            };
            shard_databases.insert(shard.trim().into(), database.trim().into());
        }

        Ok(ClusterOptions {
            shards,
            shard_databases,
            async_writes: self.async_writes,
        })
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}
