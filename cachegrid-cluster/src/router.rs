use std::sync::{Arc, OnceLock};

use cachegrid_maglev::MaglevTable;
use tracing::info;

use crate::{
    error::ClusterError,
    shard::{ShardId, ShardRegistry},
};

/// Hash applied to normalized keys before the table lookup.
pub trait KeyHasher: Send + Sync + 'static {
    fn hash_key(&self, key: &[u8]) -> u32;
}

/// MurmurHash3 (x86, 32 bit).
#[derive(Debug, Clone, Copy, Default)]
pub struct Murmur3Hasher {
    pub seed: u32,
}

impl KeyHasher for Murmur3Hasher {
    #[inline]
    fn hash_key(&self, key: &[u8]) -> u32 {
        mur3::murmurhash3_x86_32(key, self.seed)
    }
}

pub struct ShardRouter {
    registry: Arc<ShardRegistry>,
    hasher: Arc<dyn KeyHasher>,
    table: OnceLock<MaglevTable>,
}

impl ShardRouter {
    pub fn new(registry: Arc<ShardRegistry>) -> Self {
        Self::with_hasher(registry, Arc::new(Murmur3Hasher::default()))
    }

    pub fn with_hasher(
        registry: Arc<ShardRegistry>,
        hasher: Arc<dyn KeyHasher>,
    ) -> Self {
        Self {
            registry,
            hasher,
            table: OnceLock::new(),
        }
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    /// Shard owning `key`.
    pub fn shard_for(&self, key: &[u8]) -> Result<&ShardId, ClusterError> {
        if self.registry.is_single() {
            return Ok(&self.registry.shards()[0]);
        }

        let database = self.table()?.node(self.hasher.hash_key(key));
        self.registry.shard_for_database(database).ok_or_else(|| {
            ClusterError::Routing {
                backend: database.to_owned(),
            }
        })
    }

    /// Whether the lookup table has been built.
    pub fn table_built(&self) -> bool {
        self.table.get().is_some()
    }

    fn table(&self) -> Result<&MaglevTable, ClusterError> {
        if let Some(table) = self.table.get() {
            return Ok(table);
        }
        // concurrent builders produce identical tables, first one wins
        let databases: Vec<&str> = self.registry.databases().collect();
        let table = MaglevTable::build(databases.as_slice())?;
        info!(
            "built consistent hash table: {} slots, {} shards",
            table.len(),
            databases.len()
        );
        Ok(self.table.get_or_init(|| table))
    }
}

impl std::fmt::Debug for ShardRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRouter")
            .field("shards", &self.registry.shards())
            .field("table_built", &self.table_built())
            .finish()
    }
}
