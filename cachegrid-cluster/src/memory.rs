use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use scc::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{connector::ShardConnector, error::ClusterError, shard::ShardId};

#[derive(Debug, Default)]
struct Entries {
    values: BTreeMap<Vec<u8>, (u64, Vec<u8>)>,
    next_seq: u64,
}

/// One in-memory shard. Records remember their write order so trimming can
/// drop the oldest first.
#[derive(Debug, Default)]
pub struct MemoryShard {
    entries: Mutex<Entries>,
    trimmed: AtomicU64,
}

impl MemoryShard {
    pub async fn write(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut entries = self.entries.lock().await;
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.values.insert(key, (seq, value));
    }

    pub async fn read(&self, key: &[u8]) -> Option<Vec<u8>> {
        let entries = self.entries.lock().await;
        entries.values.get(key).map(|(_, value)| value.clone())
    }

    pub async fn delete(&self, key: &[u8]) -> bool {
        self.entries.lock().await.values.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.values.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Records removed by trimming so far.
    pub fn trimmed(&self) -> u64 {
        self.trimmed.load(Ordering::Relaxed)
    }

    async fn trim_oldest(&self, max_entries: usize, count: usize) -> usize {
        let mut entries = self.entries.lock().await;
        let excess = entries.values.len().saturating_sub(max_entries);
        let remove = excess.min(count);
        if remove == 0 {
            return 0;
        }
        let mut by_age: Vec<(u64, Vec<u8>)> = entries
            .values
            .iter()
            .map(|(key, (seq, _))| (*seq, key.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _)| *seq);
        for (_, key) in by_age.into_iter().take(remove) {
            entries.values.remove(&key);
        }
        self.trimmed.fetch_add(remove as u64, Ordering::Relaxed);
        remove
    }
}

/// Connector keeping every shard in process memory.
#[derive(Debug)]
pub struct MemoryConnector {
    shards: HashMap<ShardId, Arc<MemoryShard>>,
    max_entries: usize,
}

impl MemoryConnector {
    pub fn new(max_entries: usize) -> Self {
        Self {
            shards: HashMap::new(),
            max_entries,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub async fn shard(&self, shard: &ShardId) -> Arc<MemoryShard> {
        self.shards
            .entry_async(shard.clone())
            .await
            .or_insert_with(|| Arc::new(MemoryShard::default()))
            .get()
            .clone()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait::async_trait]
impl ShardConnector for MemoryConnector {
    type Conn = Arc<MemoryShard>;

    async fn connect(&self, shard: &ShardId) -> Result<Self::Conn, ClusterError> {
        Ok(self.shard(shard).await)
    }

    async fn trim(
        &self,
        conn: &Self::Conn,
        count: usize,
    ) -> Result<(), ClusterError> {
        let removed = conn.trim_oldest(self.max_entries, count).await;
        if removed > 0 {
            debug!("trimmed {removed} records");
        }
        Ok(())
    }
}
