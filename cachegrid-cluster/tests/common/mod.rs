#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use cachegrid_cluster::{
    AsyncFailure, ClusterError, ClusterOptions, ErrorHandler, KeyHasher,
    Murmur3Hasher, ShardCluster, ShardConnector, ShardId,
};
use cachegrid_maglev::MaglevTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(ShardId),
    Write(ShardId, Vec<String>),
    Trim(ShardId, usize),
}

#[derive(Debug, Clone)]
pub struct RecordingConn {
    pub shard: ShardId,
    log: Arc<Mutex<Vec<Event>>>,
}

impl RecordingConn {
    pub fn record_write(&self, keys: Vec<String>) {
        self.log
            .lock()
            .unwrap()
            .push(Event::Write(self.shard.clone(), keys));
    }
}

/// Connector that only records what was asked of it.
#[derive(Debug, Default)]
pub struct RecordingConnector {
    log: Arc<Mutex<Vec<Event>>>,
    pub fail_trim: bool,
}

impl RecordingConnector {
    pub fn failing_trim() -> Self {
        Self {
            fail_trim: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn trims(&self) -> Vec<(ShardId, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Trim(shard, count) => Some((shard, count)),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(ShardId, Vec<String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(shard, keys) => Some((shard, keys)),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Connect(_)))
            .count()
    }
}

#[async_trait::async_trait]
impl ShardConnector for RecordingConnector {
    type Conn = RecordingConn;

    async fn connect(&self, shard: &ShardId) -> Result<Self::Conn, ClusterError> {
        self.log.lock().unwrap().push(Event::Connect(shard.clone()));
        Ok(RecordingConn {
            shard: shard.clone(),
            log: self.log.clone(),
        })
    }

    async fn trim(
        &self,
        conn: &Self::Conn,
        count: usize,
    ) -> Result<(), ClusterError> {
        self.log
            .lock()
            .unwrap()
            .push(Event::Trim(conn.shard.clone(), count));
        if self.fail_trim {
            return Err(ClusterError::storage("trim rejected"));
        }
        Ok(())
    }
}

/// Hasher with pinned values for chosen keys.
#[derive(Debug, Default)]
pub struct FixedHasher {
    pinned: HashMap<Vec<u8>, u32>,
}

impl FixedHasher {
    /// Pins each key to a slot owned by the given database.
    pub fn pinned_to(databases: &[&str], keys: &[(&str, &str)]) -> Self {
        let table = MaglevTable::build(databases).unwrap();
        let mut pinned = HashMap::new();
        for (key, database) in keys {
            let slot = (0..table.len())
                .find(|slot| table.slot_owner(*slot) == *database)
                .unwrap();
            pinned.insert(key.as_bytes().to_vec(), slot as u32);
        }
        Self { pinned }
    }
}

impl KeyHasher for FixedHasher {
    fn hash_key(&self, key: &[u8]) -> u32 {
        match self.pinned.get(key) {
            Some(hash) => *hash,
            None => Murmur3Hasher::default().hash_key(key),
        }
    }
}

pub fn failure_channel() -> (Arc<dyn ErrorHandler>, flume::Receiver<AsyncFailure>) {
    let (tx, rx) = flume::unbounded();
    let handler = move |failure: AsyncFailure| {
        let _ = tx.send(failure);
    };
    (Arc::new(handler), rx)
}

pub async fn recv<T>(rx: &flume::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv_async())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Three shards `s0..s2` on databases `db0..db2`.
pub fn three_shards() -> ClusterOptions {
    let mut options = ClusterOptions::sharded(&["s0", "s1", "s2"]);
    for (shard, database) in options.shard_databases.iter_mut() {
        *database = shard.replace('s', "db");
    }
    options
}

/// Three-shard cluster where `a..e` land on s0, s1, s0, s2, s1.
pub fn pinned_cluster<C: ShardConnector>(
    connector: C,
    async_writes: bool,
) -> (ShardCluster<C>, flume::Receiver<AsyncFailure>) {
    let hasher = FixedHasher::pinned_to(
        &["db0", "db1", "db2"],
        &[("a", "db0"), ("b", "db1"), ("c", "db0"), ("d", "db2"), ("e", "db1")],
    );
    let (handler, rx) = failure_channel();
    let cluster = ShardCluster::builder(
        three_shards().with_async_writes(async_writes),
        connector,
    )
    .hasher(Arc::new(hasher))
    .error_handler(handler)
    .build()
    .unwrap();
    (cluster, rx)
}

pub fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}
