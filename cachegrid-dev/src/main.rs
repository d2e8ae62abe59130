use std::{error::Error, time::Duration};

use cachegrid_cluster::{
    ClusterError, Config, ShardCluster, memory::MemoryConnector,
};
use envconfig::Envconfig;
use rand::{Rng, distr::Alphanumeric};
use tracing::{info, warn};

#[derive(Envconfig, Debug)]
struct DevConfig {
    #[envconfig(from = "CACHEGRID_DEV_ENTRIES", default = "1000")]
    entries: usize,
    #[envconfig(from = "CACHEGRID_DEV_KEY_LEN", default = "12")]
    key_len: usize,
}

#[derive(Debug, Clone)]
struct Record {
    key: String,
    value: Vec<u8>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_log();
    let conf = Config::init_from_env()?;
    let dev = DevConfig::init_from_env()?;
    info!("use {:?} {:?}", conf, dev);

    let cluster = ShardCluster::new(
        conf.cluster_options()?,
        MemoryConnector::new(conf.max_entries),
    )?;
    info!(
        "cluster with {} shard(s), async writes {}",
        cluster.shards().len(),
        cluster.async_writes()
    );

    let records = random_records(dev.entries, dev.key_len);
    cluster
        .writing_across_shards(
            records.clone(),
            |r| r.key.as_bytes(),
            true,
            |shard, list| async move {
                for record in list {
                    shard.write(record.key.into_bytes(), record.value).await;
                }
                Ok(())
            },
        )
        .await?;

    if cluster.async_writes() {
        wait_for_detached(&cluster, records.len()).await;
    }

    let keys: Vec<String> = records.into_iter().map(|r| r.key).collect();
    let found = cluster
        .reading_across_shards_flat(
            keys.clone(),
            |k| k.as_bytes(),
            |shard, keys| async move {
                let mut values = Vec::with_capacity(keys.len());
                for key in keys {
                    if let Some(value) = shard.read(key.as_bytes()).await {
                        values.push(value);
                    }
                }
                Ok::<_, ClusterError>(values)
            },
        )
        .await?;
    info!("read back {} of {} records", found.len(), keys.len());

    for shard in cluster.shards() {
        let stored = cluster.connector().shard(shard).await;
        info!(
            "shard {shard}: {} records, {} trimmed",
            stored.len().await,
            stored.trimmed()
        );
    }
    info!("dispatch stats {:?}", cluster.stats().snapshot());
    Ok(())
}

fn random_records(count: usize, key_len: usize) -> Vec<Record> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let key: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(key_len)
                .map(char::from)
                .collect();
            let value = rng.random::<u64>().to_le_bytes().to_vec();
            Record { key, value }
        })
        .collect()
}

async fn wait_for_detached(cluster: &ShardCluster<MemoryConnector>, expected: usize) {
    for _ in 0..100 {
        let mut stored = 0;
        for shard in cluster.shards() {
            stored += cluster.connector().shard(shard).await.len().await;
        }
        if stored >= expected.min(cluster.connector().max_entries()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    warn!("detached writes still pending");
}

fn init_log() {
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{
        EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("CACHEGRID_LOG")
                .from_env_lossy(),
        )
        .init();
}
