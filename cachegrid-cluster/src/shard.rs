use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Backend identity used for the unsharded default connection.
pub const DEFAULT_BACKEND: &str = "default";

#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ShardId {
    /// The default connection, used when sharding is disabled.
    Default,
    Named(String),
}

impl ShardId {
    pub fn named<S: Into<String>>(name: S) -> Self {
        ShardId::Named(name.into())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ShardId::Default => None,
            ShardId::Named(name) => Some(name),
        }
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardId::Default => f.write_str("default"),
            ShardId::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardSelection {
    #[default]
    Unsharded,
    Shards(Vec<String>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterOptions {
    #[serde(default)]
    pub shards: ShardSelection,
    /// Shard name to the database (backend identity) it lives on.
    #[serde(default)]
    pub shard_databases: BTreeMap<String, String>,
    #[serde(default)]
    pub async_writes: bool,
}

impl ClusterOptions {
    pub fn unsharded() -> Self {
        Self::default()
    }

    /// Shards named after their databases.
    pub fn sharded<S: AsRef<str>>(shards: &[S]) -> Self {
        Self {
            shards: ShardSelection::Shards(
                shards.iter().map(|s| s.as_ref().to_owned()).collect(),
            ),
            shard_databases: shards
                .iter()
                .map(|s| (s.as_ref().to_owned(), s.as_ref().to_owned()))
                .collect(),
            async_writes: false,
        }
    }

    pub fn with_async_writes(mut self, async_writes: bool) -> Self {
        self.async_writes = async_writes;
        self
    }
}

/// Configured shards and the database each one maps to.
#[derive(Debug, Clone)]
pub struct ShardRegistry {
    shards: Vec<ShardId>,
    database_shards: BTreeMap<String, ShardId>,
}

impl ShardRegistry {
    pub fn new(options: &ClusterOptions) -> Result<Self, ClusterError> {
        let names = match &options.shards {
            ShardSelection::Unsharded => {
                return Ok(Self {
                    shards: vec![ShardId::Default],
                    database_shards: BTreeMap::from([(
                        DEFAULT_BACKEND.to_owned(),
                        ShardId::Default,
                    )]),
                });
            }
            ShardSelection::Shards(names) => names,
        };

        if names.is_empty() {
            return Err(ClusterError::configuration("no shards configured"));
        }

        let mut seen = BTreeSet::new();
        let mut shards = Vec::with_capacity(names.len());
        let mut database_shards = BTreeMap::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(ClusterError::configuration(format!(
                    "shard `{name}` configured twice"
                )));
            }
            let database = match options.shard_databases.get(name) {
                Some(database) if !database.is_empty() => database,
                _ => {
                    return Err(ClusterError::configuration(format!(
                        "shard `{name}` has no database"
                    )));
                }
            };
            let shard = ShardId::named(name.as_str());
            if let Some(other) =
                database_shards.insert(database.clone(), shard.clone())
            {
                return Err(ClusterError::configuration(format!(
                    "database `{database}` used by both `{other}` and `{shard}`"
                )));
            }
            shards.push(shard);
        }

        Ok(Self {
            shards,
            database_shards,
        })
    }

    /// Shards in configuration order.
    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    #[inline]
    pub fn is_single(&self) -> bool {
        self.shards.len() == 1
    }

    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.database_shards.keys().map(String::as_str)
    }

    #[inline]
    pub fn shard_for_database(&self, database: &str) -> Option<&ShardId> {
        self.database_shards.get(database)
    }
}
