use std::collections::BTreeMap;

use crate::{error::ClusterError, router::ShardRouter, shard::ShardId};

/// Splits `items` by owning shard, keeping input order inside each group.
///
/// Shards without items are left out. With a single shard the whole list is
/// returned as is and no key is hashed.
pub fn group_by_shard<T, K>(
    router: &ShardRouter,
    items: Vec<T>,
    key_of: K,
) -> Result<BTreeMap<ShardId, Vec<T>>, ClusterError>
where
    K: Fn(&T) -> &[u8],
{
    let registry = router.registry();
    if registry.is_single() {
        let mut groups = BTreeMap::new();
        if !items.is_empty() {
            groups.insert(registry.shards()[0].clone(), items);
        }
        return Ok(groups);
    }

    let mut groups: BTreeMap<ShardId, Vec<T>> = BTreeMap::new();
    for item in items {
        let shard = router.shard_for(key_of(&item))?;
        match groups.get_mut(shard) {
            Some(group) => group.push(item),
            None => {
                groups.insert(shard.clone(), vec![item]);
            }
        }
    }
    Ok(groups)
}
