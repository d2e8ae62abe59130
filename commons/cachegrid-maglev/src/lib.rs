//! Maglev consistent hashing lookup table.
//!
//! The table maps `hash mod M` to a backend in O(1). Each backend walks its own
//! permutation of the slots and the backends take turns claiming their next
//! free preferred slot until every slot is owned, so slot ownership is spread
//! evenly and removing a backend mostly frees only the slots it held.

use md5::{Digest, Md5};
use tracing::debug;

/// Smallest table ever built. Prime.
pub const MIN_TABLE_SIZE: usize = 2053;

/// Minimum number of slots reserved per backend when sizing the table.
pub const SLOTS_PER_BACKEND: usize = 100;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MaglevError {
    #[error("No backends specified")]
    NoBackends,
    #[error("Table size {0} is not prime")]
    NotPrime(usize),
    #[error("Table size {size} is too small for {backends} backends")]
    TableTooSmall { size: usize, backends: usize },
}

#[derive(Debug, Clone)]
pub struct MaglevTable {
    backends: Vec<String>,
    lookup: Vec<u32>,
}

impl MaglevTable {
    /// Builds a table sized for `backends`.
    ///
    /// Duplicates are dropped and the remaining identities are sorted, so the
    /// result only depends on the set of backends.
    pub fn build<S: AsRef<str>>(backends: &[S]) -> Result<Self, MaglevError> {
        let backends = normalize(backends);
        let size = table_size_for(backends.len());
        Self::build_normalized(backends, size)
    }

    /// Builds a table with an explicit number of slots.
    pub fn build_with_size<S: AsRef<str>>(
        backends: &[S],
        size: usize,
    ) -> Result<Self, MaglevError> {
        let backends = normalize(backends);
        if !is_prime(size) {
            return Err(MaglevError::NotPrime(size));
        }
        if size < SLOTS_PER_BACKEND * backends.len() {
            return Err(MaglevError::TableTooSmall {
                size,
                backends: backends.len(),
            });
        }
        Self::build_normalized(backends, size)
    }

    fn build_normalized(
        backends: Vec<String>,
        size: usize,
    ) -> Result<Self, MaglevError> {
        if backends.is_empty() {
            return Err(MaglevError::NoBackends);
        }
        let mut preferences: Vec<Preferences> = backends
            .iter()
            .map(|backend| Preferences::new(backend, size))
            .collect();

        let mut lookup: Vec<Option<u32>> = vec![None; size];
        let mut filled = 0;
        'fill: loop {
            for (index, pref) in preferences.iter_mut().enumerate() {
                let slot = pref.next_free_slot(&lookup);
                lookup[slot] = Some(index as u32);
                filled += 1;
                if filled == size {
                    break 'fill;
                }
            }
        }

        debug!(
            "built maglev table: {} slots over {} backends",
            size,
            backends.len()
        );
        Ok(Self {
            backends,
            lookup: lookup.into_iter().flatten().collect(),
        })
    }

    /// Backend owning `hash`.
    #[inline]
    pub fn node(&self, hash: u32) -> &str {
        self.slot_owner(hash as usize % self.lookup.len())
    }

    #[inline]
    pub fn slot_owner(&self, slot: usize) -> &str {
        &self.backends[self.lookup[slot] as usize]
    }

    /// Number of slots in the table.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Backends in table order (sorted, without duplicates).
    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// Number of slots owned by each backend, in `backends()` order.
    pub fn slot_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.backends.len()];
        for owner in &self.lookup {
            counts[*owner as usize] += 1;
        }
        counts
    }
}

struct Preferences {
    offset: usize,
    skip: usize,
    size: usize,
    rank: usize,
}

impl Preferences {
    fn new(backend: &str, size: usize) -> Self {
        let offset = digest_u32(backend, b"offset") as usize % size;
        let skip = digest_u32(backend, b"skip") as usize % (size - 1) + 1;
        Self {
            offset,
            skip,
            size,
            rank: 0,
        }
    }

    fn next_free_slot(&mut self, lookup: &[Option<u32>]) -> usize {
        loop {
            // offset + rank * skip, kept below `size` at every step
            let slot = (self.offset
                + (self.rank % self.size) * self.skip % self.size)
                % self.size;
            self.rank += 1;
            if lookup[slot].is_none() {
                return slot;
            }
        }
    }
}

fn digest_u32(backend: &str, salt: &[u8]) -> u32 {
    let mut hasher = Md5::new();
    hasher.update(backend.as_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn normalize<S: AsRef<str>>(backends: &[S]) -> Vec<String> {
    let mut backends: Vec<String> =
        backends.iter().map(|b| b.as_ref().to_owned()).collect();
    backends.sort();
    backends.dedup();
    backends
}

/// Smallest prime able to hold `backends` at `SLOTS_PER_BACKEND` each.
pub fn table_size_for(backends: usize) -> usize {
    next_prime(MIN_TABLE_SIZE.max(SLOTS_PER_BACKEND * backends))
}

pub fn next_prime(from: usize) -> usize {
    let mut candidate = from.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

pub fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("db{i}")).collect()
    }

    #[test]
    fn test_table_size() {
        assert_eq!(table_size_for(1), MIN_TABLE_SIZE);
        assert_eq!(table_size_for(20), MIN_TABLE_SIZE);
        assert_eq!(table_size_for(21), 2111);
        assert!(is_prime(MIN_TABLE_SIZE));
        assert!(!is_prime(2055));
        assert_eq!(next_prime(2054), 2063);
    }

    #[test]
    fn test_empty_backends() {
        let empty: Vec<String> = vec![];
        assert_eq!(MaglevTable::build(&empty).unwrap_err(), MaglevError::NoBackends);
    }

    #[test]
    fn test_explicit_size_validation() {
        assert_eq!(
            MaglevTable::build_with_size(&backends(3), 1000).unwrap_err(),
            MaglevError::NotPrime(1000)
        );
        assert_eq!(
            MaglevTable::build_with_size(&backends(3), 293).unwrap_err(),
            MaglevError::TableTooSmall {
                size: 293,
                backends: 3
            }
        );
        let table = MaglevTable::build_with_size(&backends(3), 307).unwrap();
        assert_eq!(table.len(), 307);
    }

    #[test]
    fn test_every_slot_owned_and_balanced() {
        for n in [1, 2, 3, 7, 20] {
            let table = MaglevTable::build(&backends(n)).unwrap();
            let counts = table.slot_counts();
            assert_eq!(counts.iter().sum::<usize>(), table.len());
            let min = *counts.iter().min().unwrap();
            let max = *counts.iter().max().unwrap();
            assert!(min > 0);
            assert!(max - min <= 1, "unbalanced {counts:?}");
        }
    }

    #[test]
    fn test_first_backend_takes_remainder() {
        let table = MaglevTable::build(&["db2", "db0", "db1"]).unwrap();
        assert_eq!(table.backends(), ["db0", "db1", "db2"]);
        assert_eq!(table.slot_counts(), vec![685, 684, 684]);
    }

    #[test]
    fn test_order_and_duplicates_do_not_matter() {
        let a = MaglevTable::build(&["db0", "db1", "db2"]).unwrap();
        let b = MaglevTable::build(&["db2", "db1", "db0", "db1"]).unwrap();
        for slot in 0..a.len() {
            assert_eq!(a.slot_owner(slot), b.slot_owner(slot));
        }
    }

    #[test]
    fn test_node_wraps_hash() {
        let table = MaglevTable::build(&backends(4)).unwrap();
        let size = table.len() as u32;
        assert_eq!(table.node(5), table.node(5 + size));
        assert_eq!(table.node(u32::MAX), table.slot_owner((u32::MAX % size) as usize));
    }

    #[test]
    fn test_removal_disruption() {
        let all = backends(5);
        let before = MaglevTable::build(&all).unwrap();
        for removed in &all {
            let rest: Vec<&String> = all.iter().filter(|b| *b != removed).collect();
            let after = MaglevTable::build(&rest).unwrap();
            assert_eq!(before.len(), after.len());

            let mut moved = 0;
            for slot in 0..before.len() {
                let old = before.slot_owner(slot);
                let new = after.slot_owner(slot);
                assert_ne!(new, removed);
                if old != removed && old != new {
                    moved += 1;
                }
            }
            assert!(
                moved * 20 < before.len(),
                "removing {removed} moved {moved} foreign slots"
            );
        }
    }
}
