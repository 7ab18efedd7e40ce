use std::collections::BTreeMap;

/// Overlays whose layers were removed but whose sources stay registered so
/// re-enabling is instant.
///
/// Without a limit nothing is ever evicted. With a limit, eviction is LRU by
/// the tick at which the overlay went dormant, with a tie-break by key
/// ordering, so the outcome is deterministic.
#[derive(Debug)]
pub struct DormantSources<K: Ord> {
    limit: Option<usize>,
    tick: u64,
    entries: BTreeMap<K, u64>,
}

impl<K: Ord + Clone> DormantSources<K> {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            tick: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Mark `key` dormant and return the keys that must now be evicted.
    ///
    /// The key just marked is only evicted when the limit is zero.
    pub fn mark_dormant(&mut self, key: K) -> Vec<K> {
        self.tick += 1;
        self.entries.insert(key.clone(), self.tick);

        let Some(limit) = self.limit else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        while self.entries.len() > limit {
            let pick = |exclude: Option<&K>| {
                self.entries
                    .iter()
                    .filter(|(k, _)| exclude.map(|p| p != *k).unwrap_or(true))
                    .min_by(|(ka, ta), (kb, tb)| ta.cmp(tb).then_with(|| ka.cmp(kb)))
                    .map(|(k, _)| k.clone())
            };
            let Some(victim) = pick(Some(&key)).or_else(|| pick(None)) else {
                break;
            };
            self.entries.remove(&victim);
            evicted.push(victim);
        }
        evicted
    }

    /// The overlay is active again. Returns `true` if it was dormant.
    pub fn revive(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
