use std::collections::BTreeMap;

/// Counter and gauge names recorded by the overlay manager.
pub mod names {
    pub const FETCH_ISSUED: &str = "overlay.fetch.issued";
    pub const FETCH_CANCELLED: &str = "overlay.fetch.cancelled";
    pub const LOAD_DISCARDED: &str = "overlay.load.discarded";
    pub const LOAD_FAILED: &str = "overlay.load.failed";
    pub const OVERLAY_ATTACHED: &str = "overlay.attached";
    pub const SOURCE_ADDED: &str = "map.source.added";
    pub const SOURCE_REMOVED: &str = "map.source.removed";
    pub const SOURCE_EVICTED: &str = "map.source.evicted";
    pub const LAYER_ADDED: &str = "map.layer.added";
    pub const LAYER_REMOVED: &str = "map.layer.removed";

    pub const PENDING_LOADS: &str = "overlay.pending_loads";
    pub const DORMANT_OVERLAYS: &str = "overlay.dormant";
}

/// Deterministic counters and gauges.
///
/// Sorted maps keep snapshots stable so they can be diffed in tests and logs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    counters: BTreeMap<&'static str, u64>,
    gauges: BTreeMap<&'static str, i64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn incr(&mut self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&mut self, name: &'static str, by: u64) {
        *self.counters.entry(name).or_insert(0) += by;
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.get(name).copied()
    }

    pub fn set_gauge(&mut self, name: &'static str, value: i64) {
        self.gauges.insert(name, value);
    }

    /// Sorted `(name, value)` pairs, counters first then gauges.
    pub fn snapshot(&self) -> Vec<(&'static str, i64)> {
        self.counters
            .iter()
            .map(|(k, v)| (*k, *v as i64))
            .chain(self.gauges.iter().map(|(k, v)| (*k, *v)))
            .collect()
    }
}
