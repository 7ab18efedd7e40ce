use std::collections::BTreeMap;

use catalog::{OverlayKey, OverlayKind};

/// Source and layer ids one apply actually added to the map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachedArtifacts {
    pub sources: Vec<String>,
    pub layers: Vec<String>,
}

impl AttachedArtifacts {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.layers.is_empty()
    }

    fn absorb(&mut self, other: AttachedArtifacts) {
        for id in other.sources {
            if !self.sources.contains(&id) {
                self.sources.push(id);
            }
        }
        for id in other.layers {
            if !self.layers.contains(&id) {
                self.layers.push(id);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedOverlay {
    pub kind: OverlayKind,
    pub artifacts: AttachedArtifacts,
    /// `false` once the overlay was switched off but kept its sources.
    pub active: bool,
}

/// What the manager has put on the map, per overlay.
///
/// Only ids this side added are recorded; artifacts that were already on the
/// map belong to someone else and are never removed on their behalf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachedLayerSet {
    entries: BTreeMap<OverlayKey, AttachedOverlay>,
}

impl AttachedLayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge newly added artifacts into the overlay's entry and mark it active.
    pub fn record(&mut self, key: OverlayKey, kind: OverlayKind, artifacts: AttachedArtifacts) {
        let entry = self.entries.entry(key).or_insert_with(|| AttachedOverlay {
            kind,
            artifacts: AttachedArtifacts::default(),
            active: true,
        });
        entry.active = true;
        entry.artifacts.absorb(artifacts);
    }

    /// Remove every entry of `kind`.
    pub fn take_group(&mut self, kind: OverlayKind) -> Vec<(OverlayKey, AttachedOverlay)> {
        let keys: Vec<OverlayKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|e| (k, e)))
            .collect()
    }

    /// Take the overlay's layer ids and mark it inactive, keeping its sources.
    ///
    /// An entry left with no sources is dropped entirely.
    pub fn detach_layers(&mut self, key: &str) -> Vec<String> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Vec::new();
        };
        let layers = std::mem::take(&mut entry.artifacts.layers);
        entry.active = false;
        if entry.artifacts.sources.is_empty() {
            self.entries.remove(key);
        }
        layers
    }

    /// Put back an entry taken with [`remove`](Self::remove).
    pub fn restore(&mut self, key: OverlayKey, entry: AttachedOverlay) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<AttachedOverlay> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&AttachedOverlay> {
        self.entries.get(key)
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.active)
    }

    pub fn has_sources(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| !e.artifacts.sources.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OverlayKey, &AttachedOverlay)> {
        self.entries.iter()
    }

    pub fn active_keys(&self, kind: OverlayKind) -> Vec<&OverlayKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.kind == kind && e.active)
            .map(|(k, _)| k)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
