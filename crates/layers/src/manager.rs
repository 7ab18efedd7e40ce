//! Overlay reconciliation.
//!
//! The manager turns toggle transitions into map mutations. Transitions are
//! synchronous: anything needing the network comes back as a [`PendingLoad`]
//! that the caller fetches and hands to [`OverlayManager::complete`]. A
//! completion is applied only if no later transition touched the same slot.

use std::collections::{BTreeMap, BTreeSet};

use catalog::{
    BuiltinOverlay, OverlayCatalog, OverlayDefinition, OverlayKey, OverlayKind, OverlaySource,
};
use runtime::Metrics;
use runtime::metrics::names;
use streaming::{
    DormantSources, FetchResult, FetchedDocument, Generation, InflightLoads, LoadTicket,
    StyleDocument,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attached::{AttachedArtifacts, AttachedLayerSet};
use crate::builtin::{builtin_document, feature_collection_document};
use crate::desired::{DesiredState, lookup};
use crate::error::OverlayError;
use crate::registry::MapArtifactRegistry;
use crate::symbology::overlay_layer;

/// Loads that supersede each other share a slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadSlot {
    Exclusive,
    Independent(OverlayKey),
}

impl LoadSlot {
    fn for_kind(kind: OverlayKind, key: &OverlayKey) -> Self {
        match kind {
            OverlayKind::Exclusive => LoadSlot::Exclusive,
            OverlayKind::Independent => LoadSlot::Independent(key.clone()),
        }
    }
}

/// A fetch the caller has to perform.
#[derive(Debug, Clone)]
pub struct PendingLoad {
    key: OverlayKey,
    url: String,
    ticket: LoadTicket<LoadSlot>,
}

impl PendingLoad {
    pub fn key(&self) -> &OverlayKey {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn generation(&self) -> Generation {
        self.ticket.generation()
    }

    /// Cancelled as soon as a later transition supersedes this load.
    pub fn token(&self) -> CancellationToken {
        self.ticket.token().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.ticket.is_cancelled()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Attached {
        key: OverlayKey,
        sources: usize,
        layers: usize,
    },
    /// Superseded or cancelled; the map was not touched.
    Discarded { key: OverlayKey },
    Failed {
        key: OverlayKey,
        error: OverlayError,
    },
}

impl LoadOutcome {
    pub fn key(&self) -> &OverlayKey {
        match self {
            LoadOutcome::Attached { key, .. }
            | LoadOutcome::Discarded { key }
            | LoadOutcome::Failed { key, .. } => key,
        }
    }
}

/// Everything one [`OverlayManager::reconcile`] call produced.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub pending: Vec<PendingLoad>,
    pub failures: Vec<OverlayError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerConfig {
    /// How many switched-off overlays may keep their sources registered.
    /// `None` keeps them all.
    pub dormant_source_limit: Option<usize>,
}

pub struct OverlayManager {
    catalog: OverlayCatalog,
    attached: AttachedLayerSet,
    loads: InflightLoads<LoadSlot>,
    dormant: DormantSources<OverlayKey>,
    /// Parsed documents of remote independent overlays, reused on re-enable.
    documents: BTreeMap<OverlayKey, StyleDocument>,
    exclusive_target: OverlayKey,
    independent_targets: BTreeSet<OverlayKey>,
    metrics: Metrics,
}

impl OverlayManager {
    pub fn new(catalog: OverlayCatalog, config: ManagerConfig) -> Self {
        Self {
            catalog,
            attached: AttachedLayerSet::new(),
            loads: InflightLoads::new(),
            dormant: DormantSources::new(config.dormant_source_limit),
            documents: BTreeMap::new(),
            exclusive_target: OverlayKey::none(),
            independent_targets: BTreeSet::new(),
            metrics: Metrics::new(),
        }
    }

    pub fn catalog(&self) -> &OverlayCatalog {
        &self.catalog
    }

    pub fn attached(&self) -> &AttachedLayerSet {
        &self.attached
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn exclusive_target(&self) -> &OverlayKey {
        &self.exclusive_target
    }

    pub fn pending_loads(&self) -> usize {
        self.loads.pending_len()
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.catalog.get(key).is_some_and(|def| {
            def.kind == OverlayKind::Independent || self.exclusive_target == def.key
        }) && self.loads.is_pending(&self.slot_of(key))
    }

    fn slot_of(&self, key: &str) -> LoadSlot {
        match self.catalog.get(key) {
            Some(def) => LoadSlot::for_kind(def.kind, &def.key),
            None => LoadSlot::Independent(OverlayKey::new(key)),
        }
    }

    pub fn is_dormant(&self, key: &OverlayKey) -> bool {
        self.dormant.contains(key)
    }

    /// Key of the independent overlay that provides terrain shading.
    pub fn terrain_key(&self) -> Option<&OverlayKey> {
        self.catalog
            .independent()
            .find(|d| {
                matches!(
                    &d.source,
                    OverlaySource::Builtin {
                        template: BuiltinOverlay::Terrain { .. }
                    }
                )
            })
            .map(|d| &d.key)
    }

    fn update_gauges(&mut self) {
        self.metrics
            .set_gauge(names::PENDING_LOADS, self.loads.pending_len() as i64);
        self.metrics
            .set_gauge(names::DORMANT_OVERLAYS, self.dormant.len() as i64);
    }

    fn supersede(&mut self, slot: &LoadSlot) {
        if self.loads.supersede(slot) {
            debug!(?slot, "cancelled in-flight load");
            self.metrics.incr(names::FETCH_CANCELLED);
        }
    }

    fn begin_load(&mut self, def: &OverlayDefinition, url: &str) -> PendingLoad {
        let slot = LoadSlot::for_kind(def.kind, &def.key);
        let ticket = self.loads.begin(slot);
        self.metrics.incr(names::FETCH_ISSUED);
        info!(overlay = %def.key, url, generation = %ticket.generation(), "fetching overlay");
        PendingLoad {
            key: def.key.clone(),
            url: url.to_string(),
            ticket,
        }
    }

    /// Switch the exclusive group to `key`.
    ///
    /// Cancels any exclusive load in flight and removes everything the
    /// previous selection attached before returning. Selecting the same key
    /// again re-applies it.
    pub fn reconcile_exclusive<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        key: &str,
    ) -> Result<Option<PendingLoad>, OverlayError> {
        let def = lookup(&self.catalog, key, OverlayKind::Exclusive)?.clone();

        self.supersede(&LoadSlot::Exclusive);
        self.detach_exclusive(map);
        self.exclusive_target = def.key.clone();

        let pending = match &def.source {
            OverlaySource::Empty => None,
            OverlaySource::Flag => {
                self.attached
                    .record(def.key.clone(), def.kind, AttachedArtifacts::default());
                None
            }
            OverlaySource::Builtin { template } => {
                let doc = builtin_document(&def.key, template);
                self.attach(map, &def, &doc)?;
                None
            }
            OverlaySource::Remote { url } => Some(self.begin_load(&def, url)),
        };
        self.update_gauges();
        Ok(pending)
    }

    /// Switch one independent overlay on or off.
    ///
    /// Off removes only that overlay's layers; its sources stay registered
    /// until evicted. On re-adds whatever is missing.
    pub fn reconcile_independent<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        key: &str,
        active: bool,
    ) -> Result<Option<PendingLoad>, OverlayError> {
        let def = lookup(&self.catalog, key, OverlayKind::Independent)?.clone();
        let slot = LoadSlot::Independent(def.key.clone());
        self.supersede(&slot);

        let result = if active {
            self.activate_independent(map, &def)
        } else {
            self.deactivate_independent(map, &def);
            Ok(None)
        };
        self.update_gauges();
        result
    }

    fn activate_independent<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        def: &OverlayDefinition,
    ) -> Result<Option<PendingLoad>, OverlayError> {
        let pending = match &def.source {
            OverlaySource::Empty => None,
            OverlaySource::Flag => {
                self.attached
                    .record(def.key.clone(), def.kind, AttachedArtifacts::default());
                None
            }
            OverlaySource::Builtin { template } => {
                let doc = builtin_document(&def.key, template);
                self.attach(map, def, &doc)?;
                None
            }
            OverlaySource::Remote { url } => match self.documents.get(&def.key).cloned() {
                Some(doc) => {
                    debug!(overlay = %def.key, "re-attaching cached document");
                    self.attach(map, def, &doc)?;
                    None
                }
                None => Some(self.begin_load(def, url)),
            },
        };
        // Not reached when the map rejected the overlay.
        self.independent_targets.insert(def.key.clone());
        self.dormant.revive(&def.key);
        Ok(pending)
    }

    fn deactivate_independent<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        def: &OverlayDefinition,
    ) {
        self.independent_targets.remove(&def.key);

        for layer in self.attached.detach_layers(def.key.as_str()) {
            self.remove_layer(map, &def.key, &layer);
        }

        if self.attached.has_sources(def.key.as_str()) {
            for victim in self.dormant.mark_dormant(def.key.clone()) {
                self.evict(map, &victim);
            }
        }
        info!(overlay = %def.key, "overlay switched off");
    }

    /// Remove a dormant overlay's sources for good.
    ///
    /// Sources the map refuses to drop stay recorded under the overlay.
    fn evict<M: MapArtifactRegistry>(&mut self, map: &mut M, key: &OverlayKey) {
        self.documents.remove(key);
        let Some(mut entry) = self.attached.remove(key.as_str()) else {
            return;
        };
        for source in std::mem::take(&mut entry.artifacts.sources) {
            if self.remove_source(map, key, &source) {
                self.metrics.incr(names::SOURCE_EVICTED);
            } else {
                entry.artifacts.sources.push(source);
            }
        }
        if entry.artifacts.sources.is_empty() {
            debug!(overlay = %key, "evicted dormant sources");
        } else {
            warn!(
                overlay = %key,
                kept = entry.artifacts.sources.len(),
                "dormant sources still in use"
            );
            self.attached.restore(key.clone(), entry);
        }
    }

    fn detach_exclusive<M: MapArtifactRegistry>(&mut self, map: &mut M) {
        for (key, entry) in self.attached.take_group(OverlayKind::Exclusive) {
            for layer in &entry.artifacts.layers {
                self.remove_layer(map, &key, layer);
            }
            for source in &entry.artifacts.sources {
                self.remove_source(map, &key, source);
            }
            info!(overlay = %key, "exclusive overlay detached");
        }
    }

    fn remove_layer<M: MapArtifactRegistry>(&mut self, map: &mut M, key: &OverlayKey, id: &str) {
        match map.remove_layer(id) {
            Ok(()) => self.metrics.incr(names::LAYER_REMOVED),
            Err(err) => warn!(overlay = %key, layer = id, %err, "layer removal failed"),
        }
    }

    fn remove_source<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        key: &OverlayKey,
        id: &str,
    ) -> bool {
        match map.remove_source(id) {
            Ok(()) => {
                self.metrics.incr(names::SOURCE_REMOVED);
                true
            }
            Err(err) => {
                warn!(overlay = %key, source = id, %err, "source removal failed");
                false
            }
        }
    }

    /// Add the document's missing sources and layers.
    ///
    /// Sources and layers already present are skipped. New layers go below the
    /// first symbol layer found before this apply started. If the map rejects
    /// anything, what this apply added is removed again.
    fn attach<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        def: &OverlayDefinition,
        doc: &StyleDocument,
    ) -> Result<AttachedArtifacts, OverlayError> {
        let before = map.first_symbol_layer_id();
        let mut added = AttachedArtifacts::default();

        for (id, config) in &doc.sources {
            if map.has_source(id) {
                continue;
            }
            if let Err(source) = map.add_source(id, config) {
                self.rollback(map, &def.key, &added);
                return Err(OverlayError::Registry {
                    key: def.key.to_string(),
                    source,
                });
            }
            self.metrics.incr(names::SOURCE_ADDED);
            added.sources.push(id.clone());
        }

        for layer in &doc.layers {
            let Some(layer) = overlay_layer(layer) else {
                debug!(overlay = %def.key, layer = %layer.id, "skipping background layer");
                continue;
            };
            if map.has_layer(&layer.id) {
                continue;
            }
            if let Err(source) = map.add_layer(&layer, before.as_deref()) {
                self.rollback(map, &def.key, &added);
                return Err(OverlayError::Registry {
                    key: def.key.to_string(),
                    source,
                });
            }
            self.metrics.incr(names::LAYER_ADDED);
            added.layers.push(layer.id);
        }

        self.attached
            .record(def.key.clone(), def.kind, added.clone());
        self.metrics.incr(names::OVERLAY_ATTACHED);
        info!(
            overlay = %def.key,
            sources = added.sources.len(),
            layers = added.layers.len(),
            "overlay attached"
        );
        Ok(added)
    }

    fn rollback<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        key: &OverlayKey,
        added: &AttachedArtifacts,
    ) {
        warn!(overlay = %key, "map rejected overlay, rolling back");
        for layer in added.layers.iter().rev() {
            self.remove_layer(map, key, layer);
        }
        for source in added.sources.iter().rev() {
            self.remove_source(map, key, source);
        }
    }

    /// Apply the result of a [`PendingLoad`].
    ///
    /// Stale or cancelled results are dropped without touching the map. A
    /// failure leaves every other overlay as it was; toggling again retries.
    pub fn complete<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        load: PendingLoad,
        result: FetchResult,
    ) -> LoadOutcome {
        let PendingLoad { key, url, ticket } = load;

        let current = self.loads.is_current(&ticket);
        let outcome = match result {
            _ if !current => {
                self.loads.release(&ticket);
                debug!(overlay = %key, generation = %ticket.generation(), "discarding stale load");
                self.metrics.incr(names::LOAD_DISCARDED);
                LoadOutcome::Discarded { key }
            }
            Err(source) => {
                self.loads.settle(&ticket);
                self.metrics.incr(names::LOAD_FAILED);
                warn!(overlay = %key, url = %url, err = %source, "overlay fetch failed");
                LoadOutcome::Failed {
                    key: key.clone(),
                    error: OverlayError::Fetch {
                        key: key.to_string(),
                        source,
                    },
                }
            }
            Ok(bytes) => {
                self.loads.settle(&ticket);
                self.apply_fetched(map, key, &bytes)
            }
        };
        self.update_gauges();
        outcome
    }

    fn apply_fetched<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        key: OverlayKey,
        bytes: &[u8],
    ) -> LoadOutcome {
        let doc = match FetchedDocument::parse(bytes) {
            Ok(FetchedDocument::Style(doc)) => doc,
            Ok(FetchedDocument::FeatureCollection(collection)) => {
                feature_collection_document(&key, collection)
            }
            Err(source) => {
                self.metrics.incr(names::LOAD_FAILED);
                warn!(overlay = %key, err = %source, "overlay document is malformed");
                return LoadOutcome::Failed {
                    key: key.clone(),
                    error: OverlayError::MalformedDocument {
                        key: key.to_string(),
                        source,
                    },
                };
            }
        };

        let Some(def) = self.catalog.get(key.as_str()).cloned() else {
            return LoadOutcome::Failed {
                error: OverlayError::UnknownOverlay(key.to_string()),
                key,
            };
        };
        if def.kind == OverlayKind::Independent {
            self.documents.insert(key.clone(), doc.clone());
        }

        match self.attach(map, &def, &doc) {
            Ok(added) => LoadOutcome::Attached {
                key,
                sources: added.sources.len(),
                layers: added.layers.len(),
            },
            Err(error) => {
                self.metrics.incr(names::LOAD_FAILED);
                LoadOutcome::Failed { key, error }
            }
        }
    }

    /// Bring the map in line with `desired`, diffing against the last
    /// transitions this manager applied.
    pub fn reconcile<M: MapArtifactRegistry>(
        &mut self,
        map: &mut M,
        desired: &DesiredState,
    ) -> Reconciliation {
        let mut out = Reconciliation::default();
        let mut collect = |res: Result<Option<PendingLoad>, OverlayError>| match res {
            Ok(pending) => out.pending.extend(pending),
            Err(err) => out.failures.push(err),
        };

        if desired.exclusive_selection() != &self.exclusive_target {
            let key = desired.exclusive_selection().as_str();
            collect(self.reconcile_exclusive(map, key));
        }

        let off: Vec<OverlayKey> = self
            .independent_targets
            .difference(desired.independent_selections())
            .cloned()
            .collect();
        for key in off {
            collect(self.reconcile_independent(map, key.as_str(), false));
        }

        let on: Vec<OverlayKey> = desired
            .independent_selections()
            .difference(&self.independent_targets)
            .cloned()
            .collect();
        for key in on {
            collect(self.reconcile_independent(map, key.as_str(), true));
        }

        out
    }

    /// Remove every overlay artifact this manager added, then forget all
    /// state as [`teardown`](Self::teardown) does. The map stays usable.
    ///
    /// Layers of every overlay go before any source, since a layer may draw
    /// from another overlay's source.
    pub fn remove_all<M: MapArtifactRegistry>(&mut self, map: &mut M) {
        let mut entries = self.attached.take_group(OverlayKind::Exclusive);
        entries.extend(self.attached.take_group(OverlayKind::Independent));
        for (key, entry) in &entries {
            for layer in entry.artifacts.layers.iter().rev() {
                self.remove_layer(map, key, layer);
            }
        }
        for (key, entry) in &entries {
            for source in &entry.artifacts.sources {
                self.remove_source(map, key, source);
            }
        }
        info!(overlays = entries.len(), "removed all overlays");
        self.teardown();
    }

    /// Forget everything and cancel every load. The map is assumed gone.
    pub fn teardown(&mut self) {
        let cancelled = self.loads.cancel_all();
        self.metrics.add(names::FETCH_CANCELLED, cancelled as u64);
        self.attached.clear();
        self.dormant.clear();
        self.documents.clear();
        self.exclusive_target = OverlayKey::none();
        self.independent_targets.clear();
        self.update_gauges();
        info!(cancelled, "overlay manager torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadOutcome, ManagerConfig, OverlayManager};
    use crate::desired::DesiredState;
    use crate::error::OverlayError;
    use crate::registry::{InMemoryMap, MapArtifactRegistry, RegistryError};
    use crate::terrain::{ELEVATION_SOURCE_ID, HILLSHADE_LAYER_ID, TerrainShading};
    use bytes::Bytes;
    use catalog::{
        BuiltinOverlay, DataBand, OverlayCatalog, OverlayDefinition, OverlayKey, OverlaySource,
    };
    use pretty_assertions::assert_eq;
    use runtime::metrics::names;
    use serde_json::{Value, json};
    use streaming::{FetchError, LayerType, StyleDocument, StyleLayer};

    fn test_catalog() -> OverlayCatalog {
        let terrain = TerrainShading::default();
        OverlayCatalog::new(vec![
            OverlayDefinition::none(),
            OverlayDefinition::exclusive_remote("landcoverA", "/a.json"),
            OverlayDefinition::exclusive_remote("landcoverB", "/b.json"),
            OverlayDefinition::independent(
                "shelters",
                OverlaySource::Remote {
                    url: "/shelters.json".to_string(),
                },
            ),
            OverlayDefinition::independent(
                "urban",
                OverlaySource::Builtin {
                    template: BuiltinOverlay::ZoomBanded {
                        bands: vec![
                            DataBand {
                                id: "coarse".to_string(),
                                data_url: "/urban-areas.json".to_string(),
                                minzoom: None,
                                maxzoom: Some(8.0),
                            },
                            DataBand {
                                id: "detail".to_string(),
                                data_url: "/urban-overlay.json".to_string(),
                                minzoom: Some(8.0),
                                maxzoom: None,
                            },
                        ],
                        fill_color: "#e57373".to_string(),
                        outline_color: "#c62828".to_string(),
                    },
                },
            ),
            OverlayDefinition::independent(
                "terrain",
                OverlaySource::Builtin {
                    template: BuiltinOverlay::Terrain {
                        tiles_url: terrain.tiles_url,
                        encoding: terrain.encoding,
                        tile_size: terrain.tile_size,
                    },
                },
            ),
            OverlayDefinition::independent("tileBoundaries", OverlaySource::Flag),
        ])
        .unwrap()
    }

    fn base_map() -> InMemoryMap {
        let style = StyleDocument::new()
            .with_source("openmaptiles", json!({ "type": "vector" }))
            .with_layer(StyleLayer::new("background", LayerType::Background))
            .with_layer(StyleLayer::new("water", LayerType::Fill).with_source("openmaptiles"))
            .with_layer(
                StyleLayer::new("place-label", LayerType::Symbol).with_source("openmaptiles"),
            );
        InMemoryMap::from_style(&style).unwrap()
    }

    /// Map that refuses every new layer while `refuse_layers` is set.
    struct RefusingMap {
        inner: InMemoryMap,
        refuse_layers: bool,
    }

    impl MapArtifactRegistry for RefusingMap {
        fn has_source(&self, id: &str) -> bool {
            self.inner.has_source(id)
        }

        fn add_source(&mut self, id: &str, config: &Value) -> Result<(), RegistryError> {
            self.inner.add_source(id, config)
        }

        fn remove_source(&mut self, id: &str) -> Result<(), RegistryError> {
            self.inner.remove_source(id)
        }

        fn has_layer(&self, id: &str) -> bool {
            self.inner.has_layer(id)
        }

        fn add_layer(
            &mut self,
            layer: &StyleLayer,
            before: Option<&str>,
        ) -> Result<(), RegistryError> {
            if self.refuse_layers {
                return Err(RegistryError::DuplicateLayer(layer.id.clone()));
            }
            self.inner.add_layer(layer, before)
        }

        fn remove_layer(&mut self, id: &str) -> Result<(), RegistryError> {
            self.inner.remove_layer(id)
        }

        fn layer_order(&self) -> Vec<(String, LayerType)> {
            self.inner.layer_order()
        }
    }

    fn manager() -> OverlayManager {
        OverlayManager::new(test_catalog(), ManagerConfig::default())
    }

    fn body(value: Value) -> Result<Bytes, FetchError> {
        Ok(Bytes::from(value.to_string()))
    }

    fn style(source: &str, layer: &str) -> Result<Bytes, FetchError> {
        body(json!({
            "version": 8,
            "sources": { source: { "type": "geojson", "data": "/data.json" } },
            "layers": [
                { "id": format!("{layer}-bg"), "type": "background" },
                {
                    "id": layer,
                    "type": "fill",
                    "source": source,
                    "paint": { "fill-color": "#88cc88", "fill-opacity": 0.3 }
                }
            ]
        }))
    }

    fn key(k: &str) -> OverlayKey {
        OverlayKey::new(k)
    }

    #[test]
    fn exclusive_load_attaches_below_labels() {
        let mut map = base_map();
        let mut mgr = manager();

        let load = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        assert_eq!(load.url(), "/a.json");
        assert!(mgr.is_loading("landcoverA"));

        let outcome = mgr.complete(&mut map, load, style("s1", "l1"));
        assert_eq!(
            outcome,
            LoadOutcome::Attached {
                key: key("landcoverA"),
                sources: 1,
                layers: 1,
            }
        );
        assert_eq!(
            map.layer_ids(),
            vec!["background", "water", "l1", "place-label"]
        );
        assert_eq!(map.layer("l1").unwrap().paint["fill-opacity"], json!(0.8));
        assert!(!map.has_layer("l1-bg"));
        assert!(!mgr.is_loading("landcoverA"));
    }

    #[test]
    fn superseded_exclusive_load_is_discarded() {
        let mut map = base_map();
        let mut mgr = manager();

        let a = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        let b = mgr
            .reconcile_exclusive(&mut map, "landcoverB")
            .unwrap()
            .unwrap();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());

        assert_eq!(
            mgr.complete(&mut map, a, style("s1", "l1")),
            LoadOutcome::Discarded {
                key: key("landcoverA")
            }
        );
        assert!(!map.has_source("s1"));

        assert!(matches!(
            mgr.complete(&mut map, b, style("s2", "l2")),
            LoadOutcome::Attached { .. }
        ));
        assert!(map.has_layer("l2"));
        assert_eq!(mgr.metrics().counter(names::LOAD_DISCARDED), 1);
        assert_eq!(mgr.metrics().counter(names::FETCH_CANCELLED), 1);
    }

    #[test]
    fn switching_exclusive_removes_previous_artifacts() {
        let mut map = base_map();
        let mut mgr = manager();

        let a = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        mgr.complete(&mut map, a, style("s1", "l1"));

        assert!(mgr.reconcile_exclusive(&mut map, "none").unwrap().is_none());
        assert!(!map.has_source("s1"));
        assert!(!map.has_layer("l1"));
        assert!(mgr.attached().is_empty());
        assert_eq!(map.layer_ids(), vec!["background", "water", "place-label"]);
    }

    #[test]
    fn failed_load_leaves_other_overlays_and_can_be_retried() {
        let mut map = base_map();
        let mut mgr = manager();
        mgr.reconcile_independent(&mut map, "urban", true).unwrap();
        let before = map.layer_ids().len();

        let load = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        let failure = FetchError::Status {
            url: "/a.json".to_string(),
            status: 404,
        };
        let outcome = mgr.complete(&mut map, load, Err(failure.clone()));
        assert_eq!(
            outcome,
            LoadOutcome::Failed {
                key: key("landcoverA"),
                error: OverlayError::Fetch {
                    key: "landcoverA".to_string(),
                    source: failure,
                },
            }
        );
        assert_eq!(map.layer_ids().len(), before);
        assert!(mgr.attached().get("landcoverA").is_none());
        assert!(mgr.attached().is_active("urban"));

        let retry = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        assert!(matches!(
            mgr.complete(&mut map, retry, style("s1", "l1")),
            LoadOutcome::Attached { .. }
        ));
    }

    #[test]
    fn malformed_document_changes_nothing() {
        let mut map = base_map();
        let mut mgr = manager();
        let before = map.layer_ids().len();

        let load = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        let outcome = mgr.complete(&mut map, load, body(json!({ "layers": [] })));
        assert!(matches!(
            outcome,
            LoadOutcome::Failed {
                error: OverlayError::MalformedDocument { .. },
                ..
            }
        ));
        assert_eq!(map.layer_ids().len(), before);
        assert!(mgr.attached().is_empty());
    }

    #[test]
    fn rejected_apply_is_rolled_back() {
        let mut map = base_map();
        let mut mgr = manager();

        let load = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        let doc = body(json!({
            "sources": { "s1": { "type": "geojson", "data": "/d.json" } },
            "layers": [
                { "id": "l1", "type": "fill", "source": "s1" },
                { "id": "l2", "type": "fill", "source": "missing" }
            ]
        }));
        let outcome = mgr.complete(&mut map, load, doc);

        assert!(matches!(
            outcome,
            LoadOutcome::Failed {
                error: OverlayError::Registry { .. },
                ..
            }
        ));
        assert!(!map.has_source("s1"));
        assert!(!map.has_layer("l1"));
        assert!(mgr.attached().is_empty());
    }

    #[test]
    fn insertion_point_is_fixed_for_one_apply() {
        let mut map = base_map();
        let mut mgr = manager();

        let load = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        let doc = body(json!({
            "sources": { "s1": { "type": "geojson", "data": "/d.json" } },
            "layers": [
                { "id": "l1", "type": "fill", "source": "s1" },
                { "id": "lbl", "type": "symbol", "source": "s1" },
                { "id": "l2", "type": "line", "source": "s1" }
            ]
        }));
        mgr.complete(&mut map, load, doc);

        assert_eq!(
            map.layer_ids(),
            vec!["background", "water", "l1", "lbl", "l2", "place-label"]
        );
    }

    #[test]
    fn independent_off_keeps_sources_and_on_reuses_them() {
        let mut map = base_map();
        let mut mgr = manager();

        assert!(
            mgr.reconcile_independent(&mut map, "urban", true)
                .unwrap()
                .is_none()
        );
        assert!(map.has_layer("urban-coarse-fill"));
        assert!(map.has_layer("urban-detail-outline"));

        mgr.reconcile_independent(&mut map, "urban", false).unwrap();
        assert!(!map.has_layer("urban-coarse-fill"));
        assert!(map.has_source("urban-coarse"));
        assert!(map.has_source("urban-detail"));
        assert!(mgr.is_dormant(&key("urban")));

        mgr.reconcile_independent(&mut map, "urban", true).unwrap();
        assert!(map.has_layer("urban-coarse-fill"));
        assert_eq!(map.source_add_calls("urban-coarse"), 1);
        assert_eq!(map.source_add_calls("urban-detail"), 1);
        assert!(!mgr.is_dormant(&key("urban")));
    }

    #[test]
    fn independent_off_touches_only_its_own_layers() {
        let mut map = base_map();
        let mut mgr = manager();
        mgr.reconcile_independent(&mut map, "urban", true).unwrap();
        mgr.reconcile_independent(&mut map, "terrain", true).unwrap();
        let a = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        mgr.complete(&mut map, a, style("s1", "l1"));

        mgr.reconcile_independent(&mut map, "urban", false).unwrap();
        assert!(map.has_layer(HILLSHADE_LAYER_ID));
        assert!(map.has_layer("l1"));
        assert!(!map.has_layer("urban-detail-fill"));
    }

    #[test]
    fn remote_independent_document_is_reused() {
        let mut map = base_map();
        let mut mgr = manager();

        let load = mgr
            .reconcile_independent(&mut map, "shelters", true)
            .unwrap()
            .unwrap();
        let collection = body(json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": {}, "geometry": { "type": "Point", "coordinates": [139.7, 35.7] } }
            ]
        }));
        assert_eq!(
            mgr.complete(&mut map, load, collection),
            LoadOutcome::Attached {
                key: key("shelters"),
                sources: 1,
                layers: 1,
            }
        );

        mgr.reconcile_independent(&mut map, "shelters", false).unwrap();
        assert!(!map.has_layer("shelters-circle"));

        assert!(
            mgr.reconcile_independent(&mut map, "shelters", true)
                .unwrap()
                .is_none()
        );
        assert!(map.has_layer("shelters-circle"));
        assert_eq!(map.source_add_calls("shelters"), 1);
    }

    #[test]
    fn independent_toggled_off_before_load_completes() {
        let mut map = base_map();
        let mut mgr = manager();

        let load = mgr
            .reconcile_independent(&mut map, "shelters", true)
            .unwrap()
            .unwrap();
        mgr.reconcile_independent(&mut map, "shelters", false).unwrap();
        assert!(load.is_cancelled());

        assert_eq!(
            mgr.complete(&mut map, load, style("shelters", "shelters-fill")),
            LoadOutcome::Discarded {
                key: key("shelters")
            }
        );
        assert!(!map.has_source("shelters"));
    }

    #[test]
    fn terrain_off_keeps_elevation_source() {
        let mut map = base_map();
        let mut mgr = manager();
        assert_eq!(mgr.terrain_key(), Some(&key("terrain")));

        mgr.reconcile_independent(&mut map, "terrain", true).unwrap();
        assert!(map.has_source(ELEVATION_SOURCE_ID));
        assert!(map.has_layer(HILLSHADE_LAYER_ID));

        mgr.reconcile_independent(&mut map, "terrain", false).unwrap();
        assert!(map.has_source(ELEVATION_SOURCE_ID));
        assert!(!map.has_layer(HILLSHADE_LAYER_ID));

        mgr.reconcile_independent(&mut map, "terrain", true).unwrap();
        assert_eq!(map.source_add_calls(ELEVATION_SOURCE_ID), 1);
    }

    #[test]
    fn dormant_limit_evicts_oldest_sources() {
        let mut map = base_map();
        let mut mgr = OverlayManager::new(
            test_catalog(),
            ManagerConfig {
                dormant_source_limit: Some(1),
            },
        );

        mgr.reconcile_independent(&mut map, "urban", true).unwrap();
        mgr.reconcile_independent(&mut map, "urban", false).unwrap();
        mgr.reconcile_independent(&mut map, "terrain", true).unwrap();
        mgr.reconcile_independent(&mut map, "terrain", false).unwrap();

        assert!(!map.has_source("urban-coarse"));
        assert!(!map.has_source("urban-detail"));
        assert!(map.has_source(ELEVATION_SOURCE_ID));
        assert!(mgr.attached().get("urban").is_none());
        assert_eq!(mgr.metrics().counter(names::SOURCE_EVICTED), 2);

        mgr.reconcile_independent(&mut map, "urban", true).unwrap();
        assert_eq!(map.source_add_calls("urban-coarse"), 2);
    }

    #[test]
    fn eviction_keeps_sources_still_in_use() {
        let mut map = base_map();
        let mut mgr = OverlayManager::new(
            test_catalog(),
            ManagerConfig {
                dormant_source_limit: Some(0),
            },
        );
        mgr.reconcile_independent(&mut map, "urban", true).unwrap();

        // shelters draws from a source urban registered.
        let load = mgr
            .reconcile_independent(&mut map, "shelters", true)
            .unwrap()
            .unwrap();
        let doc = body(json!({
            "sources": { "urban-coarse": { "type": "geojson", "data": "/urban-areas.json" } },
            "layers": [ { "id": "shelters-pts", "type": "circle", "source": "urban-coarse" } ]
        }));
        assert_eq!(
            mgr.complete(&mut map, load, doc),
            LoadOutcome::Attached {
                key: key("shelters"),
                sources: 0,
                layers: 1,
            }
        );

        mgr.reconcile_independent(&mut map, "urban", false).unwrap();
        assert!(!map.has_source("urban-detail"));
        assert!(map.has_source("urban-coarse"));
        let entry = mgr.attached().get("urban").unwrap();
        assert_eq!(entry.artifacts.sources, vec!["urban-coarse".to_string()]);
        assert!(!entry.active);
        assert_eq!(mgr.metrics().counter(names::SOURCE_EVICTED), 1);
    }

    #[test]
    fn rejected_independent_is_retried_by_reconcile() {
        let mut map = RefusingMap {
            inner: base_map(),
            refuse_layers: true,
        };
        let mut mgr = manager();
        let catalog = test_catalog();
        let mut desired = DesiredState::new();
        desired.toggle_independent(&catalog, "urban").unwrap();

        let plan = mgr.reconcile(&mut map, &desired);
        assert_eq!(plan.failures.len(), 1);
        assert!(matches!(plan.failures[0], OverlayError::Registry { .. }));
        assert!(!map.inner.has_source("urban-coarse"));
        assert!(mgr.attached().get("urban").is_none());

        map.refuse_layers = false;
        let plan = mgr.reconcile(&mut map, &desired);
        assert!(plan.failures.is_empty());
        assert!(map.inner.has_layer("urban-coarse-fill"));
        assert!(mgr.attached().is_active("urban"));
    }

    #[test]
    fn remove_all_restores_the_base_map() {
        let mut map = base_map();
        let mut mgr = manager();
        mgr.reconcile_independent(&mut map, "urban", true).unwrap();
        mgr.reconcile_independent(&mut map, "terrain", true).unwrap();
        mgr.reconcile_independent(&mut map, "terrain", false).unwrap();
        let a = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        mgr.complete(&mut map, a, style("s1", "l1"));
        let pending = mgr
            .reconcile_independent(&mut map, "shelters", true)
            .unwrap()
            .unwrap();

        mgr.remove_all(&mut map);
        assert_eq!(map.layer_ids(), vec!["background", "water", "place-label"]);
        assert_eq!(map.source_ids(), vec!["openmaptiles"]);
        assert!(pending.is_cancelled());
        assert!(mgr.attached().is_empty());
        assert_eq!(mgr.pending_loads(), 0);
    }

    #[test]
    fn flag_overlay_touches_no_artifacts() {
        let mut map = base_map();
        let mut mgr = manager();
        let before = map.layer_ids().len();

        mgr.reconcile_independent(&mut map, "tileBoundaries", true)
            .unwrap();
        assert!(mgr.attached().is_active("tileBoundaries"));
        assert_eq!(map.layer_ids().len(), before);

        mgr.reconcile_independent(&mut map, "tileBoundaries", false)
            .unwrap();
        assert!(mgr.attached().get("tileBoundaries").is_none());
    }

    #[test]
    fn wrong_group_is_rejected_before_any_change() {
        let mut map = base_map();
        let mut mgr = manager();
        assert!(matches!(
            mgr.reconcile_exclusive(&mut map, "urban"),
            Err(OverlayError::WrongGroup { .. })
        ));
        assert!(matches!(
            mgr.reconcile_independent(&mut map, "landcoverA", true),
            Err(OverlayError::WrongGroup { .. })
        ));
        assert_eq!(
            mgr.reconcile_independent(&mut map, "volcanoes", true)
                .unwrap_err(),
            OverlayError::UnknownOverlay("volcanoes".to_string())
        );
        assert!(mgr.attached().is_empty());
    }

    #[test]
    fn reconcile_applies_the_difference() {
        let mut map = base_map();
        let mut mgr = manager();
        let catalog = test_catalog();
        let mut desired = DesiredState::new();

        desired.select_exclusive(&catalog, "landcoverA").unwrap();
        desired.toggle_independent(&catalog, "urban").unwrap();
        desired.toggle_independent(&catalog, "terrain").unwrap();

        let plan = mgr.reconcile(&mut map, &desired);
        assert!(plan.failures.is_empty());
        assert_eq!(plan.pending.len(), 1);
        assert_eq!(plan.pending[0].key(), &key("landcoverA"));
        assert!(map.has_layer("urban-coarse-fill"));
        assert!(map.has_layer(HILLSHADE_LAYER_ID));

        desired.toggle_independent(&catalog, "urban").unwrap();
        let plan = mgr.reconcile(&mut map, &desired);
        assert!(plan.pending.is_empty());
        assert!(!map.has_layer("urban-coarse-fill"));
        assert!(map.has_layer(HILLSHADE_LAYER_ID));
    }

    #[test]
    fn teardown_cancels_everything() {
        let mut map = base_map();
        let mut mgr = manager();
        let a = mgr
            .reconcile_exclusive(&mut map, "landcoverA")
            .unwrap()
            .unwrap();
        let s = mgr
            .reconcile_independent(&mut map, "shelters", true)
            .unwrap()
            .unwrap();
        assert_eq!(mgr.pending_loads(), 2);

        mgr.teardown();
        assert!(a.is_cancelled());
        assert!(s.is_cancelled());
        assert_eq!(mgr.pending_loads(), 0);
        assert_eq!(
            mgr.complete(&mut map, a, style("s1", "l1")),
            LoadOutcome::Discarded {
                key: key("landcoverA")
            }
        );
        assert!(!map.has_source("s1"));
        assert!(mgr.exclusive_target().is_none());
    }
}
