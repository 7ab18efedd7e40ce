use std::collections::BTreeMap;

use serde_json::Value;
use streaming::{LayerType, StyleDocument, StyleLayer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("source `{0}` already exists")]
    DuplicateSource(String),
    #[error("source `{0}` does not exist")]
    MissingSource(String),
    #[error("layer `{0}` already exists")]
    DuplicateLayer(String),
    #[error("layer `{0}` does not exist")]
    MissingLayer(String),
    #[error("layer `{layer}` references unknown source `{source_id}`")]
    UnknownLayerSource { layer: String, source_id: String },
    #[error("source `{source_id}` is still used by layer `{layer}`")]
    SourceInUse { source_id: String, layer: String },
    #[error("cannot insert before unknown layer `{0}`")]
    MissingBeforeLayer(String),
}

/// The rendering map's named sources and ordered layers.
///
/// Layer order is bottom to top. Every overlay mutation goes through this
/// trait so the manager never depends on a concrete map engine.
pub trait MapArtifactRegistry {
    fn has_source(&self, id: &str) -> bool;

    fn add_source(&mut self, id: &str, config: &Value) -> Result<(), RegistryError>;

    fn remove_source(&mut self, id: &str) -> Result<(), RegistryError>;

    fn has_layer(&self, id: &str) -> bool;

    /// Insert `layer` directly below `before`, or on top when `None`.
    fn add_layer(&mut self, layer: &StyleLayer, before: Option<&str>) -> Result<(), RegistryError>;

    fn remove_layer(&mut self, id: &str) -> Result<(), RegistryError>;

    /// `(id, type)` of every layer, bottom to top.
    fn layer_order(&self) -> Vec<(String, LayerType)>;

    fn first_symbol_layer_id(&self) -> Option<String> {
        self.layer_order()
            .into_iter()
            .find(|(_, ty)| *ty == LayerType::Symbol)
            .map(|(id, _)| id)
    }
}

/// Map stand-in that enforces the same referential rules a real engine does.
///
/// Also counts how often each source id was added, so callers can check that
/// re-enabling an overlay doesn't re-register its sources.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMap {
    sources: BTreeMap<String, Value>,
    layers: Vec<StyleLayer>,
    source_adds: BTreeMap<String, usize>,
}

impl InMemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map preloaded with a base style.
    pub fn from_style(base: &StyleDocument) -> Result<Self, RegistryError> {
        let mut map = Self::new();
        for (id, config) in &base.sources {
            map.add_source(id, config)?;
        }
        for layer in &base.layers {
            map.add_layer(layer, None)?;
        }
        map.source_adds.clear();
        Ok(map)
    }

    pub fn source(&self, id: &str) -> Option<&Value> {
        self.sources.get(id)
    }

    pub fn layer(&self, id: &str) -> Option<&StyleLayer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_position(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    /// How many times `add_source` succeeded for `id` since construction.
    pub fn source_add_calls(&self, id: &str) -> usize {
        self.source_adds.get(id).copied().unwrap_or(0)
    }
}

impl MapArtifactRegistry for InMemoryMap {
    fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    fn add_source(&mut self, id: &str, config: &Value) -> Result<(), RegistryError> {
        if self.sources.contains_key(id) {
            return Err(RegistryError::DuplicateSource(id.to_string()));
        }
        self.sources.insert(id.to_string(), config.clone());
        *self.source_adds.entry(id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn remove_source(&mut self, id: &str) -> Result<(), RegistryError> {
        if !self.sources.contains_key(id) {
            return Err(RegistryError::MissingSource(id.to_string()));
        }
        if let Some(user) = self.layers.iter().find(|l| l.source.as_deref() == Some(id)) {
            return Err(RegistryError::SourceInUse {
                source_id: id.to_string(),
                layer: user.id.clone(),
            });
        }
        self.sources.remove(id);
        Ok(())
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layer(id).is_some()
    }

    fn add_layer(&mut self, layer: &StyleLayer, before: Option<&str>) -> Result<(), RegistryError> {
        if self.has_layer(&layer.id) {
            return Err(RegistryError::DuplicateLayer(layer.id.clone()));
        }
        if let Some(source) = &layer.source {
            if !self.sources.contains_key(source) {
                return Err(RegistryError::UnknownLayerSource {
                    layer: layer.id.clone(),
                    source_id: source.clone(),
                });
            }
        }
        let index = match before {
            Some(before) => self
                .layer_position(before)
                .ok_or_else(|| RegistryError::MissingBeforeLayer(before.to_string()))?,
            None => self.layers.len(),
        };
        self.layers.insert(index, layer.clone());
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), RegistryError> {
        let index = self
            .layer_position(id)
            .ok_or_else(|| RegistryError::MissingLayer(id.to_string()))?;
        self.layers.remove(index);
        Ok(())
    }

    fn layer_order(&self) -> Vec<(String, LayerType)> {
        self.layers
            .iter()
            .map(|l| (l.id.clone(), l.layer_type.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryMap, MapArtifactRegistry, RegistryError};
    use serde_json::json;
    use streaming::{LayerType, StyleDocument, StyleLayer};

    fn base() -> InMemoryMap {
        let style = StyleDocument::new()
            .with_source("openmaptiles", json!({ "type": "vector" }))
            .with_layer(StyleLayer::new("background", LayerType::Background))
            .with_layer(StyleLayer::new("water", LayerType::Fill).with_source("openmaptiles"))
            .with_layer(
                StyleLayer::new("place-label", LayerType::Symbol).with_source("openmaptiles"),
            );
        InMemoryMap::from_style(&style).unwrap()
    }

    #[test]
    fn inserts_below_requested_layer() {
        let mut map = base();
        map.add_source("s1", &json!({ "type": "geojson" })).unwrap();
        let before = map.first_symbol_layer_id();
        assert_eq!(before.as_deref(), Some("place-label"));

        map.add_layer(
            &StyleLayer::new("l1", LayerType::Fill).with_source("s1"),
            before.as_deref(),
        )
        .unwrap();
        assert_eq!(map.layer_ids(), vec!["background", "water", "l1", "place-label"]);
    }

    #[test]
    fn enforces_references() {
        let mut map = base();
        assert_eq!(
            map.add_layer(&StyleLayer::new("l1", LayerType::Fill).with_source("s1"), None),
            Err(RegistryError::UnknownLayerSource {
                layer: "l1".to_string(),
                source_id: "s1".to_string(),
            })
        );
        assert!(matches!(
            map.remove_source("openmaptiles"),
            Err(RegistryError::SourceInUse { .. })
        ));
        assert_eq!(
            map.add_source("openmaptiles", &json!({})),
            Err(RegistryError::DuplicateSource("openmaptiles".to_string()))
        );
    }

    #[test]
    fn base_style_does_not_count_as_adds() {
        let mut map = base();
        assert_eq!(map.source_add_calls("openmaptiles"), 0);
        map.add_source("s1", &json!({})).unwrap();
        map.remove_source("s1").unwrap();
        map.add_source("s1", &json!({})).unwrap();
        assert_eq!(map.source_add_calls("s1"), 2);
    }
}
