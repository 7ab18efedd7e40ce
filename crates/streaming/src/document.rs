//! Style and data documents fetched for overlays.
//!
//! A style document is the MapLibre style subset overlays ship with: a
//! `sources` object (source id → opaque source config) and an ordered
//! `layers` array. Data-only overlays ship a plain GeoJSON
//! `FeatureCollection` instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("unexpected document shape: {0}")]
    Shape(String),
    #[error("layer #{index} is invalid: {reason}")]
    Layer { index: usize, reason: String },
}

/// Paint type of a style layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LayerType {
    Background,
    Fill,
    Line,
    Symbol,
    Circle,
    Raster,
    Hillshade,
    FillExtrusion,
    Heatmap,
    Other(String),
}

impl LayerType {
    pub fn as_str(&self) -> &str {
        match self {
            LayerType::Background => "background",
            LayerType::Fill => "fill",
            LayerType::Line => "line",
            LayerType::Symbol => "symbol",
            LayerType::Circle => "circle",
            LayerType::Raster => "raster",
            LayerType::Hillshade => "hillshade",
            LayerType::FillExtrusion => "fill-extrusion",
            LayerType::Heatmap => "heatmap",
            LayerType::Other(s) => s,
        }
    }
}

impl From<String> for LayerType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "background" => LayerType::Background,
            "fill" => LayerType::Fill,
            "line" => LayerType::Line,
            "symbol" => LayerType::Symbol,
            "circle" => LayerType::Circle,
            "raster" => LayerType::Raster,
            "hillshade" => LayerType::Hillshade,
            "fill-extrusion" => LayerType::FillExtrusion,
            "heatmap" => LayerType::Heatmap,
            _ => LayerType::Other(s),
        }
    }
}

impl From<LayerType> for String {
    fn from(t: LayerType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One layer definition. Keys this type doesn't model are kept in `extra`
/// and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleLayer {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        rename = "source-layer",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub paint: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub layout: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StyleLayer {
    pub fn new(id: impl Into<String>, layer_type: LayerType) -> Self {
        Self {
            id: id.into(),
            layer_type,
            source: None,
            source_layer: None,
            minzoom: None,
            maxzoom: None,
            filter: None,
            paint: Map::new(),
            layout: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_zoom_range(mut self, minzoom: Option<f64>, maxzoom: Option<f64>) -> Self {
        self.minzoom = minzoom;
        self.maxzoom = maxzoom;
        self
    }

    pub fn with_paint(mut self, key: &str, value: Value) -> Self {
        self.paint.insert(key.to_string(), value);
        self
    }

    pub fn with_layout(mut self, key: &str, value: Value) -> Self {
        self.layout.insert(key.to_string(), value);
        self
    }
}

/// Sources plus ordered layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleDocument {
    pub sources: BTreeMap<String, Value>,
    pub layers: Vec<StyleLayer>,
}

impl StyleDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, id: impl Into<String>, config: Value) -> Self {
        self.sources.insert(id.into(), config);
        self
    }

    pub fn with_layer(mut self, layer: StyleLayer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Parse a style document, validating every layer before returning so a
    /// malformed document is never partially applied.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(mut root) = value else {
            return Err(DocumentError::Shape("expected a JSON object".to_string()));
        };

        let sources = match root.remove("sources") {
            Some(Value::Object(map)) => map.into_iter().collect(),
            Some(_) => return Err(DocumentError::Shape("`sources` must be an object".to_string())),
            None => return Err(DocumentError::Shape("missing `sources`".to_string())),
        };

        let raw_layers = match root.remove("layers") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(DocumentError::Shape("`layers` must be an array".to_string())),
            None => return Err(DocumentError::Shape("missing `layers`".to_string())),
        };

        let mut layers = Vec::with_capacity(raw_layers.len());
        for (index, raw) in raw_layers.into_iter().enumerate() {
            let layer: StyleLayer =
                serde_json::from_value(raw).map_err(|e| DocumentError::Layer {
                    index,
                    reason: e.to_string(),
                })?;
            if layer.id.trim().is_empty() {
                return Err(DocumentError::Layer {
                    index,
                    reason: "empty layer id".to_string(),
                });
            }
            layers.push(layer);
        }

        Ok(Self { sources, layers })
    }
}

/// What an overlay URL answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedDocument {
    Style(StyleDocument),
    FeatureCollection(Value),
}

impl FetchedDocument {
    pub fn parse(bytes: &[u8]) -> Result<Self, DocumentError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DocumentError::Json(e.to_string()))?;

        if value.get("type").and_then(Value::as_str) == Some("FeatureCollection") {
            if !value.get("features").is_some_and(Value::is_array) {
                return Err(DocumentError::Shape(
                    "FeatureCollection without a `features` array".to_string(),
                ));
            }
            return Ok(FetchedDocument::FeatureCollection(value));
        }

        StyleDocument::from_value(value).map(FetchedDocument::Style)
    }
}

/// Geometry families present in a FeatureCollection, in a fixed order.
pub fn geometry_families(collection: &Value) -> Vec<LayerType> {
    let mut polygons = false;
    let mut lines = false;
    let mut points = false;

    let features = collection
        .get("features")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for feature in features {
        let kind = feature
            .get("geometry")
            .and_then(|g| g.get("type"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        match kind {
            "Polygon" | "MultiPolygon" => polygons = true,
            "LineString" | "MultiLineString" => lines = true,
            "Point" | "MultiPoint" => points = true,
            _ => {}
        }
    }

    let mut out = Vec::new();
    if polygons {
        out.push(LayerType::Fill);
    }
    if lines || polygons {
        out.push(LayerType::Line);
    }
    if points {
        out.push(LayerType::Circle);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{DocumentError, FetchedDocument, LayerType, geometry_families};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_style_document_and_keeps_unknown_keys() {
        let raw = json!({
            "version": 8,
            "sources": { "landcover-tiles": { "type": "vector", "url": "pmtiles://x" } },
            "layers": [
                { "id": "bg", "type": "background", "paint": { "background-color": "#fff" } },
                {
                    "id": "landcover-forest",
                    "type": "fill",
                    "source": "landcover-tiles",
                    "source-layer": "landcover",
                    "metadata": { "group": "forest" },
                    "paint": { "fill-color": "#2e7d32" }
                }
            ]
        });
        let FetchedDocument::Style(doc) =
            FetchedDocument::parse(raw.to_string().as_bytes()).unwrap()
        else {
            panic!("expected a style document");
        };

        assert_eq!(doc.sources.len(), 1);
        assert_eq!(doc.layers[0].layer_type, LayerType::Background);
        let forest = &doc.layers[1];
        assert_eq!(forest.source_layer.as_deref(), Some("landcover"));
        assert_eq!(forest.extra.get("metadata"), Some(&json!({ "group": "forest" })));

        let written = serde_json::to_value(forest).unwrap();
        assert_eq!(written["source-layer"], json!("landcover"));
        assert_eq!(written["type"], json!("fill"));
    }

    #[test]
    fn missing_layers_is_a_shape_error() {
        let err = FetchedDocument::parse(br#"{"sources":{}}"#).unwrap_err();
        assert_eq!(err, DocumentError::Shape("missing `layers`".to_string()));
    }

    #[test]
    fn layer_without_type_is_rejected() {
        let err = FetchedDocument::parse(br#"{"sources":{},"layers":[{"id":"x"}]}"#).unwrap_err();
        assert!(matches!(err, DocumentError::Layer { index: 0, .. }));
    }

    #[test]
    fn unknown_layer_type_round_trips() {
        let t = LayerType::from("sky".to_string());
        assert_eq!(t, LayerType::Other("sky".to_string()));
        assert_eq!(String::from(t), "sky");
    }

    #[test]
    fn feature_collection_is_detected() {
        let raw = json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "geometry": { "type": "Point", "coordinates": [139.69, 35.69] }, "properties": {} },
                { "type": "Feature", "geometry": { "type": "Polygon", "coordinates": [] }, "properties": {} }
            ]
        });
        let doc = FetchedDocument::parse(raw.to_string().as_bytes()).unwrap();
        let FetchedDocument::FeatureCollection(fc) = doc else {
            panic!("expected a feature collection");
        };
        assert_eq!(
            geometry_families(&fc),
            vec![LayerType::Fill, LayerType::Line, LayerType::Circle]
        );
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(
            FetchedDocument::parse(b"<html>"),
            Err(DocumentError::Json(_))
        ));
    }
}
