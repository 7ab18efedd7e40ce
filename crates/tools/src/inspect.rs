//! Read-only views of catalogs and overlay documents.

use anyhow::Context;
use catalog::{Locale, OverlayCatalog, OverlayKey, OverlayKind, OverlaySource};
use layers::builtin::feature_collection_document;
use layers::symbology::overlay_layer;
use serde::Serialize;
use streaming::{FetchedDocument, StyleDocument};

/// One line per overlay, grouped by kind in catalog order.
pub fn catalog_lines(catalog: &OverlayCatalog, locale: Locale) -> Vec<String> {
    let mut lines = Vec::with_capacity(catalog.len());
    for kind in [OverlayKind::Exclusive, OverlayKind::Independent] {
        for def in catalog.iter().filter(|d| d.kind == kind) {
            let origin = match &def.source {
                OverlaySource::Empty => "-".to_string(),
                OverlaySource::Remote { url } => url.clone(),
                OverlaySource::Builtin { .. } => "builtin".to_string(),
                OverlaySource::Flag => "flag".to_string(),
            };
            let scale = def
                .display
                .scale_hint
                .as_deref()
                .map(|s| format!(" ({s})"))
                .unwrap_or_default();
            lines.push(format!(
                "[{kind}] {key}  {label}{scale}  {origin}",
                key = def.key,
                label = def.label(locale),
            ));
        }
    }
    lines
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    /// `false` for layers an overlay never adds.
    pub kept: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub kind: &'static str,
    pub sources: Vec<String>,
    pub layers: Vec<LayerSummary>,
}

/// Describe what attaching `bytes` as overlay `key` would add.
pub fn inspect_document(key: &str, bytes: &[u8]) -> anyhow::Result<DocumentSummary> {
    let parsed = FetchedDocument::parse(bytes).context("document is not a usable overlay")?;
    let (kind, doc): (_, StyleDocument) = match parsed {
        FetchedDocument::Style(doc) => ("style", doc),
        FetchedDocument::FeatureCollection(collection) => (
            "feature_collection",
            feature_collection_document(&OverlayKey::new(key), collection),
        ),
    };

    let layers = doc
        .layers
        .iter()
        .map(|layer| {
            let applied = overlay_layer(layer);
            let opacity = applied.as_ref().and_then(|l| {
                l.paint
                    .get("fill-opacity")
                    .or_else(|| l.paint.get("line-opacity"))
                    .cloned()
            });
            LayerSummary {
                id: layer.id.clone(),
                layer_type: layer.layer_type.to_string(),
                kept: applied.is_some(),
                opacity,
            }
        })
        .collect();

    Ok(DocumentSummary {
        kind,
        sources: doc.sources.keys().cloned().collect(),
        layers,
    })
}
