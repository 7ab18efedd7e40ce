//! Client-side overlay templates.
//!
//! Every builtin overlay expands to an ordinary [`StyleDocument`] so it is
//! attached through the same path as fetched documents. Ids are derived from
//! the overlay key, which keeps them unique across overlays.

use catalog::{BuiltinOverlay, DataBand, OverlayKey};
use serde_json::{Value, json};
use streaming::{LayerType, StyleDocument, StyleLayer, geometry_families};

use crate::terrain::TerrainShading;

const LABEL_FONT: &str = "Noto Sans Regular";
const DEFAULT_MARKER_RADIUS: f64 = 5.0;
const DATA_COLOR: &str = "#ff7043";

fn geojson_source(data: Value) -> Value {
    json!({ "type": "geojson", "data": data })
}

fn label_layer(id: String, source: &str, property: &str) -> StyleLayer {
    StyleLayer::new(id, LayerType::Symbol)
        .with_source(source)
        .with_layout("text-field", json!(["get", property]))
        .with_layout("text-size", json!(14))
        .with_layout("text-font", json!([LABEL_FONT]))
        .with_layout("text-offset", json!([0, 1.2]))
        .with_layout("text-anchor", json!("top"))
        .with_paint("text-color", json!("#000"))
        .with_paint("text-halo-color", json!("#fff"))
        .with_paint("text-halo-width", json!(2))
}

fn band_source(band: &DataBand) -> Value {
    let mut config = geojson_source(json!(band.data_url));
    if let Some(obj) = config.as_object_mut() {
        if let Some(minzoom) = band.minzoom {
            obj.insert("minzoom".to_string(), json!(minzoom));
        }
        if let Some(maxzoom) = band.maxzoom {
            obj.insert("maxzoom".to_string(), json!(maxzoom));
        }
    }
    config
}

fn marker_radius(value_property: Option<&str>, stops: &[[f64; 2]]) -> Value {
    match value_property {
        Some(property) if !stops.is_empty() => {
            let mut expr = vec![
                json!("interpolate"),
                json!(["linear"]),
                json!(["get", property]),
            ];
            for [value, radius] in stops {
                expr.push(json!(value));
                expr.push(json!(radius));
            }
            Value::Array(expr)
        }
        _ => json!(DEFAULT_MARKER_RADIUS),
    }
}

/// Expand a template into the document it attaches.
pub fn builtin_document(key: &OverlayKey, template: &BuiltinOverlay) -> StyleDocument {
    match template {
        BuiltinOverlay::ZoomBanded {
            bands,
            fill_color,
            outline_color,
        } => bands.iter().fold(StyleDocument::new(), |doc, band| {
            let source = format!("{key}-{}", band.id);
            doc.with_source(source.clone(), band_source(band))
                .with_layer(
                    StyleLayer::new(format!("{source}-fill"), LayerType::Fill)
                        .with_source(source.clone())
                        .with_zoom_range(band.minzoom, band.maxzoom)
                        .with_paint("fill-color", json!(fill_color)),
                )
                .with_layer(
                    StyleLayer::new(format!("{source}-outline"), LayerType::Line)
                        .with_source(source.clone())
                        .with_zoom_range(band.minzoom, band.maxzoom)
                        .with_paint("line-color", json!(outline_color))
                        .with_paint("line-width", json!(1)),
                )
        }),
        BuiltinOverlay::PointMarkers {
            data_url,
            label_property,
            value_property,
            radius_stops,
            color,
        } => {
            let source = key.to_string();
            StyleDocument::new()
                .with_source(source.clone(), geojson_source(json!(data_url)))
                .with_layer(
                    StyleLayer::new(format!("{key}-circle"), LayerType::Circle)
                        .with_source(source.clone())
                        .with_paint(
                            "circle-radius",
                            marker_radius(value_property.as_deref(), radius_stops),
                        )
                        .with_paint("circle-color", json!(color))
                        .with_paint("circle-opacity", json!(0.7))
                        .with_paint("circle-stroke-color", json!("#fff"))
                        .with_paint("circle-stroke-width", json!(1)),
                )
                .with_layer(label_layer(format!("{key}-label"), &source, label_property))
        }
        BuiltinOverlay::Extrusion {
            data_url,
            height_property,
            color,
        } => {
            let source = key.to_string();
            StyleDocument::new()
                .with_source(source.clone(), geojson_source(json!(data_url)))
                .with_layer(
                    StyleLayer::new(format!("{key}-extrusion"), LayerType::FillExtrusion)
                        .with_source(source)
                        .with_paint("fill-extrusion-color", json!(color))
                        .with_paint("fill-extrusion-height", json!(["get", height_property]))
                        .with_paint("fill-extrusion-base", json!(0))
                        .with_paint("fill-extrusion-opacity", json!(0.8)),
                )
        }
        BuiltinOverlay::Terrain { .. } => TerrainShading::from_template(template)
            .unwrap_or_default()
            .document(),
    }
}

/// Default layers for a plain GeoJSON FeatureCollection: one per geometry
/// family present, all reading from one inline source named after the key.
pub fn feature_collection_document(key: &OverlayKey, collection: Value) -> StyleDocument {
    let source = key.to_string();
    let families = geometry_families(&collection);
    let mut doc = StyleDocument::new().with_source(source.clone(), geojson_source(collection));

    for family in families {
        let layer = match family {
            LayerType::Fill => StyleLayer::new(format!("{key}-fill"), LayerType::Fill)
                .with_paint("fill-color", json!(DATA_COLOR)),
            LayerType::Line => StyleLayer::new(format!("{key}-line"), LayerType::Line)
                .with_paint("line-color", json!(DATA_COLOR))
                .with_paint("line-width", json!(1.5)),
            LayerType::Circle => StyleLayer::new(format!("{key}-circle"), LayerType::Circle)
                .with_paint("circle-color", json!(DATA_COLOR))
                .with_paint("circle-radius", json!(DEFAULT_MARKER_RADIUS)),
            _ => continue,
        };
        doc = doc.with_layer(layer.with_source(source.clone()));
    }
    doc
}
