use serde_json::Value;
use streaming::{LayerType, StyleLayer};

/// Fill opacity forced onto every overlay fill layer.
pub const OVERLAY_FILL_OPACITY: f64 = 0.8;
/// Line opacity forced onto every overlay line layer.
pub const OVERLAY_LINE_OPACITY: f64 = 0.9;

/// The layer as it should be added on top of the base map, or `None` if an
/// overlay must never add it.
///
/// Background layers would paint over the whole base map. Fill and line
/// opacity are overridden whatever the document says.
pub fn overlay_layer(layer: &StyleLayer) -> Option<StyleLayer> {
    let forced = match layer.layer_type {
        LayerType::Background => return None,
        LayerType::Fill => Some(("fill-opacity", OVERLAY_FILL_OPACITY)),
        LayerType::Line => Some(("line-opacity", OVERLAY_LINE_OPACITY)),
        _ => None,
    };

    let mut layer = layer.clone();
    if let Some((property, opacity)) = forced {
        layer.paint.insert(property.to_string(), Value::from(opacity));
    }
    Some(layer)
}
