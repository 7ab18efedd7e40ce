use catalog::BuiltinOverlay;
use serde_json::{Value, json};
use streaming::{LayerType, StyleDocument, StyleLayer};

/// Elevation source id. Survives terrain being switched off.
pub const ELEVATION_SOURCE_ID: &str = "terrarium";
/// Shading layer id. The only artifact removed when terrain is switched off.
pub const HILLSHADE_LAYER_ID: &str = "hillshade";

pub const HILLSHADE_EXAGGERATION: f64 = 0.8;
pub const HILLSHADE_SHADOW_COLOR: &str = "#3d2817";
pub const HILLSHADE_HIGHLIGHT_COLOR: &str = "#FFFFFF";
pub const HILLSHADE_ILLUMINATION_DIRECTION: f64 = 315.0;

const DEFAULT_TILES: &str =
    "https://s3.amazonaws.com/elevation-tiles-prod/terrarium/{z}/{x}/{y}.png";

/// Hillshade over a raster elevation source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerrainShading {
    pub tiles_url: String,
    pub encoding: String,
    pub tile_size: u32,
}

impl Default for TerrainShading {
    fn default() -> Self {
        Self {
            tiles_url: DEFAULT_TILES.to_string(),
            encoding: "terrarium".to_string(),
            tile_size: 256,
        }
    }
}

impl TerrainShading {
    pub fn from_template(template: &BuiltinOverlay) -> Option<Self> {
        match template {
            BuiltinOverlay::Terrain {
                tiles_url,
                encoding,
                tile_size,
            } => Some(Self {
                tiles_url: tiles_url.clone(),
                encoding: encoding.clone(),
                tile_size: *tile_size,
            }),
            _ => None,
        }
    }

    pub fn source_config(&self) -> Value {
        json!({
            "type": "raster-dem",
            "tiles": [self.tiles_url],
            "encoding": self.encoding,
            "tileSize": self.tile_size,
        })
    }

    pub fn hillshade_layer(&self) -> StyleLayer {
        StyleLayer::new(HILLSHADE_LAYER_ID, LayerType::Hillshade)
            .with_source(ELEVATION_SOURCE_ID)
            .with_paint("hillshade-exaggeration", json!(HILLSHADE_EXAGGERATION))
            .with_paint("hillshade-shadow-color", json!(HILLSHADE_SHADOW_COLOR))
            .with_paint("hillshade-highlight-color", json!(HILLSHADE_HIGHLIGHT_COLOR))
            .with_paint(
                "hillshade-illumination-direction",
                json!(HILLSHADE_ILLUMINATION_DIRECTION),
            )
    }

    /// The elevation source and the shading layer as one document.
    ///
    /// Attached like any independent overlay, so switching it off removes the
    /// layer and leaves the source for the next time.
    pub fn document(&self) -> StyleDocument {
        StyleDocument::new()
            .with_source(ELEVATION_SOURCE_ID, self.source_config())
            .with_layer(self.hillshade_layer())
    }
}
