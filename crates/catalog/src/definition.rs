use std::borrow::Borrow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CatalogError;

/// Key of the exclusive-group sentinel meaning "no overlay".
pub const NONE_KEY: &str = "none";

/// Stable identifier of one overlay.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverlayKey(String);

impl OverlayKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn none() -> Self {
        Self(NONE_KEY.to_string())
    }

    pub fn is_none(&self) -> bool {
        self.0 == NONE_KEY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for OverlayKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OverlayKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OverlayKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for OverlayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Radio group or checkbox group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    Exclusive,
    Independent,
}

impl std::fmt::Display for OverlayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayKind::Exclusive => write!(f, "exclusive"),
            OverlayKind::Independent => write!(f, "independent"),
        }
    }
}

/// Where an overlay's sources and layers come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlaySource {
    /// Only valid for the `none` sentinel.
    Empty,
    /// A style document (or GeoJSON FeatureCollection) fetched at runtime.
    Remote { url: String },
    /// Layers computed on the client from a template.
    Builtin { template: BuiltinOverlay },
    /// Sets a boolean consumed by the host; touches no map artifacts.
    Flag,
}

/// One resolution band of a zoom-banded overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBand {
    pub id: String,
    pub data_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<f64>,
}

/// Client-side layer templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuiltinOverlay {
    /// Polygons split into zoom bands, each fed by its own source.
    ZoomBanded {
        bands: Vec<DataBand>,
        fill_color: String,
        outline_color: String,
    },
    /// A circle per point, optionally sized by a numeric property, plus a label.
    PointMarkers {
        data_url: String,
        label_property: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_property: Option<String>,
        /// `[value, radius_px]` stops for linear interpolation.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        radius_stops: Vec<[f64; 2]>,
        color: String,
    },
    /// Polygons extruded by a height property.
    Extrusion {
        data_url: String,
        height_property: String,
        color: String,
    },
    /// Hillshade over an elevation source.
    Terrain {
        tiles_url: String,
        encoding: String,
        tile_size: u32,
    },
}

impl BuiltinOverlay {
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            BuiltinOverlay::ZoomBanded { bands, .. } => {
                if bands.is_empty() {
                    return Err("zoom-banded overlay needs at least one band".to_string());
                }
                for band in bands {
                    if let (Some(lo), Some(hi)) = (band.minzoom, band.maxzoom) {
                        if lo >= hi {
                            return Err(format!("band `{}` has minzoom >= maxzoom", band.id));
                        }
                    }
                }
                Ok(())
            }
            BuiltinOverlay::PointMarkers {
                value_property,
                radius_stops,
                ..
            } => {
                if value_property.is_some() && radius_stops.len() < 2 {
                    return Err("sized markers need at least two radius stops".to_string());
                }
                if radius_stops.windows(2).any(|w| w[0][0] >= w[1][0]) {
                    return Err("radius stops must be strictly increasing".to_string());
                }
                Ok(())
            }
            BuiltinOverlay::Extrusion { .. } | BuiltinOverlay::Terrain { .. } => Ok(()),
        }
    }
}

/// Display language.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ja,
    En,
}

impl FromStr for Locale {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ja" | "ja-jp" => Ok(Locale::Ja),
            "en" | "en-us" | "en-gb" => Ok(Locale::En),
            other => Err(CatalogError::UnknownLocale(other.to_string())),
        }
    }
}

impl Locale {
    /// Text for the host's error slot when an overlay fails to load.
    pub fn load_failed(self, detail: &str) -> String {
        match self {
            Locale::Ja => format!("オーバーレイの読み込みに失敗しました: {detail}"),
            Locale::En => format!("Failed to load overlay: {detail}"),
        }
    }
}

/// Japanese and English text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub ja: String,
    pub en: String,
}

impl Label {
    pub fn new(ja: impl Into<String>, en: impl Into<String>) -> Self {
        Self {
            ja: ja.into(),
            en: en.into(),
        }
    }

    pub fn get(&self, locale: Locale) -> &str {
        match locale {
            Locale::Ja => &self.ja,
            Locale::En => &self.en,
        }
    }
}

/// Presentation-only metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMeta {
    pub label: Label,
    /// Map scale the data is meant for, e.g. `～30km`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<Label>,
    /// Sidebar section the toggle is listed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayDefinition {
    pub key: OverlayKey,
    pub kind: OverlayKind,
    pub source: OverlaySource,
    pub display: DisplayMeta,
}

impl OverlayDefinition {
    pub fn new(
        key: impl Into<OverlayKey>,
        kind: OverlayKind,
        source: OverlaySource,
        label: Label,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            source,
            display: DisplayMeta {
                label,
                scale_hint: None,
                tooltip: None,
                section: None,
            },
        }
    }

    pub fn exclusive_remote(key: impl Into<OverlayKey>, url: impl Into<String>) -> Self {
        let key = key.into();
        let label = Label::new(key.as_str(), key.as_str());
        Self::new(
            key,
            OverlayKind::Exclusive,
            OverlaySource::Remote { url: url.into() },
            label,
        )
    }

    pub fn independent(key: impl Into<OverlayKey>, source: OverlaySource) -> Self {
        let key = key.into();
        let label = Label::new(key.as_str(), key.as_str());
        Self::new(key, OverlayKind::Independent, source, label)
    }

    pub fn none() -> Self {
        Self::new(
            OverlayKey::none(),
            OverlayKind::Exclusive,
            OverlaySource::Empty,
            Label::new("なし", "None"),
        )
    }

    pub fn with_scale_hint(mut self, hint: impl Into<String>) -> Self {
        self.display.scale_hint = Some(hint.into());
        self
    }

    pub fn with_tooltip(mut self, tooltip: Label) -> Self {
        self.display.tooltip = Some(tooltip);
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.display.section = Some(section.into());
        self
    }

    pub fn remote_style_url(&self) -> Option<&str> {
        match &self.source {
            OverlaySource::Remote { url } => Some(url),
            _ => None,
        }
    }

    pub fn label(&self, locale: Locale) -> &str {
        self.display.label.get(locale)
    }
}
