//! Overlay catalog: which overlays exist, which group each belongs to, and
//! where its map artifacts come from.

use std::collections::BTreeMap;

mod definition;
mod japan;

pub use definition::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate overlay key `{0}`")]
    DuplicateKey(String),
    #[error("overlay key must not be empty")]
    EmptyKey,
    #[error("catalog needs an exclusive `none` overlay with an empty source")]
    MissingNone,
    #[error("overlay `{0}` has an empty source; only `none` may")]
    EmptySource(String),
    #[error("overlay `{key}` has an invalid template: {reason}")]
    InvalidTemplate { key: String, reason: String },
    #[error("catalog JSON is invalid: {0}")]
    Json(String),
    #[error("unknown locale `{0}`")]
    UnknownLocale(String),
}

/// Ordered overlay definitions with lookup by key.
///
/// Order is the order the sidebar lists the toggles in.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayCatalog {
    definitions: Vec<OverlayDefinition>,
    index: BTreeMap<OverlayKey, usize>,
}

impl OverlayCatalog {
    pub fn new(definitions: Vec<OverlayDefinition>) -> Result<Self, CatalogError> {
        let mut seen = BTreeMap::new();
        let mut has_none = false;

        for def in &definitions {
            if def.key.as_str().trim().is_empty() {
                return Err(CatalogError::EmptyKey);
            }
            if seen.insert(def.key.clone(), ()).is_some() {
                return Err(CatalogError::DuplicateKey(def.key.to_string()));
            }
            match (&def.source, def.key.is_none()) {
                (OverlaySource::Empty, true) if def.kind == OverlayKind::Exclusive => {
                    has_none = true
                }
                (OverlaySource::Empty, _) => {
                    return Err(CatalogError::EmptySource(def.key.to_string()));
                }
                (_, true) => return Err(CatalogError::MissingNone),
                (OverlaySource::Builtin { template }, false) => {
                    template
                        .validate()
                        .map_err(|reason| CatalogError::InvalidTemplate {
                            key: def.key.to_string(),
                            reason,
                        })?;
                }
                _ => {}
            }
        }

        if !has_none {
            return Err(CatalogError::MissingNone);
        }
        Ok(Self::index(definitions))
    }

    fn index(definitions: Vec<OverlayDefinition>) -> Self {
        let index = definitions
            .iter()
            .enumerate()
            .map(|(i, d)| (d.key.clone(), i))
            .collect();
        Self { definitions, index }
    }

    /// Parse a JSON array of definitions.
    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let definitions: Vec<OverlayDefinition> =
            serde_json::from_str(raw).map_err(|e| CatalogError::Json(e.to_string()))?;
        Self::new(definitions)
    }

    pub fn to_json_pretty(&self) -> Result<String, CatalogError> {
        serde_json::to_string_pretty(&self.definitions).map_err(|e| CatalogError::Json(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&OverlayDefinition> {
        self.index.get(key).map(|&i| &self.definitions[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OverlayDefinition> {
        self.definitions.iter()
    }

    pub fn exclusive(&self) -> impl Iterator<Item = &OverlayDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.kind == OverlayKind::Exclusive)
    }

    pub fn independent(&self) -> impl Iterator<Item = &OverlayDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.kind == OverlayKind::Independent)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
