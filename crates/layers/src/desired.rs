use std::collections::BTreeSet;

use catalog::{OverlayCatalog, OverlayDefinition, OverlayKey, OverlayKind};

use crate::error::OverlayError;

pub(crate) fn lookup<'a>(
    catalog: &'a OverlayCatalog,
    key: &str,
    expected: OverlayKind,
) -> Result<&'a OverlayDefinition, OverlayError> {
    let def = catalog
        .get(key)
        .ok_or_else(|| OverlayError::UnknownOverlay(key.to_string()))?;
    if def.kind != expected {
        return Err(OverlayError::WrongGroup {
            key: key.to_string(),
            expected,
            actual: def.kind,
        });
    }
    Ok(def)
}

/// What the user has asked for.
///
/// Exactly one exclusive selection at a time, `none` included. Independent
/// selections are a set; terrain shading is the independent overlay whose
/// template is `Terrain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    exclusive: OverlayKey,
    independent: BTreeSet<OverlayKey>,
}

impl Default for DesiredState {
    fn default() -> Self {
        Self::new()
    }
}

impl DesiredState {
    pub fn new() -> Self {
        Self {
            exclusive: OverlayKey::none(),
            independent: BTreeSet::new(),
        }
    }

    pub fn exclusive_selection(&self) -> &OverlayKey {
        &self.exclusive
    }

    pub fn independent_selections(&self) -> &BTreeSet<OverlayKey> {
        &self.independent
    }

    pub fn is_selected(&self, key: &str) -> bool {
        self.exclusive.as_str() == key || self.independent.contains(key)
    }

    /// Returns `true` if the selection changed.
    pub fn select_exclusive(
        &mut self,
        catalog: &OverlayCatalog,
        key: &str,
    ) -> Result<bool, OverlayError> {
        let def = lookup(catalog, key, OverlayKind::Exclusive)?;
        if self.exclusive == def.key {
            return Ok(false);
        }
        self.exclusive = def.key.clone();
        Ok(true)
    }

    /// Returns `true` if the selection changed.
    pub fn set_independent(
        &mut self,
        catalog: &OverlayCatalog,
        key: &str,
        active: bool,
    ) -> Result<bool, OverlayError> {
        let def = lookup(catalog, key, OverlayKind::Independent)?;
        Ok(if active {
            self.independent.insert(def.key.clone())
        } else {
            self.independent.remove(key)
        })
    }

    /// Flip an independent overlay. Returns its new state.
    pub fn toggle_independent(
        &mut self,
        catalog: &OverlayCatalog,
        key: &str,
    ) -> Result<bool, OverlayError> {
        let active = !self.independent.contains(key);
        self.set_independent(catalog, key, active)?;
        Ok(active)
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
