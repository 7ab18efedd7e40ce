use catalog::OverlayKind;
use streaming::{DocumentError, FetchError};

use crate::registry::RegistryError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverlayError {
    #[error("unknown overlay `{0}`")]
    UnknownOverlay(String),
    #[error("overlay `{key}` is {actual}, not {expected}")]
    WrongGroup {
        key: String,
        expected: OverlayKind,
        actual: OverlayKind,
    },
    #[error("fetching overlay `{key}` failed: {source}")]
    Fetch {
        key: String,
        #[source]
        source: FetchError,
    },
    #[error("overlay `{key}` returned a malformed document: {source}")]
    MalformedDocument {
        key: String,
        #[source]
        source: DocumentError,
    },
    #[error("map rejected overlay `{key}`: {source}")]
    Registry {
        key: String,
        #[source]
        source: RegistryError,
    },
}

impl OverlayError {
    pub fn key(&self) -> &str {
        match self {
            OverlayError::UnknownOverlay(key) => key,
            OverlayError::WrongGroup { key, .. }
            | OverlayError::Fetch { key, .. }
            | OverlayError::MalformedDocument { key, .. }
            | OverlayError::Registry { key, .. } => key,
        }
    }
}
