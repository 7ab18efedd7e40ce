pub mod attached;
pub mod builtin;
pub mod desired;
pub mod driver;
pub mod error;
pub mod manager;
pub mod registry;
pub mod symbology;
pub mod terrain;

pub use attached::{AttachedArtifacts, AttachedLayerSet, AttachedOverlay};
pub use desired::DesiredState;
pub use driver::{OverlayDriver, ToggleEvent};
pub use error::OverlayError;
pub use manager::{
    LoadOutcome, LoadSlot, ManagerConfig, OverlayManager, PendingLoad, Reconciliation,
};
pub use registry::{InMemoryMap, MapArtifactRegistry, RegistryError};
pub use terrain::TerrainShading;
