//! # Drape Cloth
//!
//! Cloth instances and their build lifecycle:
//! - **Process**: the per-cloth state machine (init, runtime build,
//!   pre-built fast path, enable/disable, two-phase dispose)
//! - **Registry**: the simulation team allocator contract and an in-memory
//!   implementation
//! - **Renderers**: shared, reference-counted renderer snapshots
//! - **Pre-build**: export and deduplicated reuse of finished builds
//! - **Manager**: creates processes and resolves synchronization partners
//! - **Scene**: the JSON scene format

pub mod definition;
pub mod listener;
pub mod manager;
pub mod prebuild;
pub mod process;
pub mod registry;
pub mod render;
pub mod scene;
pub mod state;

pub use definition::{ClothDefinition, ClothInitData, ClothType};
pub use listener::{BuildCompleteListener, BuildEvent, BuildPhase, ChannelListener, PhaseObserver};
pub use manager::{ClothManager, ManagerSettings};
pub use prebuild::{PreBuildData, PreBuildKey, PreBuildStore, SharePreBuildData, UniquePreBuildData};
pub use process::{ClothProcess, RenderMeshInfo};
pub use registry::{ClothId, ColliderId, InMemoryRegistry, MappingId, SimulationRegistry, TeamEntry, TeamId};
pub use render::RenderManager;
pub use scene::{ClothScene, SceneError};
pub use state::{ClothState, StateCell};
