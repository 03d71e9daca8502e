//! # Drape Mesh
//!
//! The mesh half of the cloth build pipeline:
//! - **Sources**: value snapshots of renderer meshes and bone hierarchies
//! - **Paint maps**: mip-selected decoding and per-vertex sampling
//! - **Selection**: per-point attributes in cloth space, merged additively
//! - **VirtualMesh**: import, crop, merge, reduction, optimization,
//!   attribute transfer, proxy conversion and mapping
//! - **Containers**: exclusive or shared ownership of finished meshes

pub mod attribute;
pub mod container;
pub mod grid;
pub mod paint;
pub mod selection;
pub mod source;
pub mod vmesh;

pub use attribute::VertexAttribute;
pub use container::{UniqueMeshData, VirtualMeshContainer};
pub use paint::{PaintMapData, PaintMode, PaintReadFlags, PaintTexture};
pub use selection::SelectionData;
pub use source::{
    BoneConnectionMode, BoneHierarchy, BoneNode, BoneSetup, RenderSetup, RendererId, SkinWeight,
};
pub use vmesh::{
    selection_margin, MappingData, MeshSource, MeshStage, ProxyData, ProxySettings, VertexBinding,
    VirtualMesh,
};
