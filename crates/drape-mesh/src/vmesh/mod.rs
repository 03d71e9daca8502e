//! VirtualMesh
//!
//! The mutable working mesh of the build pipeline. A mesh moves through
//! [`MeshStage`]s in a fixed order; each pipeline operation checks the stage
//! it expects and fails with [`ErrorCode::InvalidStage`] otherwise.
//!
//! Render meshes live in renderer-local space. The proxy mesh lives in
//! cloth-local space (`init_local_to_world` is the cloth transform).

mod import;
mod mapping;
mod merge;
mod optimize;
mod proxy;
mod reduction;
mod select;

pub use mapping::{MappingData, VertexBinding};
pub use proxy::{ProxyData, ProxySettings};
pub use select::selection_margin;

use drape_core::limits::{MAX_PROXY_EDGE_COUNT, MAX_PROXY_TRIANGLE_COUNT, MAX_PROXY_VERTEX_COUNT};
use drape_core::{Aabb, ErrorCode, TransformRecord};
use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::attribute::VertexAttribute;
use crate::source::SkinWeight;

/// Pipeline position of a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum MeshStage {
    /// Freshly created
    #[default]
    Empty,
    /// Source geometry imported
    Imported,
    /// Cropped to a selection
    Selected,
    /// Combined from one or more imported meshes
    Merged,
    /// Polygon reduction applied
    Reduced,
    /// Topology cleaned
    Optimized,
    /// Selection attributes applied
    Attributed,
    /// Converted to a simulation proxy
    Proxy,
    /// Mapped onto a proxy
    Mapped,
}

/// What a mesh was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeshSource {
    /// Renderer geometry
    #[default]
    Render,
    /// Bone hierarchy
    Bone,
}

/// Working mesh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualMesh {
    /// Display name
    pub name: String,
    /// Source kind
    pub source: MeshSource,
    stage: MeshStage,

    /// Vertex positions in mesh-local space
    pub local_positions: Vec<Vec3>,
    /// Vertex normals
    pub local_normals: Vec<Vec3>,
    /// Vertex tangents
    pub local_tangents: Vec<Vec3>,
    /// Vertex uvs (empty when the source had none)
    pub uv: Vec<Vec2>,
    /// Vertex attributes
    pub attributes: Vec<VertexAttribute>,
    /// Vertex skinning into `transforms`
    pub skin_weights: Vec<SkinWeight>,

    /// Triangles
    pub triangles: Vec<[u32; 3]>,
    /// Lines (bone links and loose edges)
    pub lines: Vec<[u32; 2]>,

    /// Skinning transforms
    pub transforms: Vec<TransformRecord>,
    /// Local-to-world at import time
    pub init_local_to_world: Mat4,

    /// Original import index of each vertex after cropping
    pub reference_indices: Vec<u32>,
    /// Merged-vertex index to current vertex index (empty until assigned)
    pub join_indices: Vec<u32>,
    /// Start of each merged mesh inside `join_indices`
    pub merge_offsets: Vec<u32>,

    /// Average edge length
    pub average_vertex_distance: f32,
    /// Longest edge length
    pub max_vertex_distance: f32,
    /// Local bounds
    pub bounds: Aabb,

    /// Proxy data, present from [`MeshStage::Proxy`]
    pub proxy: Option<ProxyData>,
    /// Mapping data, present from [`MeshStage::Mapped`]
    pub mapping: Option<MappingData>,
}

impl VirtualMesh {
    /// Create an empty mesh
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            init_local_to_world: Mat4::IDENTITY,
            ..Default::default()
        }
    }

    /// Create an empty proxy mesh in cloth space
    pub fn new_proxy(name: impl Into<String>, cloth: &TransformRecord) -> Self {
        Self {
            name: name.into(),
            init_local_to_world: cloth.local_to_world(),
            ..Default::default()
        }
    }

    /// Current stage
    pub fn stage(&self) -> MeshStage {
        self.stage
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.local_positions.len()
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Number of lines
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Number of unique edges (only known after proxy conversion)
    pub fn edge_count(&self) -> usize {
        self.proxy.as_ref().map_or(0, |p| p.edges.len())
    }

    /// World-to-local at import time
    pub fn init_world_to_local(&self) -> Mat4 {
        self.init_local_to_world.inverse()
    }

    /// Whether the mesh holds geometry with consistent arrays
    pub fn is_valid(&self) -> bool {
        let n = self.vertex_count();
        n > 0
            && self.local_normals.len() == n
            && self.local_tangents.len() == n
            && self.attributes.len() == n
            && self.skin_weights.len() == n
            && (self.uv.is_empty() || self.uv.len() == n)
    }

    /// Whether proxy conversion finished
    pub fn is_proxy(&self) -> bool {
        self.stage >= MeshStage::Proxy && self.proxy.is_some()
    }

    /// Number of movable vertices
    pub fn move_count(&self) -> usize {
        self.attributes.iter().filter(|a| a.is_move()).count()
    }

    /// Number of fixed vertices
    pub fn fixed_count(&self) -> usize {
        self.attributes.iter().filter(|a| a.is_fixed()).count()
    }

    /// Enforce the 16-bit element limits of proxy meshes
    pub fn check_proxy_capacity(&self) -> Result<(), ErrorCode> {
        if self.vertex_count() > MAX_PROXY_VERTEX_COUNT {
            return Err(ErrorCode::ProxyVertexOverflow);
        }
        if self.edge_count() > MAX_PROXY_EDGE_COUNT {
            return Err(ErrorCode::ProxyEdgeOverflow);
        }
        if self.triangle_count() > MAX_PROXY_TRIANGLE_COUNT {
            return Err(ErrorCode::ProxyTriangleOverflow);
        }
        Ok(())
    }

    /// Join index of a merged vertex
    pub fn join_index(&self, merged_index: usize) -> Option<u32> {
        self.join_indices.get(merged_index).copied()
    }

    /// Fill `join_indices` with the identity mapping if absent
    pub fn assign_join_indices(&mut self) -> Result<(), ErrorCode> {
        self.require(MeshStage::Imported, MeshStage::Merged)?;
        if self.join_indices.is_empty() {
            self.join_indices = (0..self.vertex_count() as u32).collect();
        }
        Ok(())
    }

    fn require(&self, min: MeshStage, max: MeshStage) -> Result<(), ErrorCode> {
        if self.stage >= min && self.stage <= max {
            Ok(())
        } else {
            log::debug!("{}: stage {:?} outside {:?}..={:?}", self.name, self.stage, min, max);
            Err(ErrorCode::InvalidStage)
        }
    }

    fn set_stage(&mut self, stage: MeshStage) {
        self.stage = stage;
    }

    /// Recompute bounds and edge statistics
    pub(crate) fn update_stats(&mut self) {
        self.bounds = Aabb::from_points(self.local_positions.iter());

        let mut total = 0.0f32;
        let mut longest = 0.0f32;
        let mut count = 0usize;
        let mut visit = |a: u32, b: u32| {
            let d = self.local_positions[a as usize].distance(self.local_positions[b as usize]);
            total += d;
            longest = longest.max(d);
            count += 1;
        };
        for t in &self.triangles {
            visit(t[0], t[1]);
            visit(t[1], t[2]);
            visit(t[2], t[0]);
        }
        for l in &self.lines {
            visit(l[0], l[1]);
        }
        self.average_vertex_distance = if count > 0 { total / count as f32 } else { 0.0 };
        self.max_vertex_distance = longest;
    }

    /// Area weighted vertex normals from triangles; untouched where a vertex has none
    pub(crate) fn recompute_normals(&mut self) {
        let mut sums = vec![Vec3::ZERO; self.vertex_count()];
        for t in &self.triangles {
            let [a, b, c] = t.map(|i| self.local_positions[i as usize]);
            let n = (b - a).cross(c - a);
            for &i in t {
                sums[i as usize] += n;
            }
        }
        for (normal, sum) in self.local_normals.iter_mut().zip(sums) {
            if let Some(n) = sum.try_normalize() {
                *normal = n;
            }
        }
    }
}

impl std::fmt::Display for VirtualMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:?}] v:{} t:{} l:{} e:{} move:{} fixed:{} avg:{:.4} max:{:.4}",
            self.name,
            self.stage,
            self.vertex_count(),
            self.triangle_count(),
            self.line_count(),
            self.edge_count(),
            self.move_count(),
            self.fixed_count(),
            self.average_vertex_distance,
            self.max_vertex_distance,
        )
    }
}
