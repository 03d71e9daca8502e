//! # Drape Constraints
//!
//! Pure builders from a finished proxy mesh and [`ClothParameters`] to the
//! constraint blocks the frame solver consumes. A builder returns `None` when
//! the mesh has nothing for that constraint type.

pub mod bending;
pub mod distance;
pub mod inertia;

use drape_core::{BuildResult, CancellationToken, ClothParameters};
use drape_mesh::VirtualMesh;
use serde::{Deserialize, Serialize};

pub use bending::BendingConstraintData;
pub use distance::{DistanceConstraintData, DistanceKind};
pub use inertia::InertiaConstraintData;

/// Every constraint block of one cloth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    /// Distance links
    pub distance: Option<DistanceConstraintData>,
    /// Bending pairs
    pub bending: Option<BendingConstraintData>,
    /// Inertia reference
    pub inertia: Option<InertiaConstraintData>,
}

impl ConstraintSet {
    /// Build all constraint blocks; the first failure aborts.
    pub fn build(mesh: &VirtualMesh, params: &ClothParameters, cancel: &CancellationToken) -> BuildResult<Self> {
        let _span = tracing::debug_span!("constraints", vertices = mesh.vertex_count()).entered();
        cancel.check()?;
        let distance = distance::build(mesh, params)?;
        cancel.check()?;
        let bending = bending::build(mesh, params)?;
        cancel.check()?;
        let inertia = inertia::build(mesh, params)?;
        Ok(Self {
            distance,
            bending,
            inertia,
        })
    }

    /// Whether no block was produced
    pub fn is_empty(&self) -> bool {
        self.distance.is_none() && self.bending.is_none() && self.inertia.is_none()
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use drape_core::{CancellationToken, TransformId, TransformRecord};
    use drape_mesh::{ProxySettings, RenderSetup, RendererId, SelectionData, VertexAttribute, VirtualMesh};
    use glam::Vec3;

    /// Proxy sheet of `cols` x `rows` at 0.1 spacing with the top row fixed
    pub fn sheet(cols: u32, rows: u32) -> VirtualMesh {
        let mut positions = Vec::new();
        for r in 0..rows {
            for c in 0..cols {
                positions.push(Vec3::new(c as f32 * 0.1, -(r as f32) * 0.1, 0.0));
            }
        }
        let mut triangles = Vec::new();
        for r in 0..rows - 1 {
            for c in 0..cols - 1 {
                let i = r * cols + c;
                triangles.push([i, i + cols, i + 1]);
                triangles.push([i + 1, i + cols, i + cols + 1]);
            }
        }
        let setup = RenderSetup {
            renderer_id: RendererId(1),
            name: "sheet".into(),
            transform: TransformRecord::from_position(TransformId(1), Vec3::ZERO),
            positions,
            triangles,
            ..Default::default()
        };

        let mut render = VirtualMesh::new("render");
        render.import_render(&setup, 0).unwrap();
        let mut proxy = VirtualMesh::new_proxy("proxy", &TransformRecord::IDENTITY);
        proxy.add_mesh(&render).unwrap();
        proxy.assign_join_indices().unwrap();
        proxy.optimize().unwrap();

        let mut selection = SelectionData::from_mesh(&proxy);
        for (p, a) in selection.positions.iter().zip(selection.attributes.iter_mut()) {
            *a = if p.y.abs() < 1e-5 { VertexAttribute::FIXED } else { VertexAttribute::MOVE };
        }
        proxy.apply_selection_attribute(&selection).unwrap();
        proxy
            .convert_to_proxy(&ProxySettings::default(), &CancellationToken::new())
            .unwrap();
        proxy
    }
}
