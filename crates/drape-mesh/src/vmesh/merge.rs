//! Combining render meshes into the proxy mesh

use ahash::AHashMap;
use drape_core::math::relative_matrix;
use drape_core::{ErrorCode, TransformId};
use glam::{Vec2, Vec3};
use rayon::prelude::*;

use super::{MeshStage, VirtualMesh};

impl VirtualMesh {
    /// Append an imported (optionally cropped) mesh, converting it into this
    /// mesh's space.
    ///
    /// Skinning transforms are shared by identity. Returns the vertex offset
    /// of the appended mesh, which is also recorded in `merge_offsets`.
    pub fn add_mesh(&mut self, other: &VirtualMesh) -> Result<u32, ErrorCode> {
        let ready = matches!(self.stage(), MeshStage::Empty | MeshStage::Merged)
            && matches!(other.stage(), MeshStage::Imported | MeshStage::Selected);
        if !ready {
            log::debug!("{}: cannot merge {} at {:?}", self.name, other.name, other.stage());
            return Err(ErrorCode::InvalidStage);
        }

        let offset = self.vertex_count() as u32;
        let to_self = relative_matrix(other.init_local_to_world, self.init_world_to_local());

        self.local_positions
            .par_extend(other.local_positions.par_iter().map(|p| to_self.transform_point3(*p)));
        self.local_normals.par_extend(
            other
                .local_normals
                .par_iter()
                .map(|n| to_self.transform_vector3(*n).normalize_or(Vec3::Y)),
        );
        self.local_tangents.par_extend(
            other
                .local_tangents
                .par_iter()
                .map(|t| to_self.transform_vector3(*t).normalize_or(Vec3::X)),
        );

        if other.uv.len() == other.vertex_count() {
            if self.uv.len() != offset as usize {
                self.uv.resize(offset as usize, Vec2::ZERO);
            }
            self.uv.extend_from_slice(&other.uv);
        } else {
            self.uv.resize(self.vertex_count(), Vec2::ZERO);
        }
        self.attributes.extend_from_slice(&other.attributes);

        let mut by_id: AHashMap<TransformId, u32> = self
            .transforms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.id.is_some())
            .map(|(i, t)| (t.id, i as u32))
            .collect();
        let remap: Vec<u32> = other
            .transforms
            .iter()
            .map(|t| {
                if t.id.is_some() {
                    if let Some(&i) = by_id.get(&t.id) {
                        return i;
                    }
                }
                let i = self.transforms.len() as u32;
                self.transforms.push(*t);
                if t.id.is_some() {
                    by_id.insert(t.id, i);
                }
                i
            })
            .collect();
        self.skin_weights.extend(other.skin_weights.iter().map(|w| {
            let mut w = *w;
            for (index, weight) in w.indices.iter_mut().zip(w.weights) {
                if weight > 0.0 {
                    *index = remap.get(*index as usize).copied().unwrap_or(0);
                }
            }
            w
        }));

        self.triangles
            .extend(other.triangles.iter().map(|t| t.map(|i| i + offset)));
        self.lines.extend(other.lines.iter().map(|l| l.map(|i| i + offset)));
        self.reference_indices.extend(offset..offset + other.vertex_count() as u32);

        self.merge_offsets.push(offset);
        self.update_stats();
        self.set_stage(MeshStage::Merged);
        Ok(offset)
    }
}
