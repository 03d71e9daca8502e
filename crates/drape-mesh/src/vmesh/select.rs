//! Cropping by selection and selection attribute transfer

use drape_core::limits::{MINIMUM_GRID_SIZE, WELD_DISTANCE};
use drape_core::math::relative_matrix;
use drape_core::{ErrorCode, ReductionSettings, TransformRecord};
use rayon::prelude::*;

use super::{MeshStage, VirtualMesh};
use crate::attribute::VertexAttribute;
use crate::grid::SpatialGrid;
use crate::selection::SelectionData;

/// Crop margin around selection points.
///
/// Covers the furthest a reduced vertex can drift from its survivor, and is
/// never smaller than [`MINIMUM_GRID_SIZE`].
pub fn selection_margin(reduction: &ReductionSettings) -> f32 {
    let drift = WELD_DISTANCE + reduction.simple_distance.max(0.0) + reduction.shape_distance.max(0.0);
    drift.max(MINIMUM_GRID_SIZE)
}

impl VirtualMesh {
    /// Keep only vertices within `margin` of an active selection point.
    ///
    /// Selection positions are cloth-local; `cloth` converts this mesh into
    /// that space. Triangles and lines survive only if all their vertices do.
    pub fn crop_to_selection(
        &mut self,
        selection: &SelectionData,
        cloth: &TransformRecord,
        margin: f32,
    ) -> Result<(), ErrorCode> {
        self.require(MeshStage::Imported, MeshStage::Imported)?;
        selection.validate()?;

        let active = selection.active_positions();
        let to_cloth = relative_matrix(self.init_local_to_world, cloth.world_to_local());
        let grid = SpatialGrid::from_points(&active, margin.max(MINIMUM_GRID_SIZE));

        let keep: Vec<bool> = self
            .local_positions
            .par_iter()
            .map(|p| grid.nearest(&active, to_cloth.transform_point3(*p), margin).is_some())
            .collect();

        let mut remap = vec![u32::MAX; self.vertex_count()];
        let mut next = 0u32;
        for (i, k) in keep.iter().enumerate() {
            if *k {
                remap[i] = next;
                next += 1;
            }
        }

        fn retain<T: Clone>(values: &[T], keep: &[bool]) -> Vec<T> {
            if values.len() != keep.len() {
                return values.to_vec();
            }
            values.iter().zip(keep).filter(|(_, k)| **k).map(|(v, _)| v.clone()).collect()
        }

        self.local_positions = retain(&self.local_positions, &keep);
        self.local_normals = retain(&self.local_normals, &keep);
        self.local_tangents = retain(&self.local_tangents, &keep);
        self.uv = retain(&self.uv, &keep);
        self.attributes = retain(&self.attributes, &keep);
        self.skin_weights = retain(&self.skin_weights, &keep);
        self.reference_indices = retain(&self.reference_indices, &keep);

        self.triangles = self
            .triangles
            .iter()
            .filter(|t| t.iter().all(|&i| keep[i as usize]))
            .map(|t| t.map(|i| remap[i as usize]))
            .collect();
        self.lines = self
            .lines
            .iter()
            .filter(|l| l.iter().all(|&i| keep[i as usize]))
            .map(|l| l.map(|i| remap[i as usize]))
            .collect();

        self.update_stats();
        self.set_stage(MeshStage::Selected);
        Ok(())
    }

    /// Copy attributes from the nearest selection points.
    ///
    /// Points tied for nearest (within the weld distance) contribute the union
    /// of their flags. Vertices with no point inside the search radius stay
    /// invalid.
    pub fn apply_selection_attribute(&mut self, selection: &SelectionData) -> Result<(), ErrorCode> {
        self.require(MeshStage::Optimized, MeshStage::Optimized)?;
        selection.validate()?;

        let radius = selection
            .max_connection_distance
            .max(self.max_vertex_distance)
            .max(MINIMUM_GRID_SIZE);
        let grid = SpatialGrid::from_points(&selection.positions, radius);

        self.attributes = self
            .local_positions
            .par_iter()
            .map(|p| {
                let Some((_, nearest)) = grid.nearest(&selection.positions, *p, radius) else {
                    return VertexAttribute::empty();
                };
                let mut attr = VertexAttribute::empty();
                grid.for_each_near(*p, nearest + WELD_DISTANCE, |i| {
                    if selection.positions[i as usize].distance(*p) <= nearest + WELD_DISTANCE {
                        attr |= selection.attributes[i as usize];
                    }
                });
                attr
            })
            .collect();

        self.set_stage(MeshStage::Attributed);
        Ok(())
    }
}
