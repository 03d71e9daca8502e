//! Selection data
//!
//! A selection is a point cloud in cloth-local space where each point
//! carries a [`VertexAttribute`]. Proxy vertices take the attribute of the
//! nearest selection point, and render meshes are cropped to the region
//! around the selection's active points.

use drape_core::limits::WELD_DISTANCE;
use drape_core::math::{relative_matrix, transform_distance};
use drape_core::{ErrorCode, TransformRecord};
use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::attribute::VertexAttribute;
use crate::grid::SpatialGrid;
use crate::paint::PaintMapData;
use crate::vmesh::VirtualMesh;

/// Per-point attributes in cloth-local space
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionData {
    /// Point positions
    pub positions: Vec<Vec3>,
    /// Point attributes
    pub attributes: Vec<VertexAttribute>,
    /// Largest vertex spacing of the source, bounds attribute lookups
    pub max_connection_distance: f32,
    /// Authored or painted by a user (merged additively)
    pub user_edit: bool,
}

impl SelectionData {
    /// Create a selection from parallel arrays
    pub fn new(positions: Vec<Vec3>, attributes: Vec<VertexAttribute>, max_connection_distance: f32) -> Self {
        Self {
            positions,
            attributes,
            max_connection_distance,
            user_edit: false,
        }
    }

    /// Selection covering every vertex of a mesh, all attributes empty
    pub fn from_mesh(mesh: &VirtualMesh) -> Self {
        Self {
            positions: mesh.local_positions.clone(),
            attributes: vec![VertexAttribute::empty(); mesh.vertex_count()],
            max_connection_distance: mesh.max_vertex_distance,
            user_edit: false,
        }
    }

    /// Sample a paint map at every render vertex's uv.
    ///
    /// Positions are converted from renderer space into cloth space.
    pub fn from_paint_map(
        cloth: &TransformRecord,
        render_mesh: &VirtualMesh,
        paint_map: &PaintMapData,
    ) -> Result<Self, ErrorCode> {
        if render_mesh.uv.len() != render_mesh.vertex_count() {
            return Err(ErrorCode::MissingUvChannel);
        }
        let to_cloth = relative_matrix(render_mesh.init_local_to_world, cloth.world_to_local());

        let (positions, attributes): (Vec<Vec3>, Vec<VertexAttribute>) = render_mesh
            .local_positions
            .par_iter()
            .zip(render_mesh.uv.par_iter())
            .map(|(p, uv)| (to_cloth.transform_point3(*p), paint_map.attribute_at(*uv)))
            .unzip();

        Ok(Self {
            positions,
            attributes,
            max_connection_distance: transform_distance(render_mesh.max_vertex_distance, to_cloth),
            user_edit: true,
        })
    }

    /// Use an explicit attribute per render vertex.
    pub fn from_vertex_attributes(
        cloth: &TransformRecord,
        render_mesh: &VirtualMesh,
        attributes: &[VertexAttribute],
    ) -> Result<Self, ErrorCode> {
        if attributes.len() != render_mesh.vertex_count() {
            return Err(ErrorCode::VertexAttributeListDataMismatch);
        }
        let to_cloth = relative_matrix(render_mesh.init_local_to_world, cloth.world_to_local());
        let positions = render_mesh
            .local_positions
            .par_iter()
            .map(|p| to_cloth.transform_point3(*p))
            .collect();

        Ok(Self {
            positions,
            attributes: attributes.to_vec(),
            max_connection_distance: transform_distance(render_mesh.max_vertex_distance, to_cloth),
            user_edit: true,
        })
    }

    /// Number of points
    pub fn count(&self) -> usize {
        self.positions.len()
    }

    /// Non-empty with parallel arrays of equal length
    pub fn is_valid(&self) -> bool {
        !self.positions.is_empty() && self.positions.len() == self.attributes.len()
    }

    /// Check parallel array lengths
    pub fn validate(&self) -> Result<(), ErrorCode> {
        if self.positions.len() == self.attributes.len() {
            Ok(())
        } else {
            Err(ErrorCode::SelectionDataMismatch)
        }
    }

    /// Set every attribute
    pub fn fill(&mut self, attribute: VertexAttribute) {
        self.attributes.fill(attribute);
    }

    /// Whether any point is movable or fixed
    pub fn has_active(&self) -> bool {
        self.attributes.iter().any(|a| !a.is_invalid())
    }

    /// Points that are movable or fixed
    pub fn active_positions(&self) -> Vec<Vec3> {
        self.positions
            .iter()
            .zip(&self.attributes)
            .filter(|(_, a)| !a.is_invalid())
            .map(|(p, _)| *p)
            .collect()
    }

    /// Union another selection into this one.
    ///
    /// Coincident points combine their flags; every other point is appended.
    /// No flag is ever lost.
    pub fn merge(&mut self, other: &SelectionData) {
        if other.positions.is_empty() {
            return;
        }
        let mut grid = SpatialGrid::from_points(&self.positions, WELD_DISTANCE * 4.0);
        for (p, attr) in other.positions.iter().zip(&other.attributes) {
            match grid.nearest(&self.positions, *p, WELD_DISTANCE) {
                Some((i, _)) => self.attributes[i as usize] |= *attr,
                None => {
                    let index = self.positions.len() as u32;
                    self.positions.push(*p);
                    self.attributes.push(*attr);
                    grid.insert(index, *p);
                }
            }
        }
        self.max_connection_distance = self.max_connection_distance.max(other.max_connection_distance);
        self.user_edit |= other.user_edit;
    }
}
