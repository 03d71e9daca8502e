//! Inertia constraint
//!
//! Captures the fixed set and its center so the solver can separate the
//! cloth's own motion from the motion of whatever it is attached to.

use drape_core::config::InertiaParams;
use drape_core::{ClothParameters, ErrorCode};
use drape_mesh::VirtualMesh;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Inertia reference data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InertiaConstraintData {
    /// Fixed proxy vertices
    pub fixed_indices: Vec<u32>,
    /// Center of the fixed set in proxy space
    pub center: Vec3,
    /// Offset of each fixed vertex from `center`
    pub fixed_offsets: Vec<Vec3>,
    /// Limits and influences
    pub params: InertiaParams,
}

/// Build inertia data. Present for every proxy mesh.
pub fn build(mesh: &VirtualMesh, params: &ClothParameters) -> Result<Option<InertiaConstraintData>, ErrorCode> {
    let proxy = mesh.proxy.as_ref().ok_or(ErrorCode::InvalidStage)?;
    if proxy.fixed_indices.iter().any(|&i| i as usize >= mesh.vertex_count()) {
        return Err(ErrorCode::ConstraintException);
    }

    let fixed_offsets = proxy
        .fixed_indices
        .iter()
        .map(|&i| mesh.local_positions[i as usize] - proxy.center)
        .collect();

    Ok(Some(InertiaConstraintData {
        fixed_indices: proxy.fixed_indices.clone(),
        center: proxy.center,
        fixed_offsets,
        params: params.inertia,
    }))
}
