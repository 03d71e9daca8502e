//! Mapping a render mesh onto a finished proxy mesh

use drape_core::math::relative_matrix;
use drape_core::{BuildResult, ErrorCode};
use glam::{Mat4, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::{MeshStage, VirtualMesh};
use crate::grid::{nearest_linear, SpatialGrid};

/// Interpolation of one render vertex from up to four proxy vertices
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VertexBinding {
    /// Proxy vertex indices, `indices[0]` is the primary vertex
    pub indices: [u32; 4],
    /// Inverse-distance weights summing to 1
    pub weights: [f32; 4],
    /// Render position minus primary proxy position, proxy space
    pub offset: Vec3,
}

/// Render-to-proxy interpolation data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingData {
    /// Render-local to proxy-local at build time
    pub to_proxy: Mat4,
    /// One binding per render vertex
    pub bindings: Vec<VertexBinding>,
    /// Largest primary offset
    pub max_offset: f32,
}

impl VirtualMesh {
    /// Bind every vertex of this render mesh to the proxy.
    ///
    /// With a `merge_offset` the primary proxy vertex comes from the proxy's
    /// join indices; otherwise the nearest proxy vertex is searched.
    pub fn mapping(&mut self, proxy: &VirtualMesh, merge_offset: Option<u32>) -> BuildResult<()> {
        if !matches!(self.stage(), MeshStage::Imported | MeshStage::Selected) || !proxy.is_proxy() {
            return Err(ErrorCode::InvalidStage.into());
        }
        let Some(data) = proxy.proxy.as_ref() else {
            return Err(ErrorCode::InvalidStage.into());
        };
        if proxy.vertex_count() == 0 {
            return Err(ErrorCode::EmptyMesh.into());
        }

        let to_proxy = relative_matrix(self.init_local_to_world, proxy.init_world_to_local());
        let search = proxy.max_vertex_distance.max(proxy.average_vertex_distance).max(1e-3) * 2.0;
        let grid = SpatialGrid::from_points(&proxy.local_positions, search);

        let bindings: Vec<VertexBinding> = self
            .local_positions
            .par_iter()
            .enumerate()
            .map(|(v, p)| {
                let p = to_proxy.transform_point3(*p);
                let joined = merge_offset
                    .and_then(|o| proxy.join_index(o as usize + v))
                    .filter(|&j| (j as usize) < proxy.vertex_count());
                let primary = joined
                    .or_else(|| grid.nearest(&proxy.local_positions, p, search).map(|(i, _)| i))
                    .or_else(|| nearest_linear(&proxy.local_positions, p).map(|(i, _)| i))
                    .unwrap_or(0);
                bind(proxy, data.neighbors_of(primary), primary, p)
            })
            .collect();

        let max_offset = bindings.iter().map(|b| b.offset.length()).fold(0.0, f32::max);
        self.mapping = Some(MappingData {
            to_proxy,
            bindings,
            max_offset,
        });
        log::debug!("(MAPPING) {} -> {} max offset:{:.5}", self.name, proxy.name, max_offset);
        self.set_stage(MeshStage::Mapped);
        Ok(())
    }
}

fn bind(proxy: &VirtualMesh, neighbors: &[u32], primary: u32, p: Vec3) -> VertexBinding {
    let mut candidates: SmallVec<[(u32, f32); 8]> = SmallVec::new();
    candidates.push((primary, proxy.local_positions[primary as usize].distance(p)));
    for &n in neighbors {
        candidates.push((n, proxy.local_positions[n as usize].distance(p)));
    }
    candidates[1..].sort_by(|a, b| a.1.total_cmp(&b.1));
    candidates.truncate(4);

    let mut binding = VertexBinding {
        offset: p - proxy.local_positions[primary as usize],
        ..Default::default()
    };
    if candidates[0].1 < 1e-6 {
        binding.indices[0] = primary;
        binding.weights[0] = 1.0;
        return binding;
    }
    let total: f32 = candidates.iter().map(|c| 1.0 / c.1.max(1e-6)).sum();
    for (slot, (index, d)) in candidates.iter().enumerate() {
        binding.indices[slot] = *index;
        binding.weights[slot] = (1.0 / d.max(1e-6)) / total;
    }
    binding
}
