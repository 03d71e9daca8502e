//! Distance constraint
//!
//! Keeps each movable vertex at its rest distance from its proxy
//! neighbours. Links are stored per vertex in CSR form.

use drape_core::{ClothParameters, ErrorCode};
use drape_mesh::VirtualMesh;
use serde::{Deserialize, Serialize};

/// Direction of a distance link relative to the fixed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceKind {
    /// Parent-child link along the depth gradient
    Vertical,
    /// Any other link
    Horizontal,
}

/// Per-vertex distance links
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistanceConstraintData {
    /// Start of each vertex's links (length = vertices + 1)
    pub starts: Vec<u32>,
    /// Target vertex of each link
    pub targets: Vec<u32>,
    /// Rest length of each link
    pub rest_lengths: Vec<f32>,
    /// Kind of each link
    pub kinds: Vec<DistanceKind>,
    /// Stiffness of each vertex, by depth
    pub stiffness: Vec<f32>,
}

impl DistanceConstraintData {
    /// Total number of links
    pub fn link_count(&self) -> usize {
        self.targets.len()
    }

    /// Links of one vertex as `(target, rest_length, kind)`
    pub fn links(&self, vertex: u32) -> impl Iterator<Item = (u32, f32, DistanceKind)> + '_ {
        let v = vertex as usize;
        let (s, e) = match (self.starts.get(v), self.starts.get(v + 1)) {
            (Some(&s), Some(&e)) => (s as usize, e as usize),
            _ => (0, 0),
        };
        (s..e).map(move |i| (self.targets[i], self.rest_lengths[i], self.kinds[i]))
    }
}

/// Build distance links for a proxy mesh; `None` when there is nothing to constrain.
pub fn build(mesh: &VirtualMesh, params: &ClothParameters) -> Result<Option<DistanceConstraintData>, ErrorCode> {
    let proxy = mesh.proxy.as_ref().ok_or(ErrorCode::InvalidStage)?;
    let n = mesh.vertex_count();
    if proxy.vertex_depths.len() != n || proxy.vertex_parent_indices.len() != n {
        return Err(ErrorCode::ConstraintException);
    }

    let mut data = DistanceConstraintData {
        starts: Vec::with_capacity(n + 1),
        stiffness: Vec::with_capacity(n),
        ..Default::default()
    };
    data.starts.push(0);

    for v in 0..n as u32 {
        let attr = mesh.attributes[v as usize];
        data.stiffness
            .push(params.distance.stiffness.evaluate(proxy.vertex_depths[v as usize]));
        if attr.is_move() {
            for &u in proxy.neighbors_of(v) {
                if mesh.attributes[u as usize].is_invalid() {
                    continue;
                }
                let rest = mesh.local_positions[v as usize].distance(mesh.local_positions[u as usize]);
                let vertical = proxy.vertex_parent_indices[v as usize] == Some(u)
                    || proxy.vertex_parent_indices[u as usize] == Some(v);
                data.targets.push(u);
                data.rest_lengths.push(rest);
                data.kinds.push(if vertical {
                    DistanceKind::Vertical
                } else {
                    DistanceKind::Horizontal
                });
            }
        }
        data.starts.push(data.targets.len() as u32);
    }

    if data.targets.is_empty() {
        return Ok(None);
    }
    log::debug!("distance constraint: {} links", data.link_count());
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sheet;
    use drape_core::CurveRange;

    #[test]
    fn test_links_skip_fixed_pairs() {
        let mesh = sheet(3, 3);
        let data = build(&mesh, &ClothParameters::default()).unwrap().unwrap();
        // fixed top row has no links of its own
        assert_eq!(data.links(0).count(), 0);
        assert!(data.links(4).count() > 0);
        assert!(data
            .links(3)
            .any(|(t, rest, kind)| t == 0 && kind == DistanceKind::Vertical && (rest - 0.1).abs() < 1e-5));
    }

    #[test]
    fn test_stiffness_by_depth() {
        let mesh = sheet(2, 3);
        let mut params = ClothParameters::default();
        params.distance.stiffness = CurveRange { start: 1.0, end: 0.5 };
        let data = build(&mesh, &params).unwrap().unwrap();
        assert_eq!(data.stiffness[0], 1.0);
        assert!((data.stiffness[5] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_all_fixed_is_none() {
        let mut mesh = sheet(2, 2);
        mesh.attributes.fill(drape_mesh::VertexAttribute::FIXED);
        assert!(build(&mesh, &ClothParameters::default()).unwrap().is_none());
    }

    #[test]
    fn test_requires_proxy() {
        let mesh = VirtualMesh::new("raw");
        assert_eq!(build(&mesh, &ClothParameters::default()), Err(ErrorCode::InvalidStage));
    }
}
