//! Triangle bending constraint
//!
//! Every interior edge shared by exactly two triangles yields one bending
//! pair `[a, b, c, d]`: `a`-`b` is the shared edge, `c` and `d` the opposite
//! vertices. The rest dihedral angle is signed.

use ahash::AHashMap;
use drape_core::{ClothParameters, ErrorCode};
use drape_mesh::VirtualMesh;
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Dihedral bending pairs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BendingConstraintData {
    /// Vertex quads `[edge a, edge b, opposite c, opposite d]`
    pub pairs: Vec<[u32; 4]>,
    /// Signed rest angle of each pair, radians
    pub rest_angles: Vec<f32>,
    /// Constraint stiffness
    pub stiffness: f32,
}

impl BendingConstraintData {
    /// Number of pairs
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }
}

/// Signed dihedral angle across edge `a`-`b` between triangles `(a, b, c)` and `(a, b, d)`.
pub fn dihedral_angle(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> f32 {
    let edge = b - a;
    let n1 = (c - a).cross(edge).normalize_or_zero();
    let n2 = edge.cross(d - a).normalize_or_zero();
    let sin = n1.cross(n2).dot(edge.normalize_or_zero());
    let cos = n1.dot(n2);
    sin.atan2(cos)
}

/// Build bending pairs; `None` when disabled or no edge is shared by two triangles.
pub fn build(mesh: &VirtualMesh, params: &ClothParameters) -> Result<Option<BendingConstraintData>, ErrorCode> {
    if mesh.proxy.is_none() {
        return Err(ErrorCode::InvalidStage);
    }
    if params.bending.stiffness <= 0.0 || mesh.triangle_count() < 2 {
        return Ok(None);
    }

    let mut edge_triangles: AHashMap<[u32; 2], Vec<u32>> = AHashMap::new();
    for (ti, t) in mesh.triangles.iter().enumerate() {
        for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
            let key = if a < b { [a, b] } else { [b, a] };
            edge_triangles.entry(key).or_default().push(ti as u32);
        }
    }

    let mut keys: Vec<[u32; 2]> = edge_triangles
        .iter()
        .filter(|(_, tris)| tris.len() == 2)
        .map(|(k, _)| *k)
        .collect();
    keys.sort_unstable();

    let mut data = BendingConstraintData {
        stiffness: params.bending.stiffness,
        ..Default::default()
    };
    for [a, b] in keys {
        let tris = &edge_triangles[&[a, b]];
        let opposite = |ti: u32| -> Result<u32, ErrorCode> {
            mesh.triangles[ti as usize]
                .iter()
                .copied()
                .find(|v| *v != a && *v != b)
                .ok_or(ErrorCode::ConstraintException)
        };
        let c = opposite(tris[0])?;
        let d = opposite(tris[1])?;
        let quad = [a, b, c, d];
        if quad.iter().all(|&v| !mesh.attributes[v as usize].is_move()) {
            continue;
        }
        let p = quad.map(|v| mesh.local_positions[v as usize]);
        data.pairs.push(quad);
        data.rest_angles.push(dihedral_angle(p[0], p[1], p[2], p[3]));
    }

    if data.pairs.is_empty() {
        return Ok(None);
    }
    log::debug!("bending constraint: {} pairs", data.pair_count());
    Ok(Some(data))
}
