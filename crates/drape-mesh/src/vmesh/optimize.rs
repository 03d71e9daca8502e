//! Topology cleanup

use ahash::AHashSet;
use drape_core::math::triangle_normal;
use drape_core::ErrorCode;

use super::{MeshStage, VirtualMesh};

impl VirtualMesh {
    /// Drop degenerate and duplicate triangles and lines, remove lines
    /// already covered by a triangle edge, orient triangles with their vertex
    /// normals and recompute normals.
    pub fn optimize(&mut self) -> Result<(), ErrorCode> {
        self.require(MeshStage::Imported, MeshStage::Reduced)?;
        let before = (self.triangles.len(), self.lines.len());

        let mut seen: AHashSet<[u32; 3]> = AHashSet::with_capacity(self.triangles.len());
        let positions = &self.local_positions;
        let normals = &self.local_normals;
        self.triangles = self
            .triangles
            .iter()
            .filter_map(|t| {
                let [a, b, c] = *t;
                if a == b || b == c || c == a {
                    return None;
                }
                let face = triangle_normal(positions[a as usize], positions[b as usize], positions[c as usize]);
                if face == glam::Vec3::ZERO {
                    return None;
                }
                let mut key = *t;
                key.sort_unstable();
                if !seen.insert(key) {
                    return None;
                }
                let vertex_normal = normals[a as usize] + normals[b as usize] + normals[c as usize];
                if face.dot(vertex_normal) < 0.0 { Some([a, c, b]) } else { Some(*t) }
            })
            .collect();

        let triangle_edges: AHashSet<[u32; 2]> = self
            .triangles
            .iter()
            .flat_map(|t| [[t[0], t[1]], [t[1], t[2]], [t[2], t[0]]])
            .map(|e| if e[0] < e[1] { e } else { [e[1], e[0]] })
            .collect();
        let mut line_set = AHashSet::with_capacity(self.lines.len());
        self.lines.retain(|l| {
            let key = if l[0] < l[1] { *l } else { [l[1], l[0]] };
            l[0] != l[1] && !triangle_edges.contains(&key) && line_set.insert(key)
        });

        self.recompute_normals();
        self.update_stats();
        log::debug!(
            "(OPTIMIZE) {}: triangles {} -> {}, lines {} -> {}",
            self.name,
            before.0,
            self.triangles.len(),
            before.1,
            self.lines.len()
        );
        self.set_stage(MeshStage::Optimized);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmesh::test_util::grid_setup;
    use glam::Vec3;

    #[test]
    fn test_removes_bad_triangles_and_lines() {
        let mut mesh = VirtualMesh::new("render");
        mesh.import_render(&grid_setup(1, 2, 2, 0.1, Vec3::ZERO), 0).unwrap();
        mesh.triangles.push([0, 0, 1]);
        mesh.triangles.push([1, 0, 2]);
        mesh.lines = vec![[0, 1], [1, 0], [0, 3], [3, 0]];

        mesh.optimize().unwrap();
        assert_eq!(mesh.stage(), MeshStage::Optimized);
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.lines, vec![[0, 3]]);
    }

    #[test]
    fn test_orients_with_normals() {
        let mut mesh = VirtualMesh::new("render");
        mesh.import_render(&grid_setup(1, 2, 2, 0.1, Vec3::ZERO), 0).unwrap();
        mesh.triangles[1] = [mesh.triangles[1][0], mesh.triangles[1][2], mesh.triangles[1][1]];
        mesh.local_normals = vec![Vec3::Z; 4];
        mesh.optimize().unwrap();
        for t in &mesh.triangles {
            let [a, b, c] = t.map(|i| mesh.local_positions[i as usize]);
            assert!(triangle_normal(a, b, c).z > 0.0);
        }
    }
}
