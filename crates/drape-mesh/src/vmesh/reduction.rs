//! Polygon reduction
//!
//! Three passes, each merging vertices into a surviving neighbour:
//! weld (coincident points), simple (grid proximity) and shape (along
//! edges, shortest first). Survivors keep their position. Each survivor
//! tracks the largest distance to any vertex it absorbed, and a merge is
//! only taken if that radius stays within the pass's cumulative limit, so
//! no original vertex ever ends up further than the total reduction
//! distance from the vertex its join index names.

use drape_core::limits::WELD_DISTANCE;
use drape_core::{BuildResult, CancellationToken, ErrorCode, ReductionSettings};
use glam::Vec3;

use super::{MeshStage, VirtualMesh};
use crate::grid::SpatialGrid;

const CANCEL_CHECK_INTERVAL: usize = 1024;

struct Joiner<'a> {
    positions: &'a [Vec3],
    target: Vec<u32>,
    radius: Vec<f32>,
    alive: Vec<bool>,
}

impl<'a> Joiner<'a> {
    fn new(positions: &'a [Vec3]) -> Self {
        let n = positions.len();
        Self {
            positions,
            target: (0..n as u32).collect(),
            radius: vec![0.0; n],
            alive: vec![true; n],
        }
    }

    fn find(&mut self, mut i: u32) -> u32 {
        let mut root = i;
        while self.target[root as usize] != root {
            root = self.target[root as usize];
        }
        while self.target[i as usize] != root {
            let next = self.target[i as usize];
            self.target[i as usize] = root;
            i = next;
        }
        root
    }

    /// Merge `b` into `a` if the absorbed radius stays within `limit`.
    fn try_join(&mut self, a: u32, b: u32, limit: f32) -> bool {
        let d = self.positions[a as usize].distance(self.positions[b as usize]);
        let grown = d + self.radius[b as usize];
        if grown > limit {
            return false;
        }
        self.target[b as usize] = a;
        self.alive[b as usize] = false;
        self.radius[a as usize] = self.radius[a as usize].max(grown);
        true
    }

    fn proximity_pass(&mut self, cell: f32, limit: f32, cancel: &CancellationToken) -> BuildResult<usize> {
        let grid = SpatialGrid::from_points(self.positions, cell);
        let mut joined = 0;
        let mut candidates = Vec::new();
        for a in 0..self.positions.len() as u32 {
            if a as usize % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            if !self.alive[a as usize] {
                continue;
            }
            candidates.clear();
            grid.for_each_near(self.positions[a as usize], limit, |b| {
                if b > a {
                    candidates.push(b);
                }
            });
            candidates.sort_unstable();
            for &b in &candidates {
                if self.alive[b as usize] && self.try_join(a, b, limit) {
                    joined += 1;
                }
            }
        }
        Ok(joined)
    }

    fn shape_pass(
        &mut self,
        edges: &[[u32; 2]],
        max_edge: f32,
        limit: f32,
        cancel: &CancellationToken,
    ) -> BuildResult<usize> {
        let mut sorted: Vec<(f32, [u32; 2])> = edges
            .iter()
            .map(|e| (self.positions[e[0] as usize].distance(self.positions[e[1] as usize]), *e))
            .filter(|(d, _)| *d <= max_edge)
            .collect();
        sorted.sort_by(|x, y| x.0.total_cmp(&y.0));

        let mut joined = 0;
        for (n, (_, [u, v])) in sorted.into_iter().enumerate() {
            if n % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            let a = self.find(u);
            let b = self.find(v);
            if a == b {
                continue;
            }
            if self.positions[a as usize].distance(self.positions[b as usize]) > max_edge {
                continue;
            }
            let (keep, drop) = if self.radius[a as usize] >= self.radius[b as usize] { (a, b) } else { (b, a) };
            if self.try_join(keep, drop, limit) || self.try_join(drop, keep, limit) {
                joined += 1;
            }
        }
        Ok(joined)
    }
}

impl VirtualMesh {
    /// Merge nearby vertices according to `settings`.
    pub fn reduction(&mut self, settings: &ReductionSettings, cancel: &CancellationToken) -> BuildResult<()> {
        let _span = tracing::debug_span!("reduction", mesh = %self.name).entered();
        self.require(MeshStage::Imported, MeshStage::Merged)?;
        settings.validate()?;
        self.assign_join_indices()?;

        let n = self.vertex_count();
        if n < 2 {
            self.set_stage(MeshStage::Reduced);
            return Ok(());
        }

        let edges = self.unique_edges();
        let positions = self.local_positions.clone();
        let mut joiner = Joiner::new(&positions);

        let weld_limit = WELD_DISTANCE;
        let simple_limit = weld_limit + settings.simple_distance;
        let shape_limit = simple_limit + settings.shape_distance;

        let welded = joiner.proximity_pass(WELD_DISTANCE * 4.0, weld_limit, cancel)?;
        let simple = if settings.simple_distance > 0.0 {
            joiner.proximity_pass(settings.simple_distance, simple_limit, cancel)?
        } else {
            0
        };
        let shape = if settings.shape_distance > 0.0 {
            joiner.shape_pass(&edges, settings.shape_distance, shape_limit, cancel)?
        } else {
            0
        };
        cancel.check()?;

        let representative: Vec<u32> = (0..n as u32).map(|i| joiner.find(i)).collect();
        let alive = joiner.alive;
        self.compact(&representative, &alive)?;

        log::debug!(
            "(REDUCTION) {}: weld:{} simple:{} shape:{} {} -> {}",
            self.name,
            welded,
            simple,
            shape,
            n,
            self.vertex_count()
        );
        self.update_stats();
        self.set_stage(MeshStage::Reduced);
        Ok(())
    }

    /// Unique undirected edges from triangles and lines, sorted
    pub(crate) fn unique_edges(&self) -> Vec<[u32; 2]> {
        let mut edges: Vec<[u32; 2]> = self
            .triangles
            .iter()
            .flat_map(|t| [[t[0], t[1]], [t[1], t[2]], [t[2], t[0]]])
            .chain(self.lines.iter().copied())
            .filter(|e| e[0] != e[1])
            .map(|e| if e[0] < e[1] { e } else { [e[1], e[0]] })
            .collect();
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    fn compact(&mut self, representative: &[u32], alive: &[bool]) -> Result<(), ErrorCode> {
        let n = representative.len();
        let mut new_index = vec![u32::MAX; n];
        let mut next = 0u32;
        for i in 0..n {
            if alive[i] {
                new_index[i] = next;
                next += 1;
            }
        }
        let resolve = |i: u32| new_index[representative[i as usize] as usize];
        if (0..n as u32).any(|i| resolve(i) == u32::MAX) {
            return Err(ErrorCode::Exception);
        }

        let mut normals = vec![Vec3::ZERO; next as usize];
        let mut attributes = vec![crate::attribute::VertexAttribute::empty(); next as usize];
        for i in 0..n {
            let r = resolve(i as u32) as usize;
            normals[r] += self.local_normals[i];
            attributes[r] |= self.attributes[i];
        }
        for (normal, i) in normals.iter_mut().zip((0..n).filter(|i| alive[*i])) {
            *normal = normal.try_normalize().unwrap_or(self.local_normals[i]);
        }

        fn survivors<T: Clone>(values: &[T], alive: &[bool]) -> Vec<T> {
            values.iter().zip(alive).filter(|(_, a)| **a).map(|(v, _)| v.clone()).collect()
        }
        self.local_positions = survivors(&self.local_positions, alive);
        self.local_tangents = survivors(&self.local_tangents, alive);
        self.skin_weights = survivors(&self.skin_weights, alive);
        if self.uv.len() == n {
            self.uv = survivors(&self.uv, alive);
        }
        self.local_normals = normals;
        self.attributes = attributes;

        for j in self.join_indices.iter_mut() {
            *j = resolve(*j);
        }
        self.triangles = self
            .triangles
            .iter()
            .map(|t| t.map(resolve))
            .filter(|t| t[0] != t[1] && t[1] != t[2] && t[2] != t[0])
            .collect();
        self.lines = self
            .lines
            .iter()
            .map(|l| l.map(resolve))
            .filter(|l| l[0] != l[1])
            .collect();
        self.reference_indices.clear();
        Ok(())
    }
}
