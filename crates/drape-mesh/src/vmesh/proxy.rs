//! Proxy conversion
//!
//! Turns an optimized, attributed mesh into the simulation proxy: resolved
//! attributes, unique edges, vertex adjacency, depth from the fixed set,
//! optional normal alignment and custom skinning.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ahash::AHashMap;
use drape_core::limits::{MAX_PROXY_EDGE_COUNT, MAX_PROXY_TRIANGLE_COUNT, MAX_PROXY_VERTEX_COUNT};
use drape_core::{BuildResult, CancellationToken, ErrorCode, NormalAlignment, TransformId, TransformRecord};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{MeshStage, VirtualMesh};
use crate::source::SkinWeight;

/// Inputs to proxy conversion, all value snapshots
#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    /// Cloth transform
    pub cloth: TransformRecord,
    /// Normal orientation rule
    pub normal_alignment: NormalAlignment,
    /// Adjustment transform for [`NormalAlignment::Transform`]
    pub normal_adjustment: Option<TransformRecord>,
    /// Bones to re-skin proxy vertices to (empty = keep skinning)
    pub custom_skinning_bones: Vec<TransformRecord>,
}

/// Simulation-side topology of a proxy mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyData {
    /// Unique undirected edges, `[low, high]`
    pub edges: Vec<[u32; 2]>,
    /// Start of each vertex's neighbours in `neighbors` (length = vertices + 1)
    pub neighbor_starts: Vec<u32>,
    /// Flattened neighbour lists
    pub neighbors: Vec<u32>,
    /// Normalized graph distance from the fixed set (0 = fixed, 1 = deepest)
    pub vertex_depths: Vec<f32>,
    /// Fixed vertex each vertex hangs from
    pub vertex_root_indices: Vec<Option<u32>>,
    /// Next vertex towards the root
    pub vertex_parent_indices: Vec<Option<u32>>,
    /// Fixed vertices
    pub fixed_indices: Vec<u32>,
    /// Center of the fixed set, or the bounds center without one
    pub center: Vec3,
}

impl ProxyData {
    /// Neighbours of a vertex
    pub fn neighbors_of(&self, vertex: u32) -> &[u32] {
        let v = vertex as usize;
        match (self.neighbor_starts.get(v), self.neighbor_starts.get(v + 1)) {
            (Some(&s), Some(&e)) => &self.neighbors[s as usize..e as usize],
            _ => &[],
        }
    }
}

#[derive(Copy, Clone, PartialEq)]
struct Visit {
    cost: f32,
    vertex: u32,
}

impl Eq for Visit {}

impl Ord for Visit {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.total_cmp(&self.cost).then_with(|| other.vertex.cmp(&self.vertex))
    }
}

impl PartialOrd for Visit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl VirtualMesh {
    /// Convert to a proxy mesh. Fails on capacity overflow.
    pub fn convert_to_proxy(&mut self, settings: &ProxySettings, cancel: &CancellationToken) -> BuildResult<()> {
        let _span = tracing::debug_span!("proxy_conversion", mesh = %self.name).entered();
        self.require(MeshStage::Optimized, MeshStage::Attributed)?;
        if self.vertex_count() == 0 {
            return Err(ErrorCode::EmptyMesh.into());
        }
        if self.vertex_count() > MAX_PROXY_VERTEX_COUNT {
            return Err(ErrorCode::ProxyVertexOverflow.into());
        }
        if self.triangle_count() > MAX_PROXY_TRIANGLE_COUNT {
            return Err(ErrorCode::ProxyTriangleOverflow.into());
        }

        for attr in self.attributes.iter_mut() {
            *attr = attr.resolved();
        }

        let edges = self.unique_edges();
        if edges.len() > MAX_PROXY_EDGE_COUNT {
            return Err(ErrorCode::ProxyEdgeOverflow.into());
        }
        let (neighbor_starts, neighbors) = adjacency(self.vertex_count(), &edges);
        cancel.check()?;

        self.align_normals(settings);
        if !settings.custom_skinning_bones.is_empty() {
            self.custom_skinning(&settings.custom_skinning_bones, &settings.cloth);
        }
        cancel.check()?;

        let fixed_indices: Vec<u32> = self
            .attributes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_fixed())
            .map(|(i, _)| i as u32)
            .collect();
        let center = if fixed_indices.is_empty() {
            self.bounds.center()
        } else {
            fixed_indices
                .iter()
                .map(|&i| self.local_positions[i as usize])
                .sum::<Vec3>()
                / fixed_indices.len() as f32
        };

        let mut proxy = ProxyData {
            edges,
            neighbor_starts,
            neighbors,
            fixed_indices,
            center,
            ..Default::default()
        };
        self.compute_depths(&mut proxy);
        self.proxy = Some(proxy);
        self.check_proxy_capacity()?;

        log::debug!("(PROXY) {:?} {}", self.source, self);
        self.set_stage(MeshStage::Proxy);
        Ok(())
    }

    fn align_normals(&mut self, settings: &ProxySettings) {
        let origin = match settings.normal_alignment {
            NormalAlignment::None => return,
            NormalAlignment::BoundingBoxCenter => self.bounds.center(),
            NormalAlignment::Transform => match &settings.normal_adjustment {
                Some(record) => settings.cloth.world_to_local().transform_point3(record.position),
                None => return,
            },
        };
        let mut flipped = 0;
        for (n, p) in self.local_normals.iter_mut().zip(&self.local_positions) {
            if n.dot(*p - origin) < 0.0 {
                *n = -*n;
                flipped += 1;
            }
        }
        log::debug!("{}: normal alignment flipped {}", self.name, flipped);
    }

    /// Bind every vertex to its two nearest bones by inverse distance.
    fn custom_skinning(&mut self, bones: &[TransformRecord], cloth: &TransformRecord) {
        let to_cloth = cloth.world_to_local();
        let bone_positions: Vec<Vec3> = bones.iter().map(|b| to_cloth.transform_point3(b.position)).collect();

        let mut by_id: AHashMap<TransformId, u32> = self
            .transforms
            .iter()
            .enumerate()
            .filter(|(_, t)| t.id.is_some())
            .map(|(i, t)| (t.id, i as u32))
            .collect();
        let bone_slots: Vec<u32> = bones
            .iter()
            .map(|b| {
                if let Some(&i) = by_id.get(&b.id).filter(|_| b.id.is_some()) {
                    return i;
                }
                let i = self.transforms.len() as u32;
                self.transforms.push(*b);
                by_id.insert(b.id, i);
                i
            })
            .collect();

        for (p, weight) in self.local_positions.iter().zip(self.skin_weights.iter_mut()) {
            let mut nearest: Vec<(usize, f32)> =
                bone_positions.iter().enumerate().map(|(i, b)| (i, b.distance(*p))).collect();
            nearest.sort_by(|a, b| a.1.total_cmp(&b.1));
            nearest.truncate(2);

            *weight = match nearest.as_slice() {
                [(i, d), ..] if *d < 1e-6 => SkinWeight::single(bone_slots[*i]),
                [(i, _)] => SkinWeight::single(bone_slots[*i]),
                [(i, di), (j, dj), ..] => {
                    let (wi, wj) = (1.0 / di, 1.0 / dj);
                    let total = wi + wj;
                    SkinWeight {
                        indices: [bone_slots[*i], bone_slots[*j], 0, 0],
                        weights: [wi / total, wj / total, 0.0, 0.0],
                    }
                }
                [] => *weight,
            };
        }
    }

    fn compute_depths(&self, proxy: &mut ProxyData) {
        let n = self.vertex_count();
        let mut cost = vec![f32::INFINITY; n];
        let mut root = vec![None; n];
        let mut parent = vec![None; n];
        let mut heap = BinaryHeap::new();

        for &f in &proxy.fixed_indices {
            cost[f as usize] = 0.0;
            root[f as usize] = Some(f);
            heap.push(Visit { cost: 0.0, vertex: f });
        }
        while let Some(Visit { cost: c, vertex }) = heap.pop() {
            if c > cost[vertex as usize] {
                continue;
            }
            for &next in proxy.neighbors_of(vertex) {
                let step = self.local_positions[vertex as usize].distance(self.local_positions[next as usize]);
                let nc = c + step;
                if nc < cost[next as usize] {
                    cost[next as usize] = nc;
                    root[next as usize] = root[vertex as usize];
                    parent[next as usize] = Some(vertex);
                    heap.push(Visit { cost: nc, vertex: next });
                }
            }
        }

        let deepest = cost.iter().copied().filter(|c| c.is_finite()).fold(0.0f32, f32::max);
        proxy.vertex_depths = cost
            .iter()
            .map(|&c| {
                if !c.is_finite() {
                    if proxy.fixed_indices.is_empty() { 0.0 } else { 1.0 }
                } else if deepest > 0.0 {
                    c / deepest
                } else {
                    0.0
                }
            })
            .collect();
        proxy.vertex_root_indices = root;
        proxy.vertex_parent_indices = parent;
    }
}

/// CSR adjacency from an edge list
fn adjacency(vertex_count: usize, edges: &[[u32; 2]]) -> (Vec<u32>, Vec<u32>) {
    let mut degree = vec![0u32; vertex_count + 1];
    for e in edges {
        degree[e[0] as usize + 1] += 1;
        degree[e[1] as usize + 1] += 1;
    }
    for i in 0..vertex_count {
        degree[i + 1] += degree[i];
    }
    let starts = degree.clone();
    let mut fill = degree;
    let mut neighbors = vec![0u32; edges.len() * 2];
    for e in edges {
        for (a, b) in [(e[0], e[1]), (e[1], e[0])] {
            neighbors[fill[a as usize] as usize] = b;
            fill[a as usize] += 1;
        }
    }
    (starts, neighbors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::VertexAttribute;
    use crate::vmesh::test_util::{grid_setup, top_fixed};

    fn optimized(cols: u32, rows: u32) -> VirtualMesh {
        let mut render = VirtualMesh::new("render");
        render.import_render(&grid_setup(1, cols, rows, 0.1, Vec3::ZERO), 0).unwrap();
        let mut proxy = VirtualMesh::new_proxy("proxy", &TransformRecord::IDENTITY);
        proxy.add_mesh(&render).unwrap();
        proxy.assign_join_indices().unwrap();
        proxy.optimize().unwrap();
        proxy
    }

    #[test]
    fn test_convert_depths_and_edges() {
        let mut proxy = optimized(3, 4);
        let selection = top_fixed(&proxy);
        proxy.apply_selection_attribute(&selection).unwrap();
        proxy
            .convert_to_proxy(&ProxySettings::default(), &CancellationToken::new())
            .unwrap();

        let data = proxy.proxy.as_ref().unwrap();
        assert!(proxy.is_proxy());
        assert_eq!(data.fixed_indices, vec![0, 1, 2]);
        // 3x4 grid: 8 horizontal + 9 vertical + 6 diagonals
        assert_eq!(data.edges.len(), 23);
        assert_eq!(data.vertex_depths[0], 0.0);
        assert!((data.vertex_depths[10] - 1.0).abs() < 1e-5);
        assert_eq!(data.vertex_parent_indices[3], Some(0));
        assert_eq!(data.vertex_root_indices[9], Some(0));
        assert_eq!(data.neighbors_of(0).len(), 2);
    }

    #[test]
    fn test_resolves_fixed_over_move() {
        let mut proxy = optimized(2, 2);
        let mut selection = crate::selection::SelectionData::from_mesh(&proxy);
        selection.fill(VertexAttribute::MOVE | VertexAttribute::FIXED);
        proxy.apply_selection_attribute(&selection).unwrap();
        proxy
            .convert_to_proxy(&ProxySettings::default(), &CancellationToken::new())
            .unwrap();
        assert!(proxy.attributes.iter().all(|a| a.is_fixed() && !a.is_move()));
    }

    #[test]
    fn test_convert_without_selection() {
        let mut proxy = optimized(2, 2);
        proxy
            .convert_to_proxy(&ProxySettings::default(), &CancellationToken::new())
            .unwrap();
        let data = proxy.proxy.as_ref().unwrap();
        assert!(data.fixed_indices.is_empty());
        assert!(data.vertex_depths.iter().all(|d| *d == 0.0));
    }

    #[test]
    fn test_normal_alignment_flips_inward_normals() {
        let mut proxy = optimized(2, 2);
        for p in proxy.local_positions.iter_mut() {
            p.z = 1.0;
        }
        proxy.update_stats();
        proxy.local_normals = vec![-Vec3::Z; 4];
        let settings = ProxySettings {
            normal_alignment: NormalAlignment::Transform,
            normal_adjustment: Some(TransformRecord::IDENTITY),
            ..Default::default()
        };
        proxy.convert_to_proxy(&settings, &CancellationToken::new()).unwrap();
        assert!(proxy.local_normals.iter().all(|n| n.z > 0.0));
    }

    #[test]
    fn test_custom_skinning_two_nearest() {
        let mut proxy = optimized(2, 2);
        let bones = vec![
            TransformRecord::from_position(TransformId(50), Vec3::new(0.0, 0.0, 0.0)),
            TransformRecord::from_position(TransformId(51), Vec3::new(0.1, 0.0, 0.0)),
            TransformRecord::from_position(TransformId(52), Vec3::new(5.0, 0.0, 0.0)),
        ];
        let settings = ProxySettings {
            custom_skinning_bones: bones,
            ..Default::default()
        };
        proxy.convert_to_proxy(&settings, &CancellationToken::new()).unwrap();
        let w = proxy.skin_weights[0];
        assert_eq!(w.weights[0], 1.0);
        assert_eq!(proxy.transforms[w.indices[0] as usize].id, TransformId(50));
        let w = proxy.skin_weights[2];
        assert!((w.weights[0] + w.weights[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_convert_cancelled() {
        let mut proxy = optimized(2, 2);
        let token = CancellationToken::new();
        token.cancel();
        let result = proxy.convert_to_proxy(&ProxySettings::default(), &token);
        assert_eq!(result, Err(drape_core::BuildError::Cancelled));
        assert!(!proxy.is_proxy());
    }
}
