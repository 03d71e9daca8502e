//! Source snapshots
//!
//! Plain-value copies of renderer meshes and bone hierarchies. These are
//! captured on the main context and are the only view of the scene that
//! worker threads ever see.

use ahash::AHashMap;
use drape_core::{ErrorCode, TransformId, TransformRecord};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Stable renderer identity (0 = none)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RendererId(pub u64);

impl std::fmt::Display for RendererId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "renderer#{}", self.0)
    }
}

/// Up to four skinning influences
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SkinWeight {
    /// Transform indices
    pub indices: [u32; 4],
    /// Weights, summing to 1
    pub weights: [f32; 4],
}

impl SkinWeight {
    /// Fully bound to one transform
    pub fn single(index: u32) -> Self {
        Self {
            indices: [index, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Offset every index
    pub fn offset(mut self, by: u32) -> Self {
        for (index, weight) in self.indices.iter_mut().zip(self.weights) {
            if weight > 0.0 {
                *index += by;
            }
        }
        self
    }
}

/// Snapshot of a renderer's mesh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderSetup {
    /// Renderer identity
    pub renderer_id: RendererId,
    /// Display name
    pub name: String,
    /// Renderer transform at capture time
    #[serde(default)]
    pub transform: TransformRecord,
    /// Local vertex positions
    pub positions: Vec<Vec3>,
    /// Local vertex normals (may be empty)
    #[serde(default)]
    pub normals: Vec<Vec3>,
    /// Local vertex tangents (may be empty)
    #[serde(default)]
    pub tangents: Vec<Vec3>,
    /// UV channels
    #[serde(default)]
    pub uv_channels: Vec<Vec<Vec2>>,
    /// Triangle indices
    #[serde(default)]
    pub triangles: Vec<[u32; 3]>,
    /// Skinning transforms (empty = rigid to the renderer transform)
    #[serde(default)]
    pub bones: Vec<TransformRecord>,
    /// Per-vertex skinning (empty or one per vertex)
    #[serde(default)]
    pub skin_weights: Vec<SkinWeight>,
}

impl RenderSetup {
    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Structural checks on parallel arrays and indices
    pub fn validate(&self) -> Result<(), ErrorCode> {
        let n = self.positions.len();
        if n == 0 {
            return Err(ErrorCode::EmptyMesh);
        }
        let parallel_ok = (self.normals.is_empty() || self.normals.len() == n)
            && (self.tangents.is_empty() || self.tangents.len() == n)
            && (self.skin_weights.is_empty() || self.skin_weights.len() == n)
            && self.uv_channels.iter().all(|uv| uv.len() == n);
        if !parallel_ok {
            return Err(ErrorCode::InvalidMeshData);
        }
        if self.triangles.iter().flatten().any(|&i| i as usize >= n) {
            return Err(ErrorCode::InvalidMeshData);
        }
        let bone_count = self.bones.len() as u32;
        let weights_ok = self.skin_weights.iter().all(|w| {
            w.indices
                .iter()
                .zip(w.weights)
                .all(|(&i, weight)| weight <= 0.0 || i < bone_count)
        });
        if !weights_ok {
            return Err(ErrorCode::InvalidMeshData);
        }
        Ok(())
    }
}

/// One bone of a scene hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoneNode {
    /// Transform identity
    pub id: TransformId,
    /// Name, used by attribute overrides
    pub name: String,
    /// Parent bone
    #[serde(default)]
    pub parent: Option<TransformId>,
    /// World pose
    pub record: TransformRecord,
}

/// A flat bone hierarchy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoneHierarchy {
    /// Bones in any order
    pub bones: Vec<BoneNode>,
}

impl BoneHierarchy {
    /// Find a bone by name
    pub fn find_by_name(&self, name: &str) -> Option<&BoneNode> {
        self.bones.iter().find(|b| b.name == name)
    }

    /// Find a bone by id
    pub fn get(&self, id: TransformId) -> Option<&BoneNode> {
        self.bones.iter().find(|b| b.id == id)
    }
}

/// How bone chains are connected into a mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoneConnectionMode {
    /// Parent-child lines only
    #[default]
    Line,
    /// Adjacent root chains joined into triangles, last chain wraps to the first
    SequentialLoopMesh,
    /// Adjacent root chains joined into triangles
    SequentialNonLoopMesh,
}

/// Bone cloth setup: the bones under the root set, in chain order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoneSetup {
    /// Bone poses
    pub transforms: Vec<TransformRecord>,
    /// Parent index of each bone inside this setup
    pub parent_indices: Vec<Option<u32>>,
    /// First child index of each bone (the chain continuation)
    pub chain_child: Vec<Option<u32>>,
    /// Root ids in authored order
    pub root_ids: Vec<TransformId>,
    /// Connection mode
    pub connection_mode: BoneConnectionMode,
    #[serde(skip)]
    id_to_index: AHashMap<TransformId, u32>,
}

impl BoneSetup {
    /// Collect every bone under `roots`, depth-first per root.
    pub fn new(
        hierarchy: &BoneHierarchy,
        roots: &[TransformId],
        connection_mode: BoneConnectionMode,
    ) -> Result<Self, ErrorCode> {
        if roots.is_empty() {
            return Err(ErrorCode::NoRootBone);
        }

        let mut children: AHashMap<TransformId, Vec<&BoneNode>> = AHashMap::new();
        for bone in &hierarchy.bones {
            if let Some(parent) = bone.parent {
                children.entry(parent).or_default().push(bone);
            }
        }

        let mut setup = Self {
            transforms: Vec::new(),
            parent_indices: Vec::new(),
            chain_child: Vec::new(),
            root_ids: Vec::with_capacity(roots.len()),
            connection_mode,
            id_to_index: AHashMap::new(),
        };

        for &root_id in roots {
            let root = hierarchy.get(root_id).ok_or(ErrorCode::BoneNotFound)?;
            if setup.id_to_index.contains_key(&root_id) {
                continue;
            }
            setup.root_ids.push(root_id);

            let mut stack: Vec<(&BoneNode, Option<u32>)> = vec![(root, None)];
            while let Some((bone, parent)) = stack.pop() {
                if setup.id_to_index.contains_key(&bone.id) {
                    continue;
                }
                let index = setup.transforms.len() as u32;
                setup.id_to_index.insert(bone.id, index);
                setup.transforms.push(bone.record);
                setup.parent_indices.push(parent);
                setup.chain_child.push(None);
                if let Some(p) = parent {
                    let slot = &mut setup.chain_child[p as usize];
                    if slot.is_none() {
                        *slot = Some(index);
                    }
                }
                if let Some(kids) = children.get(&bone.id) {
                    for kid in kids.iter().rev() {
                        stack.push((kid, Some(index)));
                    }
                }
            }
        }

        Ok(setup)
    }

    /// Number of bones
    pub fn bone_count(&self) -> usize {
        self.transforms.len()
    }

    /// Index of a bone inside this setup
    pub fn transform_index(&self, id: TransformId) -> Option<usize> {
        if self.id_to_index.is_empty() && !self.transforms.is_empty() {
            return self.transforms.iter().position(|t| t.id == id);
        }
        self.id_to_index.get(&id).map(|&i| i as usize)
    }

    /// Bone indices of one root chain following first children
    pub fn chain(&self, root: TransformId) -> Vec<u32> {
        let mut chain = Vec::new();
        let mut cursor = self.transform_index(root).map(|i| i as u32);
        while let Some(i) = cursor {
            chain.push(i);
            cursor = self.chain_child[i as usize];
        }
        chain
    }

    /// Positions of every bone, world space
    pub fn world_positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.transforms.iter().map(|t| t.position)
    }
}
