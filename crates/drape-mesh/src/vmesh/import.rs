//! Import from render snapshots and bone setups

use drape_core::math::any_orthogonal;
use drape_core::{ErrorCode, TransformRecord};
use glam::{Mat4, Vec2, Vec3};

use super::{MeshSource, MeshStage, VirtualMesh};
use crate::attribute::VertexAttribute;
use crate::source::{BoneConnectionMode, BoneSetup, RenderSetup, SkinWeight};

impl VirtualMesh {
    /// Import a renderer mesh in renderer-local space
    pub fn import_render(&mut self, setup: &RenderSetup, uv_channel: usize) -> Result<(), ErrorCode> {
        self.require(MeshStage::Empty, MeshStage::Empty)?;
        setup.validate()?;

        let n = setup.vertex_count();
        self.source = MeshSource::Render;
        self.local_positions = setup.positions.clone();
        self.triangles = setup.triangles.clone();
        self.init_local_to_world = setup.transform.local_to_world();
        self.uv = match setup.uv_channels.get(uv_channel) {
            Some(channel) => channel.clone(),
            None if setup.uv_channels.is_empty() => Vec::new(),
            None => return Err(ErrorCode::MissingUvChannel),
        };

        if setup.normals.is_empty() {
            self.local_normals = vec![Vec3::Y; n];
            self.recompute_normals();
        } else {
            self.local_normals = setup.normals.clone();
        }
        self.local_tangents = if setup.tangents.is_empty() {
            self.local_normals.iter().map(|n| any_orthogonal(*n)).collect()
        } else {
            setup.tangents.clone()
        };

        if setup.bones.is_empty() {
            self.transforms = vec![setup.transform];
            self.skin_weights = vec![SkinWeight::single(0); n];
        } else {
            self.transforms = setup.bones.clone();
            self.skin_weights = if setup.skin_weights.is_empty() {
                vec![SkinWeight::single(0); n]
            } else {
                setup.skin_weights.clone()
            };
        }

        self.attributes = vec![VertexAttribute::empty(); n];
        self.reference_indices = (0..n as u32).collect();
        self.update_stats();
        self.set_stage(MeshStage::Imported);
        Ok(())
    }

    /// Import a bone setup into cloth-local space, one vertex per bone.
    pub fn import_bones(&mut self, setup: &BoneSetup, cloth: &TransformRecord) -> Result<(), ErrorCode> {
        self.require(MeshStage::Empty, MeshStage::Empty)?;
        if setup.bone_count() == 0 {
            return Err(ErrorCode::NoRootBone);
        }

        let to_cloth: Mat4 = cloth.world_to_local();
        let cloth_rotation = cloth.rotation.inverse();
        let n = setup.bone_count();

        self.source = MeshSource::Bone;
        self.init_local_to_world = cloth.local_to_world();
        self.local_positions = setup.world_positions().map(|p| to_cloth.transform_point3(p)).collect();
        self.local_normals = setup
            .transforms
            .iter()
            .map(|t| (cloth_rotation * t.rotation * Vec3::Z).normalize_or_zero())
            .collect();
        self.local_tangents = setup
            .transforms
            .iter()
            .map(|t| (cloth_rotation * t.rotation * Vec3::Y).normalize_or_zero())
            .collect();
        self.uv = vec![Vec2::ZERO; n];
        self.attributes = vec![VertexAttribute::empty(); n];
        self.transforms = setup.transforms.clone();
        self.skin_weights = (0..n as u32).map(SkinWeight::single).collect();
        self.reference_indices = (0..n as u32).collect();

        self.lines = setup
            .parent_indices
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| [p, i as u32]))
            .collect();

        self.triangles = match setup.connection_mode {
            BoneConnectionMode::Line => Vec::new(),
            BoneConnectionMode::SequentialLoopMesh => sequential_triangles(setup, true),
            BoneConnectionMode::SequentialNonLoopMesh => sequential_triangles(setup, false),
        };
        if !self.triangles.is_empty() {
            self.recompute_normals();
        }

        self.update_stats();
        self.set_stage(MeshStage::Imported);
        Ok(())
    }
}

/// Join neighbouring root chains depth by depth.
fn sequential_triangles(setup: &BoneSetup, looped: bool) -> Vec<[u32; 3]> {
    let chains: Vec<Vec<u32>> = setup.root_ids.iter().map(|id| setup.chain(*id)).collect();
    let mut pairs: Vec<(usize, usize)> = (0..chains.len().saturating_sub(1)).map(|c| (c, c + 1)).collect();
    if looped && chains.len() > 2 {
        pairs.push((chains.len() - 1, 0));
    }

    let mut triangles = Vec::new();
    for (a, b) in pairs {
        let (left, right) = (&chains[a], &chains[b]);
        let depth = left.len().min(right.len());
        for d in 0..depth.saturating_sub(1) {
            let (l0, l1, r0, r1) = (left[d], left[d + 1], right[d], right[d + 1]);
            triangles.push([l0, l1, r0]);
            triangles.push([r0, l1, r1]);
        }
    }
    triangles
}
