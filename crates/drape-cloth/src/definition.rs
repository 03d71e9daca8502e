//! Declarative cloth description

use std::collections::BTreeMap;

use drape_core::{ClothParameters, ErrorCode, NormalAlignment, ReductionSettings, TransformId, TransformRecord};
use drape_mesh::{BoneConnectionMode, PaintMode, PaintTexture, RendererId, SelectionData, VertexAttribute};
use serde::{Deserialize, Serialize};

use crate::prebuild::PreBuildData;
use crate::registry::ColliderId;

/// Format version of captured init data
pub const INIT_DATA_VERSION: u32 = 1;

/// What a cloth is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClothType {
    /// One or more renderer meshes
    #[default]
    MeshCloth,
    /// A bone hierarchy
    BoneCloth,
    /// A bone hierarchy simulated as springs, always line connected
    BoneSpring,
}

impl ClothType {
    pub fn is_bone(&self) -> bool {
        matches!(self, Self::BoneCloth | Self::BoneSpring)
    }
}

/// Transform snapshots captured at edit time and reused at init
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClothInitData {
    pub version: u32,
    pub cloth_transform: TransformRecord,
    pub normal_adjustment: Option<TransformRecord>,
    pub custom_skinning_bones: Vec<TransformRecord>,
    /// Renderer count of the definition it was captured from
    pub renderer_count: usize,
    /// Root bone count of the definition it was captured from
    pub root_bone_count: usize,
}

impl ClothInitData {
    /// Check the data still matches `definition`
    pub fn validate(&self, definition: &ClothDefinition) -> Result<(), ErrorCode> {
        if self.version != INIT_DATA_VERSION
            || self.renderer_count != definition.renderers.len()
            || self.root_bone_count != definition.root_bones.len()
            || self.custom_skinning_bones.len() != definition.custom_skinning_bones.len()
        {
            return Err(ErrorCode::InitDataMismatch);
        }
        Ok(())
    }
}

/// Everything needed to build one cloth
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClothDefinition {
    pub name: String,
    pub cloth_type: ClothType,
    /// Cloth transform; the proxy mesh lives in its local space
    pub transform: TransformRecord,
    /// Source renderers (mesh cloth)
    pub renderers: Vec<RendererId>,
    /// Root bones (bone cloth)
    pub root_bones: Vec<TransformId>,
    pub connection_mode: BoneConnectionMode,
    pub paint_mode: PaintMode,
    /// One paint texture per renderer
    pub paint_maps: Vec<PaintTexture>,
    /// Explicit attributes, one array per renderer
    pub vertex_attributes: Vec<Vec<VertexAttribute>>,
    /// Authored selection in cloth space
    pub selection: Option<SelectionData>,
    /// Attribute overrides by bone name (bone cloth)
    pub bone_attributes: BTreeMap<String, VertexAttribute>,
    pub uv_channel: usize,
    pub reduction: ReductionSettings,
    pub parameters: ClothParameters,
    pub normal_alignment: NormalAlignment,
    /// Defaults to the cloth transform when aligning by transform
    pub normal_adjustment: Option<TransformRecord>,
    pub custom_skinning_bones: Vec<TransformId>,
    pub colliders: Vec<ColliderId>,
    /// Name of the synchronization partner
    pub sync_partner: Option<String>,
    pub pre_build: Option<PreBuildData>,
    pub init_data: Option<ClothInitData>,
    pub disable_auto_build: bool,
}

impl ClothDefinition {
    /// Mesh cloth over the given renderers
    pub fn mesh(name: impl Into<String>, renderers: Vec<RendererId>) -> Self {
        Self {
            name: name.into(),
            renderers,
            ..Default::default()
        }
    }

    /// Bone cloth over the given roots
    pub fn bone(name: impl Into<String>, root_bones: Vec<TransformId>) -> Self {
        Self {
            name: name.into(),
            cloth_type: ClothType::BoneCloth,
            root_bones,
            ..Default::default()
        }
    }

    /// Whether pre-built data is attached
    pub fn uses_pre_build(&self) -> bool {
        self.pre_build.as_ref().is_some_and(|p| p.has_data())
    }

    /// Connection mode used for the bone import
    pub fn effective_connection_mode(&self) -> BoneConnectionMode {
        match self.cloth_type {
            ClothType::BoneSpring => BoneConnectionMode::Line,
            _ => self.connection_mode,
        }
    }

    /// Check the definition holds enough to build a cloth
    pub fn validate(&self) -> Result<(), ErrorCode> {
        match self.cloth_type {
            ClothType::MeshCloth if self.renderers.is_empty() => return Err(ErrorCode::NoSourceRenderer),
            ClothType::BoneCloth | ClothType::BoneSpring if self.root_bones.is_empty() => {
                return Err(ErrorCode::NoRootBone);
            }
            _ => {}
        }
        self.reduction.validate()?;
        self.parameters.validate()?;

        if self.cloth_type == ClothType::MeshCloth && !self.uses_pre_build() {
            if self.vertex_attributes.iter().any(|a| a.is_empty()) {
                return Err(ErrorCode::VertexAttributeListIsEmpty);
            }
            if self.paint_mode.uses_texture() && self.paint_maps.is_empty() {
                return Err(ErrorCode::InvalidPaintMap);
            }
        }
        if let Some(selection) = &self.selection {
            selection.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requirements() {
        assert_eq!(ClothDefinition::mesh("a", vec![]).validate(), Err(ErrorCode::NoSourceRenderer));
        assert_eq!(ClothDefinition::bone("b", vec![]).validate(), Err(ErrorCode::NoRootBone));
        assert!(ClothDefinition::mesh("c", vec![RendererId(1)]).validate().is_ok());

        let mut paint = ClothDefinition::mesh("d", vec![RendererId(1)]);
        paint.paint_mode = PaintMode::TextureFixedMove;
        assert_eq!(paint.validate(), Err(ErrorCode::InvalidPaintMap));
    }

    #[test]
    fn test_bone_spring_forces_line() {
        let mut def = ClothDefinition::bone("spring", vec![TransformId(1)]);
        def.cloth_type = ClothType::BoneSpring;
        def.connection_mode = BoneConnectionMode::SequentialLoopMesh;
        assert_eq!(def.effective_connection_mode(), BoneConnectionMode::Line);
    }

    #[test]
    fn test_init_data_mismatch() {
        let def = ClothDefinition::mesh("a", vec![RendererId(1), RendererId(2)]);
        let mut init = ClothInitData {
            version: INIT_DATA_VERSION,
            renderer_count: 2,
            ..Default::default()
        };
        assert!(init.validate(&def).is_ok());
        init.renderer_count = 1;
        assert_eq!(init.validate(&def), Err(ErrorCode::InitDataMismatch));
    }

    #[test]
    fn test_definition_from_json() {
        let json = r#"{
            "name": "skirt",
            "renderers": [3],
            "reduction": { "simple_distance": 0.0, "shape_distance": 0.0 },
            "sync_partner": "body"
        }"#;
        let def: ClothDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.cloth_type, ClothType::MeshCloth);
        assert_eq!(def.renderers, vec![RendererId(3)]);
        assert!(!def.reduction.is_enabled());
        assert_eq!(def.sync_partner.as_deref(), Some("body"));
        assert_eq!(def.transform, TransformRecord::IDENTITY);
    }
}
