//! Scene files
//!
//! A [`ClothScene`] is the JSON document a host (or the CLI) loads: the
//! renderer snapshots, the bone hierarchy and the cloth definitions that
//! reference them.

use std::fs;
use std::path::Path;

use drape_mesh::{BoneHierarchy, RenderSetup};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definition::ClothDefinition;
use crate::manager::ClothManager;

/// Scene loading errors
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("renderer {0} rejected: {1}")]
    Renderer(String, drape_core::ErrorCode),
}

/// Renderers, bones and cloths of one scene
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClothScene {
    pub renderers: Vec<RenderSetup>,
    pub bones: BoneHierarchy,
    pub cloths: Vec<ClothDefinition>,
}

impl ClothScene {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Cloth definition by name
    pub fn cloth(&self, name: &str) -> Option<&ClothDefinition> {
        self.cloths.iter().find(|c| c.name == name)
    }

    /// Register renderers and bones with a manager
    pub fn install(&self, manager: &ClothManager) -> Result<(), SceneError> {
        for setup in &self.renderers {
            manager
                .renderers()
                .register_source(setup.clone())
                .map_err(|code| SceneError::Renderer(setup.name.clone(), code))?;
        }
        manager.register_bones(self.bones.clone());
        Ok(())
    }
}
