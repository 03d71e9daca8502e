//! Mesh ownership
//!
//! A [`VirtualMeshContainer`] owns a finished mesh, either exclusively or
//! shared with other cloth instances built from the same pre-build data,
//! plus the per-instance overlay.

use std::sync::Arc;

use drape_core::TransformRecord;
use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::vmesh::VirtualMesh;

/// Per-instance data layered over a shared mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniqueMeshData {
    /// Current skinning transforms of this instance
    pub transforms: Vec<TransformRecord>,
    /// Local-to-world of this instance at build time
    pub init_local_to_world: Mat4,
}

impl UniqueMeshData {
    /// Overlay capturing a mesh's own transforms
    pub fn from_mesh(mesh: &VirtualMesh) -> Self {
        Self {
            transforms: mesh.transforms.clone(),
            init_local_to_world: mesh.init_local_to_world,
        }
    }
}

/// Owner of a finished mesh
#[derive(Debug, Default)]
pub struct VirtualMeshContainer {
    share: Option<Arc<VirtualMesh>>,
    unique: Option<UniqueMeshData>,
}

impl VirtualMeshContainer {
    /// Take exclusive ownership of a mesh
    pub fn new(mesh: VirtualMesh) -> Self {
        Self {
            share: Some(Arc::new(mesh)),
            unique: None,
        }
    }

    /// Wrap a shared mesh with an instance overlay
    pub fn from_shared(mesh: Arc<VirtualMesh>, unique: UniqueMeshData) -> Self {
        Self {
            share: Some(mesh),
            unique: Some(unique),
        }
    }

    /// The mesh, if not disposed
    pub fn mesh(&self) -> Option<&VirtualMesh> {
        self.share.as_deref()
    }

    /// Shared handle to the mesh
    pub fn shared(&self) -> Option<Arc<VirtualMesh>> {
        self.share.clone()
    }

    /// Instance overlay
    pub fn unique(&self) -> Option<&UniqueMeshData> {
        self.unique.as_ref()
    }

    /// Transforms of this instance (overlay first, then the mesh's own)
    pub fn transforms(&self) -> &[TransformRecord] {
        match (&self.unique, &self.share) {
            (Some(u), _) => &u.transforms,
            (None, Some(m)) => &m.transforms,
            (None, None) => &[],
        }
    }

    /// Whether this container came from shared data
    pub fn is_shared(&self) -> bool {
        self.unique.is_some()
    }

    /// Number of vertices, 0 once disposed
    pub fn vertex_count(&self) -> usize {
        self.mesh().map_or(0, |m| m.vertex_count())
    }

    /// Whether the mesh has been released
    pub fn is_disposed(&self) -> bool {
        self.share.is_none()
    }

    /// Release the mesh. Returns `true` only on the call that released it.
    pub fn dispose(&mut self) -> bool {
        self.unique = None;
        self.share.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispose_once() {
        let mut container = VirtualMeshContainer::new(VirtualMesh::new("mesh"));
        assert!(!container.is_disposed());
        assert!(container.dispose());
        assert!(!container.dispose());
        assert!(container.is_disposed());
        assert!(container.mesh().is_none());
    }

    #[test]
    fn test_shared_overlay() {
        let shared = Arc::new(VirtualMesh::new("shared"));
        let overlay = UniqueMeshData {
            transforms: vec![TransformRecord::IDENTITY; 2],
            init_local_to_world: Mat4::IDENTITY,
        };
        let a = VirtualMeshContainer::from_shared(shared.clone(), overlay.clone());
        let b = VirtualMeshContainer::from_shared(shared.clone(), overlay);
        assert!(a.is_shared());
        assert_eq!(a.transforms().len(), 2);
        assert_eq!(Arc::strong_count(&shared), 3);
        drop((a, b));
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
