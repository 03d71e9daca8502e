//! Renderer manager
//!
//! Hosts register renderer snapshots here. Cloth instances acquire them by
//! id during init; the data is shared and reference counted, and each cloth
//! toggles its use of a renderer with start/end use.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use drape_core::ErrorCode;
use drape_mesh::{RenderSetup, RendererId};
use parking_lot::RwLock;

use crate::registry::ClothId;

struct RendererEntry {
    setup: Arc<RenderSetup>,
    ref_count: usize,
    users: AHashSet<ClothId>,
}

/// Shared renderer data
#[derive(Default)]
pub struct RenderManager {
    sources: RwLock<AHashMap<RendererId, Arc<RenderSetup>>>,
    entries: RwLock<AHashMap<RendererId, RendererEntry>>,
}

impl RenderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a renderer snapshot available; replaces an earlier snapshot with the same id
    pub fn register_source(&self, setup: RenderSetup) -> Result<RendererId, ErrorCode> {
        setup.validate()?;
        let id = setup.renderer_id;
        self.sources.write().insert(id, Arc::new(setup));
        Ok(id)
    }

    /// Whether a snapshot exists for `id`
    pub fn has_source(&self, id: RendererId) -> bool {
        self.sources.read().contains_key(&id)
    }

    /// Acquire a renderer for a cloth, incrementing its reference count
    pub fn add_renderer(&self, id: RendererId) -> Result<RendererId, ErrorCode> {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            entry.ref_count += 1;
            return Ok(id);
        }
        let setup = self.sources.read().get(&id).cloned().ok_or(ErrorCode::RendererNotFound)?;
        entries.insert(
            id,
            RendererEntry {
                setup,
                ref_count: 1,
                users: AHashSet::new(),
            },
        );
        Ok(id)
    }

    /// Release one reference; the entry is dropped at zero
    pub fn remove_renderer(&self, id: RendererId) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&id) {
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                entries.remove(&id);
            }
        }
    }

    /// Snapshot of an acquired renderer
    pub fn get(&self, id: RendererId) -> Option<Arc<RenderSetup>> {
        self.entries.read().get(&id).map(|e| Arc::clone(&e.setup))
    }

    /// Vertex count of an acquired renderer
    pub fn vertex_count(&self, id: RendererId) -> Option<usize> {
        self.entries.read().get(&id).map(|e| e.setup.vertex_count())
    }

    pub fn ref_count(&self, id: RendererId) -> usize {
        self.entries.read().get(&id).map_or(0, |e| e.ref_count)
    }

    pub fn start_use(&self, cloth: ClothId, id: RendererId) {
        if let Some(entry) = self.entries.write().get_mut(&id) {
            entry.users.insert(cloth);
        }
    }

    pub fn end_use(&self, cloth: ClothId, id: RendererId) {
        if let Some(entry) = self.entries.write().get_mut(&id) {
            entry.users.remove(&cloth);
        }
    }

    /// Whether any cloth currently uses the renderer
    pub fn is_in_use(&self, id: RendererId) -> bool {
        self.entries.read().get(&id).is_some_and(|e| !e.users.is_empty())
    }

    /// Number of acquired renderers
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drape_core::TransformRecord;
    use glam::Vec3;

    fn triangle(id: u64) -> RenderSetup {
        RenderSetup {
            renderer_id: RendererId(id),
            name: format!("r{id}"),
            transform: TransformRecord::IDENTITY,
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            triangles: vec![[0, 1, 2]],
            ..Default::default()
        }
    }

    #[test]
    fn test_reference_counting() {
        let manager = RenderManager::new();
        manager.register_source(triangle(1)).unwrap();
        assert_eq!(manager.add_renderer(RendererId(2)), Err(ErrorCode::RendererNotFound));

        manager.add_renderer(RendererId(1)).unwrap();
        manager.add_renderer(RendererId(1)).unwrap();
        assert_eq!(manager.ref_count(RendererId(1)), 2);
        assert_eq!(manager.vertex_count(RendererId(1)), Some(3));

        manager.remove_renderer(RendererId(1));
        assert_eq!(manager.len(), 1);
        manager.remove_renderer(RendererId(1));
        assert!(manager.is_empty());
        assert!(manager.has_source(RendererId(1)));
    }

    #[test]
    fn test_use_tracking() {
        let manager = RenderManager::new();
        manager.register_source(triangle(1)).unwrap();
        manager.add_renderer(RendererId(1)).unwrap();
        manager.start_use(ClothId(1), RendererId(1));
        manager.start_use(ClothId(1), RendererId(1));
        assert!(manager.is_in_use(RendererId(1)));
        manager.end_use(ClothId(1), RendererId(1));
        assert!(!manager.is_in_use(RendererId(1)));
    }

    #[test]
    fn test_rejects_empty_source() {
        let manager = RenderManager::new();
        let empty = RenderSetup::default();
        assert_eq!(manager.register_source(empty), Err(ErrorCode::EmptyMesh));
    }
}
