//! Pre-built cloth data
//!
//! A finished build can be exported as a shared blob ([`SharePreBuildData`],
//! bincode) plus a small per-instance overlay ([`UniquePreBuildData`]).
//! Instances carrying the same blob share one deserialized copy through the
//! [`PreBuildStore`], keyed by a hash of the blob.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::AHashMap;
use drape_constraints::ConstraintSet;
use drape_core::ErrorCode;
use drape_mesh::{UniqueMeshData, VirtualMesh};
use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::definition::ClothType;

/// Format version of pre-build data
pub const PRE_BUILD_VERSION: u32 = 1;

/// Content key of a shared blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreBuildKey(pub u64);

impl PreBuildKey {
    /// Key derived from the blob bytes
    pub fn from_content(content: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl fmt::Display for PreBuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Build output shared by every instance of the same authored cloth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharePreBuildData {
    pub version: u32,
    pub cloth_type: ClothType,
    /// Cloth transform scale at build time
    pub build_scale: Vec3,
    pub proxy_mesh: VirtualMesh,
    /// Mapped render meshes in renderer order
    pub render_meshes: Vec<VirtualMesh>,
    pub constraints: ConstraintSet,
}

impl SharePreBuildData {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ErrorCode> {
        bincode::serialize(self).map_err(|e| {
            log::error!("pre-build serialization failed: {}", e);
            ErrorCode::PreBuildInvalid
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ErrorCode> {
        let data: Self = bincode::deserialize(bytes).map_err(|e| {
            log::error!("pre-build deserialization failed: {}", e);
            ErrorCode::PreBuildDeserialization
        })?;
        if data.version != PRE_BUILD_VERSION || !data.proxy_mesh.is_proxy() {
            return Err(ErrorCode::PreBuildDeserialization);
        }
        Ok(data)
    }
}

/// Per-instance overlay over the shared data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UniquePreBuildData {
    pub version: u32,
    pub proxy_mesh: UniqueMeshData,
    pub render_meshes: Vec<UniqueMeshData>,
}

/// Pre-built data attached to a cloth definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreBuildData {
    /// Encoded [`SharePreBuildData`]
    pub shared: Vec<u8>,
    pub unique: UniquePreBuildData,
}

impl PreBuildData {
    /// Whether any data is present
    pub fn has_data(&self) -> bool {
        !self.shared.is_empty()
    }

    pub fn key(&self) -> PreBuildKey {
        PreBuildKey::from_content(&self.shared)
    }

    /// Structural checks that do not need decoding
    pub fn validate(&self) -> Result<(), ErrorCode> {
        if !self.has_data() || self.unique.version != PRE_BUILD_VERSION {
            return Err(ErrorCode::PreBuildInvalid);
        }
        Ok(())
    }
}

/// Decoded shared data, ready to hand out to instances
#[derive(Debug)]
pub struct ShareDeserializationData {
    pub cloth_type: ClothType,
    pub build_scale: Vec3,
    pub proxy_mesh: Arc<VirtualMesh>,
    pub render_meshes: Vec<Arc<VirtualMesh>>,
    pub constraints: Arc<ConstraintSet>,
}

impl From<SharePreBuildData> for ShareDeserializationData {
    fn from(data: SharePreBuildData) -> Self {
        Self {
            cloth_type: data.cloth_type,
            build_scale: data.build_scale,
            proxy_mesh: Arc::new(data.proxy_mesh),
            render_meshes: data.render_meshes.into_iter().map(Arc::new).collect(),
            constraints: Arc::new(data.constraints),
        }
    }
}

struct StoreEntry {
    data: Arc<ShareDeserializationData>,
    ref_count: usize,
}

/// Deduplicating store of decoded shared data
#[derive(Default)]
pub struct PreBuildStore {
    entries: RwLock<AHashMap<PreBuildKey, StoreEntry>>,
}

impl PreBuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode (once) and reference the shared blob
    pub fn register(&self, data: &PreBuildData) -> Result<Arc<ShareDeserializationData>, ErrorCode> {
        let key = data.key();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&key) {
            entry.ref_count += 1;
            return Ok(Arc::clone(&entry.data));
        }

        let decoded = Arc::new(ShareDeserializationData::from(SharePreBuildData::from_bytes(&data.shared)?));
        log::debug!("pre-build data {} registered", key);
        entries.insert(
            key,
            StoreEntry {
                data: Arc::clone(&decoded),
                ref_count: 1,
            },
        );
        Ok(decoded)
    }

    pub fn get(&self, key: PreBuildKey) -> Option<Arc<ShareDeserializationData>> {
        self.entries.read().get(&key).map(|e| Arc::clone(&e.data))
    }

    /// Drop one reference; the decoded data is released at zero
    pub fn unregister(&self, key: PreBuildKey) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&key) {
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                entries.remove(&key);
                log::debug!("pre-build data {} released", key);
            }
        }
    }

    pub fn ref_count(&self, key: PreBuildKey) -> usize {
        self.entries.read().get(&key).map_or(0, |e| e.ref_count)
    }

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

    #[test]
    fn test_key_from_content() {
        assert_eq!(PreBuildKey::from_content(b"cloth"), PreBuildKey::from_content(b"cloth"));
        assert_ne!(PreBuildKey::from_content(b"cloth"), PreBuildKey::from_content(b"cloth2"));
    }

    #[test]
    fn test_corrupt_blob() {
        let store = PreBuildStore::new();
        let data = PreBuildData {
            shared: vec![1, 2, 3],
            unique: UniquePreBuildData {
                version: PRE_BUILD_VERSION,
                ..Default::default()
            },
        };
        assert!(data.validate().is_ok());
        assert_eq!(store.register(&data).err(), Some(ErrorCode::PreBuildDeserialization));
        assert!(store.is_empty());
    }

    #[test]
    fn test_validate_requires_data() {
        assert_eq!(PreBuildData::default().validate(), Err(ErrorCode::PreBuildInvalid));
    }

    #[test]
    fn test_non_proxy_is_rejected() {
        let share = SharePreBuildData {
            version: PRE_BUILD_VERSION,
            cloth_type: ClothType::MeshCloth,
            build_scale: Vec3::ONE,
            proxy_mesh: VirtualMesh::new("raw"),
            render_meshes: Vec::new(),
            constraints: ConstraintSet::default(),
        };
        let bytes = share.to_bytes().unwrap();
        assert_eq!(SharePreBuildData::from_bytes(&bytes).err(), Some(ErrorCode::PreBuildDeserialization));
    }
}
