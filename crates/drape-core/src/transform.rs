//! Transform Records
//!
//! Immutable value snapshots of scene transforms. Scene objects are never
//! touched off the main context; everything a background build needs is
//! captured into a [`TransformRecord`] first.

use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Stable identity of a scene transform (0 = none)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TransformId(pub u64);

impl TransformId {
    /// The empty id
    pub const NONE: Self = Self(0);

    /// Whether this id refers to a transform
    pub fn is_some(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for TransformId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of a transform's world state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformRecord {
    /// Source transform identity
    pub id: TransformId,
    /// World position
    pub position: Vec3,
    /// World rotation
    pub rotation: Quat,
    /// World scale
    pub scale: Vec3,
}

impl TransformRecord {
    /// Identity record with no source transform
    pub const IDENTITY: Self = Self {
        id: TransformId::NONE,
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Create a record from all components
    pub fn new(id: TransformId, position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            id,
            position,
            rotation,
            scale,
        }
    }

    /// Create a record with only a position
    pub fn from_position(id: TransformId, position: Vec3) -> Self {
        Self {
            id,
            position,
            ..Self::IDENTITY
        }
    }

    /// Decompose a local-to-world matrix
    pub fn from_matrix(id: TransformId, matrix: Mat4) -> Self {
        let (scale, rotation, position) = matrix.to_scale_rotation_translation();
        Self {
            id,
            position,
            rotation,
            scale,
        }
    }

    /// Local-to-world matrix
    pub fn local_to_world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// World-to-local matrix
    pub fn world_to_local(&self) -> Mat4 {
        self.local_to_world().inverse()
    }

    /// Copy the pose of another record, keeping this record's identity
    pub fn restore_from(&mut self, other: &TransformRecord) {
        self.position = other.position;
        self.rotation = other.rotation;
        self.scale = other.scale;
    }
}

impl Default for TransformRecord {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_matrix_roundtrip() {
        let record = TransformRecord::new(
            TransformId(7),
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_y(0.5),
            Vec3::splat(2.0),
        );
        let m = record.local_to_world();
        let p = (m * record.world_to_local()).transform_point3(Vec3::new(3.0, -1.0, 0.5));
        assert!((p - Vec3::new(3.0, -1.0, 0.5)).length() < 1e-4);

        let back = TransformRecord::from_matrix(TransformId(7), m);
        assert!((back.position - record.position).length() < 1e-4);
        assert!((back.scale - record.scale).length() < 1e-4);
    }

    #[test]
    fn test_restore_keeps_identity() {
        let mut a = TransformRecord::from_position(TransformId(1), Vec3::X);
        let b = TransformRecord::from_position(TransformId(2), Vec3::Y);
        a.restore_from(&b);
        assert_eq!(a.id, TransformId(1));
        assert_eq!(a.position, Vec3::Y);
    }
}
