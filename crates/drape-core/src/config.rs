//! Configuration records
//!
//! Serde-friendly settings shared by the mesh pipeline, the constraint
//! builders and the cloth process.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Polygon reduction settings.
///
/// Distances are absolute, in cloth-local units. Reduced vertices never end
/// up further than `simple_distance + shape_distance` from their survivor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionSettings {
    /// Grid merge distance (0 disables)
    pub simple_distance: f32,
    /// Edge-connected merge distance (0 disables)
    pub shape_distance: f32,
}

impl ReductionSettings {
    /// Upper bound accepted for either distance
    pub const MAX_DISTANCE: f32 = 0.2;

    /// Reduction with both passes disabled
    pub const DISABLED: Self = Self {
        simple_distance: 0.0,
        shape_distance: 0.0,
    };

    /// Whether any reduction pass runs
    pub fn is_enabled(&self) -> bool {
        self.simple_distance > 0.0 || self.shape_distance > 0.0
    }

    /// Check ranges
    pub fn validate(&self) -> Result<(), ErrorCode> {
        let ok = |d: f32| d.is_finite() && (0.0..=Self::MAX_DISTANCE).contains(&d);
        if ok(self.simple_distance) && ok(self.shape_distance) {
            Ok(())
        } else {
            Err(ErrorCode::InvalidReductionSettings)
        }
    }
}

impl Default for ReductionSettings {
    fn default() -> Self {
        Self {
            simple_distance: 0.05,
            shape_distance: 0.05,
        }
    }
}

/// Value interpolated from `start` (depth 0, fixed side) to `end` (deepest vertex)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveRange {
    /// Value at depth 0
    pub start: f32,
    /// Value at depth 1
    pub end: f32,
}

impl CurveRange {
    /// Constant curve
    pub const fn constant(value: f32) -> Self {
        Self {
            start: value,
            end: value,
        }
    }

    /// Evaluate at a normalized depth
    pub fn evaluate(&self, depth: f32) -> f32 {
        crate::math::lerp(self.start, self.end, depth.clamp(0.0, 1.0))
    }

    fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.start >= 0.0 && self.end >= 0.0
    }
}

/// Distance constraint parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceParams {
    /// Stiffness along depth
    pub stiffness: CurveRange,
}

impl Default for DistanceParams {
    fn default() -> Self {
        Self {
            stiffness: CurveRange::constant(1.0),
        }
    }
}

/// Triangle bending parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BendingParams {
    /// Stiffness (0 disables the constraint)
    pub stiffness: f32,
}

impl Default for BendingParams {
    fn default() -> Self {
        Self { stiffness: 1.0 }
    }
}

/// Inertia parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InertiaParams {
    /// World movement influence (0..1)
    pub world_inertia: f32,
    /// Local movement influence (0..1)
    pub local_inertia: f32,
    /// Max center movement speed (m/s, negative = unlimited)
    pub movement_speed_limit: f32,
    /// Max center rotation speed (deg/s, negative = unlimited)
    pub rotation_speed_limit: f32,
    /// Max particle speed (m/s, negative = unlimited)
    pub particle_speed_limit: f32,
    /// Additional inertia by depth
    pub depth_inertia: f32,
}

impl Default for InertiaParams {
    fn default() -> Self {
        Self {
            world_inertia: 1.0,
            local_inertia: 1.0,
            movement_speed_limit: 5.0,
            rotation_speed_limit: 720.0,
            particle_speed_limit: 4.0,
            depth_inertia: 0.0,
        }
    }
}

/// Simulation parameters consumed by the constraint builders
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClothParameters {
    /// Gravity strength
    pub gravity: f32,
    /// Gravity direction (world)
    pub gravity_direction: Vec3,
    /// Velocity damping
    pub damping: CurveRange,
    /// Particle radius
    pub radius: CurveRange,
    /// Distance constraint
    pub distance: DistanceParams,
    /// Triangle bending constraint
    pub bending: BendingParams,
    /// Inertia constraint
    pub inertia: InertiaParams,
}

impl ClothParameters {
    /// Check ranges
    pub fn validate(&self) -> Result<(), ErrorCode> {
        let finite = self.gravity.is_finite()
            && self.gravity_direction.is_finite()
            && self.bending.stiffness.is_finite()
            && self.bending.stiffness >= 0.0
            && self.inertia.world_inertia.is_finite()
            && self.inertia.local_inertia.is_finite()
            && self.inertia.depth_inertia.is_finite();
        if finite && self.damping.is_valid() && self.radius.is_valid() && self.distance.stiffness.is_valid() {
            Ok(())
        } else {
            Err(ErrorCode::InvalidParameters)
        }
    }
}

impl Default for ClothParameters {
    fn default() -> Self {
        Self {
            gravity: 5.0,
            gravity_direction: Vec3::NEG_Y,
            damping: CurveRange::constant(0.05),
            radius: CurveRange::constant(0.02),
            distance: DistanceParams::default(),
            bending: BendingParams::default(),
            inertia: InertiaParams::default(),
        }
    }
}

/// How proxy normals are oriented after conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormalAlignment {
    /// Keep imported normals
    #[default]
    None,
    /// Face away from the proxy bounding-box center
    BoundingBoxCenter,
    /// Face away from the adjustment transform position
    Transform,
}
