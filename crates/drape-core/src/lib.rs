//! # Drape Core
//!
//! Foundational types for the Drape cloth build pipeline:
//! - **Math**: bounding boxes and matrix helpers on top of glam
//! - **Transforms**: immutable transform snapshots safe to hand to worker threads
//! - **Errors**: failure codes, the build error type and the per-attempt result object
//! - **Cancellation**: cooperative cancellation token shared by every pipeline stage
//! - **Config**: reduction settings and simulation parameters
//! - **Limits**: hard capacity limits and pipeline timing constants

pub mod cancel;
pub mod config;
pub mod error;
pub mod limits;
pub mod math;
pub mod transform;

pub use cancel::CancellationToken;
pub use config::{ClothParameters, CurveRange, NormalAlignment, ReductionSettings};
pub use error::{BuildError, BuildResult, ErrorCode, ErrorKind, ResultCode};
pub use math::Aabb;
pub use transform::{TransformId, TransformRecord};
