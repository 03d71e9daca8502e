//! Hard limits and fixed pipeline constants

use std::time::Duration;

/// Maximum proxy mesh vertex count (16-bit index range)
pub const MAX_PROXY_VERTEX_COUNT: usize = u16::MAX as usize;

/// Maximum proxy mesh edge count
pub const MAX_PROXY_EDGE_COUNT: usize = u16::MAX as usize;

/// Maximum proxy mesh triangle count
pub const MAX_PROXY_TRIANGLE_COUNT: usize = u16::MAX as usize;

/// Default number of simulation team slots
pub const MAX_TEAM_COUNT: usize = 4096;

/// Smallest selection margin / grid cell
pub const MINIMUM_GRID_SIZE: f32 = 0.001;

/// Vertices closer than this are welded before reduction
pub const WELD_DISTANCE: f32 = 0.0001;

/// Paint maps are decoded at the largest mip with at most this many pixels (128 x 128)
pub const PAINT_MAP_PIXEL_BUDGET: usize = 128 * 128;

/// Paint texel channel threshold; a byte above it sets the flag
pub const PAINT_BORDER: u8 = 32;

/// Delay before a runtime build starts, coalescing enable/disable churn
pub const BUILD_START_DELAY: Duration = Duration::from_millis(5);

/// Partner sync polling attempts
pub const SYNC_TIMEOUT_ATTEMPTS: u32 = 100;

/// Partner sync polling interval
pub const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(20);
