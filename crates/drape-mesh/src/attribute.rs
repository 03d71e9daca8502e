//! Per-vertex attributes

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Vertex attribute flags.
    ///
    /// A vertex with neither `MOVE` nor `FIXED` is excluded from simulation.
    /// Selections may carry both flags after a union merge; proxy conversion
    /// resolves that with `FIXED` taking priority.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct VertexAttribute: u8 {
        /// Simulated vertex
        const MOVE = 0x01;
        /// Vertex follows its skinning
        const FIXED = 0x02;
        /// Vertex outside the painted motion region
        const INVALID_MOTION = 0x08;
        /// Vertex ignores colliders
        const DISABLE_COLLISION = 0x10;
    }
}

impl VertexAttribute {
    /// Movable vertex
    pub fn is_move(&self) -> bool {
        self.contains(Self::MOVE)
    }

    /// Fixed vertex
    pub fn is_fixed(&self) -> bool {
        self.contains(Self::FIXED)
    }

    /// Neither movable nor fixed
    pub fn is_invalid(&self) -> bool {
        !self.intersects(Self::MOVE | Self::FIXED)
    }

    /// Collapse a union selection into a single role; `FIXED` wins over `MOVE`.
    pub fn resolved(self) -> Self {
        if self.is_fixed() {
            self - Self::MOVE
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_prefers_fixed() {
        let both = VertexAttribute::MOVE | VertexAttribute::FIXED | VertexAttribute::INVALID_MOTION;
        let r = both.resolved();
        assert!(r.is_fixed());
        assert!(!r.is_move());
        assert!(r.contains(VertexAttribute::INVALID_MOTION));
        assert_eq!(VertexAttribute::MOVE.resolved(), VertexAttribute::MOVE);
    }

    #[test]
    fn test_invalid() {
        assert!(VertexAttribute::empty().is_invalid());
        assert!(VertexAttribute::INVALID_MOTION.is_invalid());
        assert!(!VertexAttribute::MOVE.is_invalid());
    }
}
