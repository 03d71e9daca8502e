//! Cloth lifecycle state
//!
//! The state is a set of independent bits. No transition implies another;
//! callers combine bits through the composite predicates on [`StateCell`].

use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Named lifecycle bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClothState: u32 {
        const VALID = 1 << 0;
        const ENABLE = 1 << 1;
        const INIT_SUCCESS = 1 << 3;
        const INIT_COMPLETE = 1 << 4;
        const BUILD = 1 << 5;
        const RUNNING = 1 << 6;
        const DISABLE_AUTO_BUILD = 1 << 7;
        const CAMERA_CULLING_INVISIBLE = 1 << 8;
        const CAMERA_CULLING_KEEP = 1 << 9;
        const SKIP_WRITING = 1 << 10;
        const USE_PRE_BUILD = 1 << 12;
        const DISTANCE_CULLING_INVISIBLE = 1 << 13;
        const UPDATE_TANGENT = 1 << 14;
        const COMPONENT = 1 << 15;
        const VERIFICATION = 1 << 16;
    }
}

/// Atomic holder of a [`ClothState`]
#[derive(Debug, Default)]
pub struct StateCell(AtomicU32);

impl StateCell {
    /// Empty state
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Snapshot of every bit
    pub fn get(&self) -> ClothState {
        ClothState::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    /// Whether every bit of `flags` is set
    pub fn is(&self, flags: ClothState) -> bool {
        self.get().contains(flags)
    }

    /// Set or clear `flags`
    pub fn set(&self, flags: ClothState, on: bool) {
        if on {
            self.0.fetch_or(flags.bits(), Ordering::AcqRel);
        } else {
            self.0.fetch_and(!flags.bits(), Ordering::AcqRel);
        }
    }

    /// Clear every bit
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        self.is(ClothState::VALID)
    }

    pub fn is_running(&self) -> bool {
        self.is(ClothState::RUNNING)
    }

    /// Whether the host wants the cloth active: `COMPONENT` and `VERIFICATION`
    pub fn wants_enable(&self) -> bool {
        self.is(ClothState::COMPONENT | ClothState::VERIFICATION)
    }

    /// Whether a runtime build may start now
    pub fn can_start_build(&self) -> bool {
        let s = self.get();
        s.contains(ClothState::VALID | ClothState::INIT_SUCCESS)
            && !s.intersects(ClothState::BUILD | ClothState::RUNNING | ClothState::USE_PRE_BUILD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let state = StateCell::new();
        state.set(ClothState::VALID | ClothState::INIT_SUCCESS, true);
        assert!(state.is_valid());
        assert!(state.can_start_build());

        state.set(ClothState::BUILD, true);
        assert!(!state.can_start_build());
        state.set(ClothState::BUILD, false);
        state.set(ClothState::USE_PRE_BUILD, true);
        assert!(!state.can_start_build());

        state.clear();
        assert_eq!(state.get(), ClothState::empty());
    }

    #[test]
    fn test_enable_needs_both_bits() {
        let state = StateCell::new();
        state.set(ClothState::COMPONENT, true);
        assert!(!state.wants_enable());
        state.set(ClothState::VERIFICATION, true);
        assert!(state.wants_enable());
    }

    #[test]
    fn test_bit_positions() {
        assert_eq!(ClothState::INIT_SUCCESS.bits(), 8);
        assert_eq!(ClothState::USE_PRE_BUILD.bits(), 1 << 12);
        assert_eq!(ClothState::VERIFICATION.bits(), 1 << 16);
    }
}
