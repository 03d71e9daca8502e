//! Paint maps
//!
//! Paint textures are decoded once on the main context into a
//! [`PaintMapData`] and then sampled per vertex on the worker.

use bitflags::bitflags;
use drape_core::limits::{PAINT_BORDER, PAINT_MAP_PIXEL_BUDGET};
use drape_core::ErrorCode;
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::attribute::VertexAttribute;

/// How vertex attributes are authored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaintMode {
    /// Selection data or explicit attribute arrays
    #[default]
    Manual,
    /// Red channel fixed, green channel move
    TextureFixedMove,
    /// As `TextureFixedMove`, unpainted blue channel marks invalid motion
    TextureFixedMoveLimit,
}

impl PaintMode {
    /// Whether paint textures are read
    pub fn uses_texture(&self) -> bool {
        !matches!(self, Self::Manual)
    }

    /// Channels read by this mode
    pub fn read_flags(&self) -> PaintReadFlags {
        match self {
            Self::Manual => PaintReadFlags::empty(),
            Self::TextureFixedMove => PaintReadFlags::FIXED | PaintReadFlags::MOVE,
            Self::TextureFixedMoveLimit => PaintReadFlags::all(),
        }
    }
}

bitflags! {
    /// Which paint channels are interpreted
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PaintReadFlags: u8 {
        /// Red channel
        const FIXED = 0x01;
        /// Green channel
        const MOVE = 0x02;
        /// Blue channel
        const LIMIT = 0x04;
    }
}

/// An RGBA8 texture with its mip chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaintTexture {
    /// Asset name
    pub name: String,
    /// CPU readable
    pub readable: bool,
    /// Mip 0 width
    pub width: u32,
    /// Mip 0 height
    pub height: u32,
    /// Pixel rows bottom-up, one entry per mip level
    pub mips: Vec<Vec<[u8; 4]>>,
}

impl PaintTexture {
    /// Single-level texture filled with one color
    pub fn solid(name: impl Into<String>, width: u32, height: u32, color: [u8; 4]) -> Self {
        Self {
            name: name.into(),
            readable: true,
            width,
            height,
            mips: vec![vec![color; (width * height) as usize]],
        }
    }
}

/// A decoded paint map ready for sampling
#[derive(Debug, Clone, PartialEq)]
pub struct PaintMapData {
    /// Decoded width
    pub width: u32,
    /// Decoded height
    pub height: u32,
    /// Pixels of the selected mip
    pub pixels: Vec<[u8; 4]>,
    /// Channels to interpret
    pub read_flags: PaintReadFlags,
}

impl PaintMapData {
    /// Pick the first mip within the pixel budget and copy its pixels.
    pub fn decode(texture: &PaintTexture, read_flags: PaintReadFlags) -> Result<Self, ErrorCode> {
        if !texture.readable {
            return Err(ErrorCode::PaintMapNotReadable);
        }
        if texture.width == 0 || texture.height == 0 || texture.mips.is_empty() {
            return Err(ErrorCode::InvalidPaintMap);
        }

        let mut width = texture.width;
        let mut height = texture.height;
        let mut pixel_count = (width as usize) * (height as usize);
        let mut mip = 0;
        while mip + 1 < texture.mips.len() && pixel_count > PAINT_MAP_PIXEL_BUDGET {
            mip += 1;
            pixel_count /= 4;
            width = (width / 2).max(1);
            height = (height / 2).max(1);
        }
        log::debug!("[{}] target mip:{} pixels:{} w:{} h:{}", texture.name, mip, pixel_count, width, height);

        let pixels = texture.mips[mip].clone();
        if pixels.len() != (width as usize) * (height as usize) {
            return Err(ErrorCode::InvalidPaintMap);
        }

        Ok(Self {
            width,
            height,
            pixels,
            read_flags,
        })
    }

    /// Texel under a wrapped uv
    pub fn sample(&self, uv: Vec2) -> [u8; 4] {
        let wrapped = ((uv % 1.0) + Vec2::ONE) % 1.0;
        let x = ((wrapped.x * self.width as f32) as u32).min(self.width - 1);
        let y = ((wrapped.y * self.height as f32) as u32).min(self.height - 1);
        self.pixels[(y * self.width + x) as usize]
    }

    /// Vertex attribute painted at `uv`
    pub fn attribute_at(&self, uv: Vec2) -> VertexAttribute {
        let [r, g, b, _] = self.sample(uv);
        let mut attr = VertexAttribute::empty();
        if self.read_flags.contains(PaintReadFlags::MOVE) && g > PAINT_BORDER {
            attr |= VertexAttribute::MOVE;
        } else if self.read_flags.contains(PaintReadFlags::FIXED) && r > PAINT_BORDER {
            attr |= VertexAttribute::FIXED;
        }
        if self.read_flags.contains(PaintReadFlags::LIMIT) && b <= PAINT_BORDER {
            attr |= VertexAttribute::INVALID_MOTION;
        }
        attr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mip_chain(size: u32, levels: usize) -> PaintTexture {
        let mut mips = Vec::new();
        let mut s = size;
        for _ in 0..levels {
            mips.push(vec![[0, 255, 0, 255]; (s * s) as usize]);
            s = (s / 2).max(1);
        }
        PaintTexture {
            name: "chain".into(),
            readable: true,
            width: size,
            height: size,
            mips,
        }
    }

    #[test]
    fn test_decode_selects_mip_within_budget() {
        let data = PaintMapData::decode(&mip_chain(512, 4), PaintReadFlags::all()).unwrap();
        assert_eq!((data.width, data.height), (128, 128));
        assert_eq!(data.pixels.len(), 128 * 128);
    }

    #[test]
    fn test_decode_without_mips_keeps_full_size() {
        let data = PaintMapData::decode(&mip_chain(256, 1), PaintReadFlags::all()).unwrap();
        assert_eq!(data.width, 256);
    }

    #[test]
    fn test_decode_not_readable() {
        let mut tex = mip_chain(4, 1);
        tex.readable = false;
        assert_eq!(PaintMapData::decode(&tex, PaintReadFlags::all()), Err(ErrorCode::PaintMapNotReadable));
    }

    #[test]
    fn test_threshold() {
        let tex = PaintTexture {
            name: "quad".into(),
            readable: true,
            width: 2,
            height: 1,
            mips: vec![vec![[33, 32, 32, 0], [0, 33, 33, 0]]],
        };
        let data = PaintMapData::decode(&tex, PaintMode::TextureFixedMoveLimit.read_flags()).unwrap();

        let left = data.attribute_at(Vec2::new(0.25, 0.5));
        assert_eq!(left, VertexAttribute::FIXED | VertexAttribute::INVALID_MOTION);

        let right = data.attribute_at(Vec2::new(0.75, 0.5));
        assert_eq!(right, VertexAttribute::MOVE);
    }

    #[test]
    fn test_uv_wraps() {
        let tex = PaintTexture {
            name: "quad".into(),
            readable: true,
            width: 2,
            height: 1,
            mips: vec![vec![[255, 0, 0, 0], [0, 255, 0, 0]]],
        };
        let data = PaintMapData::decode(&tex, PaintMode::TextureFixedMove.read_flags()).unwrap();
        assert_eq!(data.attribute_at(Vec2::new(-0.25, 0.0)), VertexAttribute::MOVE);
        assert_eq!(data.attribute_at(Vec2::new(1.25, 3.0)), VertexAttribute::FIXED);
    }
}
