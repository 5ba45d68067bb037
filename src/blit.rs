//! Blit engine interface.
//!
//! The managers never touch pixels themselves. They resolve a [`BlitOp`] for a pair of surface
//! formats and a [`CompositeRule`] from a [`BlitEngine`] and let it do the copy. The format
//! specific loops live behind that interface; [`memory::MemoryBlitter`] is the reference engine
//! for surfaces that expose a [`PixelStore`](crate::surface::PixelStore).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::BlitError;
use crate::surface::{FormatTag, Surface, SurfaceSize};

pub mod memory;

pub use memory::MemoryBlitter;

/// A 32-bit ARGB colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Color = Color(0xff00_0000);
    pub const WHITE: Color = Color(0xffff_ffff);
    pub const TRANSPARENT: Color = Color(0);

    pub fn argb(&self) -> u32 {
        self.0
    }

    pub fn alpha(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn is_opaque(&self) -> bool {
        self.alpha() == 0xff
    }
}

/// Porter-Duff style rule describing how source pixels combine with the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositeRule {
    /// Source replaces destination.
    Src,
    /// Source replaces destination, no extra alpha applied.
    SrcNoEa,
    /// Source over destination.
    SrcOver,
    /// Source over destination with an extra alpha in `0..=255`.
    SrcOverAlpha(u8),
    /// XOR mode painting.
    Xor,
}

impl CompositeRule {
    /// True when the rule blends source and destination rather than overwriting.
    pub fn is_translucent(&self) -> bool {
        match self {
            CompositeRule::SrcOverAlpha(a) => *a != 0xff,
            CompositeRule::Xor => true,
            _ => false,
        }
    }
}

/// Axis aligned rectangle in destination coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && (x as i64) < self.x as i64 + self.width as i64
            && (y as i64) < self.y as i64 + self.height as i64
    }
}

/// Source and destination origin plus extent of a copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlitRegion {
    pub src_x: u32,
    pub src_y: u32,
    pub dst_x: u32,
    pub dst_y: u32,
    pub width: u32,
    pub height: u32,
}

impl BlitRegion {
    /// Copy of a whole surface of `size` onto the same position.
    pub fn full(size: SurfaceSize) -> Self {
        Self {
            src_x: 0,
            src_y: 0,
            dst_x: 0,
            dst_y: 0,
            width: size.width,
            height: size.height,
        }
    }
}

/// A resolved copy loop.
pub trait BlitOp: Send + Sync {
    /// Copies `region` of `src` onto `dst`. Transparent source pixels are replaced by `bg` when
    /// one is given.
    fn apply(
        &self,
        src: &dyn Surface,
        dst: &dyn Surface,
        rule: CompositeRule,
        clip: Option<Rect>,
        region: BlitRegion,
        bg: Option<Color>,
    ) -> Result<(), BlitError>;
}

pub trait BlitEngine: Send + Sync {
    /// Finds the loop copying `src` pixels onto `dst` pixels under `rule`.
    fn resolve_blit(
        &self,
        src: FormatTag,
        rule: CompositeRule,
        dst: FormatTag,
    ) -> Result<Arc<dyn BlitOp>, BlitError>;
}

/// Copies the whole contents of `src` onto `dst`.
///
/// Without a background colour this is a plain overwrite. With one, the copy substitutes
/// transparent pixels, which is how bitmask images end up on destinations without alpha.
pub fn copy_contents(
    engine: &dyn BlitEngine,
    src: &dyn Surface,
    dst: &dyn Surface,
    bg: Option<Color>,
) -> Result<(), BlitError> {
    let size = src.size();
    if dst.size() != size {
        return Err(BlitError::SizeMismatch {
            width: size.width,
            height: size.height,
        });
    }

    let op = engine.resolve_blit(src.format(), CompositeRule::SrcNoEa, dst.format())?;
    let rule = match bg {
        None => CompositeRule::Src,
        Some(_) => CompositeRule::SrcOver,
    };
    op.apply(src, dst, rule, None, BlitRegion::full(size), bg)
}
