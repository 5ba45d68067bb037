use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::blit::{BlitEngine, BlitOp, BlitRegion, Color, CompositeRule, Rect};
use crate::errors::BlitError;
use crate::surface::{FormatTag, Surface};

/// Reference blit engine for surfaces whose pixels live in addressable memory.
///
/// Every non-custom format is stored as 32-bit ARGB words, so one loop serves all pairs.
/// Destinations without alpha get their alpha channel forced to opaque.
#[derive(Debug, Default)]
pub struct MemoryBlitter {
    applied: Arc<AtomicU64>,
}

impl MemoryBlitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blits applied successfully by loops resolved from this engine.
    pub fn blit_count(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }
}

impl BlitEngine for MemoryBlitter {
    fn resolve_blit(
        &self,
        src: FormatTag,
        _rule: CompositeRule,
        dst: FormatTag,
    ) -> Result<Arc<dyn BlitOp>, BlitError> {
        if matches!(src, FormatTag::Custom(_)) || matches!(dst, FormatTag::Custom(_)) {
            return Err(BlitError::NoLoop { src, dst });
        }
        Ok(Arc::new(MemoryLoop {
            applied: self.applied.clone(),
        }))
    }
}

struct MemoryLoop {
    applied: Arc<AtomicU64>,
}

impl BlitOp for MemoryLoop {
    fn apply(
        &self,
        src: &dyn Surface,
        dst: &dyn Surface,
        rule: CompositeRule,
        clip: Option<Rect>,
        region: BlitRegion,
        bg: Option<Color>,
    ) -> Result<(), BlitError> {
        if src.is_lost() || dst.is_lost() {
            return Err(BlitError::SurfaceLost);
        }

        let src_size = src.size();
        let dst_size = dst.size();
        let fits = |x: u32, y: u32, w: u32, h: u32| {
            x.checked_add(region.width).is_some_and(|r| r <= w)
                && y.checked_add(region.height).is_some_and(|b| b <= h)
        };
        if !fits(region.src_x, region.src_y, src_size.width, src_size.height)
            || !fits(region.dst_x, region.dst_y, dst_size.width, dst_size.height)
        {
            return Err(BlitError::SizeMismatch {
                width: region.width,
                height: region.height,
            });
        }

        let src_pixels = src.pixels().ok_or(BlitError::NotAddressable)?.load()?;
        let dst_store = dst.pixels().ok_or(BlitError::NotAddressable)?;
        let mut out = dst_store.load()?;
        let opaque_dst = !dst.format().has_alpha();

        for row in 0..region.height {
            for col in 0..region.width {
                let dx = region.dst_x + col;
                let dy = region.dst_y + row;
                if let Some(clip) = clip {
                    if !clip.contains(dx as i32, dy as i32) {
                        continue;
                    }
                }

                let si = (region.src_y + row) as usize * src_size.width as usize
                    + (region.src_x + col) as usize;
                let di = dy as usize * dst_size.width as usize + dx as usize;

                let mut s = src_pixels[si];
                if let Some(bg) = bg {
                    if s >> 24 == 0 {
                        s = bg.argb();
                    }
                }

                let mut d = compose(rule, s, out[di]);
                if opaque_dst {
                    d |= 0xff00_0000;
                }
                out[di] = d;
            }
        }

        dst_store.store(&out)?;
        self.applied.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

fn compose(rule: CompositeRule, s: u32, d: u32) -> u32 {
    match rule {
        CompositeRule::Src | CompositeRule::SrcNoEa => s,
        CompositeRule::SrcOver => blend(s, d, s >> 24),
        CompositeRule::SrcOverAlpha(extra) => blend(s, d, (s >> 24) * extra as u32 / 255),
        CompositeRule::Xor => d ^ (s & 0x00ff_ffff),
    }
}

fn blend(s: u32, d: u32, a: u32) -> u32 {
    if a == 0xff {
        return s;
    }
    if a == 0 {
        return d;
    }

    let inv = 255 - a;
    let channel = |shift: u32| {
        let sc = (s >> shift) & 0xff;
        let dc = (d >> shift) & 0xff;
        ((sc * a + dc * inv) / 255) << shift
    };
    let da = d >> 24;
    let alpha = (a + da * inv / 255).min(0xff) << 24;
    alpha | channel(16) | channel(8) | channel(0)
}
