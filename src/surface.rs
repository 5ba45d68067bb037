//! Surfaces: addressable pixel buffers with a device affinity.
//!
//! A [`Surface`] is what the managers hand out to renderers. Concrete surfaces are provided by the
//! platform (accelerated ones) or by this crate ([`SoftwareSurface`] for the authoritative copy).
//! Each surface embeds a [`SurfaceState`] with the bookkeeping the cache relies on: the lost flag,
//! the needs-backup flag and the copy counter.

use std::any::Any;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceConfig;
use crate::errors::{BlitError, RestoreError};

pub mod scratch;
pub mod software;

pub use scratch::ScratchPool;
pub use software::SoftwareSurface;

/// Shared, type-erased surface.
pub type SurfaceHandle = Arc<dyn Surface>;

/// A unique identifier for a surface, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(Uuid);

impl SurfaceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SurfaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Size of a surface in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }
}

/// Pixel layout of a surface. Blit loops are looked up by the pair of source and destination tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatTag {
    /// 32-bit ARGB, straight alpha.
    IntArgb,
    /// 32-bit ARGB, premultiplied alpha.
    IntArgbPre,
    /// 32-bit RGB, no alpha.
    IntRgb,
    /// 32-bit ARGB where alpha is either fully opaque or fully transparent.
    IntArgbBm,
    /// Device specific layout the reference loops do not know about.
    Custom(u32),
}

impl FormatTag {
    pub fn has_alpha(&self) -> bool {
        matches!(self, FormatTag::IntArgb | FormatTag::IntArgbPre | FormatTag::IntArgbBm)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// Cache bookkeeping carried by every surface.
#[derive(Debug, Default)]
pub struct SurfaceState {
    lost: AtomicBool,
    needs_backup: AtomicBool,
    copies: AtomicU64,
}

impl SurfaceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn set_lost(&self, lost: bool) {
        self.lost.store(lost, Ordering::Release);
    }

    pub fn needs_backup(&self) -> bool {
        self.needs_backup.load(Ordering::Acquire)
    }

    pub fn set_needs_backup(&self, needed: bool) {
        self.needs_backup.store(needed, Ordering::Release);
    }

    /// Increments the copy counter and returns the new value.
    pub fn increase_copy_count(&self) -> u64 {
        self.copies.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub fn copy_count(&self) -> u64 {
        self.copies.load(Ordering::Acquire)
    }
}

/// Word-addressed pixel storage a blit engine can read and write.
pub trait PixelStore: Send + Sync {
    /// Copies the whole buffer out.
    fn load(&self) -> Result<Vec<u32>, BlitError>;

    /// Replaces the whole buffer. `pixels` must match the surface size.
    fn store(&self, pixels: &[u32]) -> Result<(), BlitError>;
}

/// An opaque pixel buffer with an identity and a device configuration.
pub trait Surface: Send + Sync {
    fn id(&self) -> SurfaceId;

    /// The device configuration this surface lives on.
    fn config(&self) -> DeviceConfig;

    fn format(&self) -> FormatTag;

    fn size(&self) -> SurfaceSize;

    /// True when the surface resides in fast, device-local memory.
    fn is_accelerated(&self) -> bool;

    fn state(&self) -> &SurfaceState;

    fn as_any(&self) -> &dyn Any;

    /// Pixel access for blit engines that copy through system memory.
    fn pixels(&self) -> Option<&dyn PixelStore> {
        None
    }

    fn is_lost(&self) -> bool {
        self.state().is_lost()
    }

    fn set_lost(&self, lost: bool) {
        self.state().set_lost(lost)
    }

    /// Marks the surface lost without releasing its resources.
    fn invalidate(&self) {
        self.set_lost(true)
    }

    /// Releases the underlying resources. The surface must not be used as a source afterwards.
    fn flush(&self) {}

    /// Brings a lost surface back to a usable (but empty) state.
    fn restore(&self) -> Result<(), RestoreError> {
        Ok(())
    }

    fn needs_backup(&self) -> bool {
        self.state().needs_backup()
    }

    fn set_needs_backup(&self, needed: bool) {
        self.state().set_needs_backup(needed)
    }

    fn increase_copy_count(&self) -> u64 {
        self.state().increase_copy_count()
    }
}

impl std::fmt::Debug for dyn Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id())
            .field("config", &self.config())
            .field("format", &self.format())
            .field("accelerated", &self.is_accelerated())
            .field("lost", &self.is_lost())
            .finish()
    }
}

/// Identity comparison between two surfaces.
pub fn same_surface(a: &dyn Surface, b: &dyn Surface) -> bool {
    a.id() == b.id()
}
