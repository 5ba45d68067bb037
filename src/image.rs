//! In-memory images.
//!
//! An [`Image`] owns its [`Raster`] and carries the hints the surface managers look at. The image
//! does not hold its manager; the [`ImageRegistry`](crate::registry::ImageRegistry) maps images to
//! managers.

use std::fmt::Display;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::raster::Raster;
use crate::surface::{FormatTag, SurfaceSize};

/// A unique identifier for an image, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ImageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of image this is. Only buffered images get a caching manager by default.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageKind {
    /// Image with a mutable raster in system memory.
    Buffered,
    /// Offscreen rendering target whose primary surface lives in accelerated memory.
    Volatile,
    /// Image produced by a decoder that manages its own surfaces.
    Toolkit,
}

pub struct Image {
    id: ImageId,
    kind: ImageKind,
    format: FormatTag,
    raster: Arc<Raster>,
    priority: AtomicU32,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("format", &self.format)
            .field("size", &self.size())
            .field("priority", &self.acceleration_priority())
            .finish()
    }
}

impl Image {
    /// A buffered image of `width` x `height` transparent pixels.
    pub fn new(width: u32, height: u32, format: FormatTag) -> Self {
        Self::with_raster(ImageKind::Buffered, Arc::new(Raster::new(width, height)), format)
    }

    /// An offscreen image meant to be managed by an offscreen surface manager.
    pub fn volatile(width: u32, height: u32, format: FormatTag) -> Self {
        Self::with_raster(ImageKind::Volatile, Arc::new(Raster::new(width, height)), format)
    }

    pub fn with_raster(kind: ImageKind, raster: Arc<Raster>, format: FormatTag) -> Self {
        Self {
            id: ImageId::new(),
            kind,
            format,
            raster,
            priority: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn format(&self) -> FormatTag {
        self.format
    }

    pub fn raster(&self) -> &Arc<Raster> {
        &self.raster
    }

    pub fn size(&self) -> SurfaceSize {
        self.raster.size()
    }

    /// Hint in `0.0..=1.0`; `0.0` means the image should never be accelerated.
    pub fn acceleration_priority(&self) -> f32 {
        f32::from_bits(self.priority.load(Ordering::Acquire))
    }

    /// Stores the hint, clamped to `0.0..=1.0`. Use
    /// [`ImageRegistry::set_acceleration_priority`](crate::registry::ImageRegistry::set_acceleration_priority)
    /// to also inform the image's manager.
    pub fn set_acceleration_priority(&self, priority: f32) {
        let clamped = if priority.is_nan() { 0.0 } else { priority.clamp(0.0, 1.0) };
        self.priority.store(clamped.to_bits(), Ordering::Release);
    }
}
