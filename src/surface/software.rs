use std::any::Any;
use std::sync::Arc;

use crate::device::DeviceConfig;
use crate::errors::BlitError;
use crate::raster::Raster;
use crate::surface::{FormatTag, PixelStore, Surface, SurfaceId, SurfaceSize, SurfaceState};

/// System-memory surface over an image raster.
///
/// This is the authoritative copy of an image: it is always valid and always reflects the last
/// write. Pixels written through the blit interface mark the surface as needing backup so the
/// accelerated copies get refreshed.
#[derive(Debug)]
pub struct SoftwareSurface {
    id: SurfaceId,
    raster: Arc<Raster>,
    format: FormatTag,
    state: SurfaceState,
}

impl SoftwareSurface {
    pub fn new(raster: Arc<Raster>, format: FormatTag) -> Self {
        Self {
            id: SurfaceId::new(),
            raster,
            format,
            state: SurfaceState::new(),
        }
    }

    /// A surface with its own, private raster.
    pub fn with_size(size: SurfaceSize, format: FormatTag) -> Self {
        Self::new(Arc::new(Raster::new(size.width, size.height)), format)
    }

    pub fn raster(&self) -> &Arc<Raster> {
        &self.raster
    }
}

impl PixelStore for SoftwareSurface {
    fn load(&self) -> Result<Vec<u32>, BlitError> {
        Ok(self.raster.snapshot())
    }

    fn store(&self, pixels: &[u32]) -> Result<(), BlitError> {
        if !self.raster.store_silently(pixels) {
            let size = self.raster.size();
            return Err(BlitError::SizeMismatch {
                width: size.width,
                height: size.height,
            });
        }
        self.state.set_needs_backup(true);
        Ok(())
    }
}

impl Surface for SoftwareSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn config(&self) -> DeviceConfig {
        DeviceConfig::SYSTEM
    }

    fn format(&self) -> FormatTag {
        self.format
    }

    fn size(&self) -> SurfaceSize {
        self.raster.size()
    }

    fn is_accelerated(&self) -> bool {
        false
    }

    fn state(&self) -> &SurfaceState {
        &self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn pixels(&self) -> Option<&dyn PixelStore> {
        Some(self)
    }
}
