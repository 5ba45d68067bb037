//! Offscreen surface manager.
//!
//! Offscreen images render straight into accelerated memory. The primary surface is created on the
//! target configuration when the manager is built; copies onto other configurations get their own
//! accelerated surface, filled through an intermediate system memory surface. There is no system
//! memory backing, so contents of a lost primary cannot be recovered by the manager.

use std::any::Any;
use std::sync::Arc;

use crate::blit::{Color, CompositeRule};
use crate::context::SurfaceContext;
use crate::device::DeviceConfig;
use crate::image::{Image, ImageId};
use crate::manager::strategy::StagedCopy;
use crate::manager::{CacheStats, CachingSurfaceManager, ImageCapabilities, SurfaceManager};
use crate::surface::{SoftwareSurface, Surface, SurfaceHandle};

#[derive(Debug)]
pub struct OffScreenSurfaceManager {
    inner: Arc<CachingSurfaceManager>,
}

impl OffScreenSurfaceManager {
    /// Creates the manager, trying to place the primary surface on `target` or on the default
    /// configuration. When that fails the image falls back to a system memory surface.
    pub fn new(image: &Image, ctx: SurfaceContext, target: Option<DeviceConfig>) -> Arc<Self> {
        let mut primary: SurfaceHandle =
            Arc::new(SoftwareSurface::new(image.raster().clone(), image.format()));
        let mut seed = None;

        if ctx.config().acceleration_enabled && image.acceleration_priority() > 0.0 {
            let config = target.unwrap_or_else(|| ctx.default_config());
            match ctx
                .factory()
                .create_accelerated(config, image.size(), image.format())
            {
                Ok(surface) => {
                    log::debug!("Offscreen image {} placed on {}", image.id(), config);
                    primary = surface.clone();
                    seed = Some((config, surface));
                }
                Err(e) => {
                    log::debug!(
                        "Offscreen image {} stays in system memory, {} refused: {}",
                        image.id(),
                        config,
                        e
                    );
                }
            }
        }

        let inner =
            CachingSurfaceManager::assemble(image, ctx, primary, Box::new(StagedCopy::new(image.id())), seed);
        Arc::new(Self { inner })
    }

    pub fn image_id(&self) -> ImageId {
        self.inner.image_id()
    }

    /// The surface rendering goes to; accelerated unless creation failed.
    pub fn primary(&self) -> SurfaceHandle {
        self.inner.primary()
    }

    pub fn is_local_acceleration_enabled(&self) -> bool {
        self.inner.is_local_acceleration_enabled()
    }

    pub fn accelerated_surface(&self, config: DeviceConfig) -> Option<SurfaceHandle> {
        self.inner.accelerated_surface(config)
    }

    pub fn cached_configs(&self) -> Vec<DeviceConfig> {
        self.inner.cached_configs()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl SurfaceManager for OffScreenSurfaceManager {
    /// Unlike the caching manager, there is no copy threshold and no operation check: if the
    /// destination is accelerated, so is the source.
    fn source_surface(
        &self,
        dst: &dyn Surface,
        _rule: CompositeRule,
        _bg: Option<Color>,
        _scale: bool,
    ) -> SurfaceHandle {
        let ctx = self.inner.context();
        if ctx.config().acceleration_enabled
            && !self.inner.is_active(dst)
            && ctx.policy().is_dest_accelerated(dst)
        {
            if let Some(accelerated) = self.inner.validate_for(dst.config()) {
                return accelerated;
            }
        }
        self.inner.primary()
    }

    fn destination_surface(&self) -> SurfaceHandle {
        self.inner.destination_surface()
    }

    fn restore_contents(&self) -> SurfaceHandle {
        self.inner.restore_contents()
    }

    fn accelerated_surface_lost(&self) {
        self.inner.accelerated_surface_lost()
    }

    fn capabilities(&self, config: Option<DeviceConfig>) -> ImageCapabilities {
        self.inner.capabilities(config)
    }

    fn validate(&self, config: DeviceConfig) {
        self.inner.validate(config)
    }

    fn flush(&self) {
        self.inner.flush()
    }

    fn invalidate_accelerated_surfaces(&self) {
        self.inner.invalidate_accelerated_surfaces()
    }

    fn set_acceleration_priority(&self, priority: f32) {
        self.inner.set_acceleration_priority(priority)
    }

    fn set_local_acceleration_enabled(&self, enabled: bool) {
        self.inner.set_local_acceleration_enabled(enabled)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
