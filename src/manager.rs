//! Surface managers.
//!
//! Every image that takes part in rendering has a [`SurfaceManager`]. It owns the surfaces that
//! represent the image's contents and decides, for every copy, which of them the renderer should
//! read from. Two variants are provided:
//!
//! - [`CachingSurfaceManager`] keeps the authoritative copy in system memory and caches it in one
//!   accelerated surface per device configuration once the image has been copied often enough.
//! - [`OffScreenSurfaceManager`] has no system memory backing: its primary surface is accelerated
//!   and other configurations are fed through an intermediate software surface.
//!
//! # Typical usage
//! ```
//! use std::sync::Arc;
//! use surfcache::blit::CompositeRule;
//! use surfcache::context::SurfaceContext;
//! use surfcache::device::DeviceConfig;
//! use surfcache::image::Image;
//! use surfcache::manager::{CachingSurfaceManager, SurfaceManager};
//! use surfcache::platform::MemoryPlatform;
//! use surfcache::surface::{FormatTag, SurfaceSize};
//!
//! let platform = MemoryPlatform::new();
//! let ctx = SurfaceContext::builder(Arc::new(platform.clone())).build();
//! let image = Image::new(16, 16, FormatTag::IntArgb);
//! let manager = CachingSurfaceManager::new(&image, ctx);
//!
//! let screen = platform.create_destination(DeviceConfig::new(0, 0), SurfaceSize::new(64, 64));
//! let src = manager.source_surface(screen.as_ref(), CompositeRule::SrcOver, None, false);
//! // first copy always comes from system memory
//! assert!(!src.is_accelerated());
//! ```

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::blit::{Color, CompositeRule};
use crate::device::DeviceConfig;
use crate::surface::{Surface, SurfaceHandle};

pub mod caching;
pub mod offscreen;
pub mod strategy;

pub use caching::CachingSurfaceManager;
pub use offscreen::OffScreenSurfaceManager;
pub use strategy::{CacheStrategy, DirectCopy, RefreshOutcome, StagedCopy};

/// Acceleration status of an image on a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCapabilities {
    /// True when a usable accelerated copy exists for `config`.
    pub accelerated: bool,
    /// The configuration the answer applies to.
    pub config: DeviceConfig,
}

impl ImageCapabilities {
    pub fn unaccelerated(config: DeviceConfig) -> Self {
        Self {
            accelerated: false,
            config,
        }
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerated
    }
}

/// Snapshot of a manager's cache counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub created: u64,
    pub create_failures: u64,
    pub refresh_passes: u64,
    pub copy_failures: u64,
    pub restore_failures: u64,
    pub flushes: u64,
    pub invalidations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) created: AtomicU64,
    pub(crate) create_failures: AtomicU64,
    pub(crate) refresh_passes: AtomicU64,
    pub(crate) copy_failures: AtomicU64,
    pub(crate) restore_failures: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) invalidations: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            created: self.created.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            refresh_passes: self.refresh_passes.load(Ordering::Relaxed),
            copy_failures: self.copy_failures.load(Ordering::Relaxed),
            restore_failures: self.restore_failures.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Per-image owner of the surfaces representing the image's contents.
///
/// None of the operations fail: whenever acceleration cannot be used, the authoritative surface
/// is returned instead.
pub trait SurfaceManager: Send + Sync {
    /// The best surface to copy from onto `dst` with the given composite, background colour and
    /// scaling.
    fn source_surface(
        &self,
        dst: &dyn Surface,
        rule: CompositeRule,
        bg: Option<Color>,
        scale: bool,
    ) -> SurfaceHandle;

    /// The surface rendering into the image should target.
    fn destination_surface(&self) -> SurfaceHandle;

    /// Called by a lost surface that wants to restore itself; returns the surface to copy from.
    fn restore_contents(&self) -> SurfaceHandle;

    /// Notification that the accelerated surfaces of this manager were lost.
    fn accelerated_surface_lost(&self) {}

    /// Whether the image is accelerated on `config`, or on the default configuration.
    fn capabilities(&self, config: Option<DeviceConfig>) -> ImageCapabilities {
        ImageCapabilities::unaccelerated(config.unwrap_or(DeviceConfig::SYSTEM))
    }

    /// Makes sure the accelerated surface for `config` exists and is up to date.
    fn validate(&self, _config: DeviceConfig) {}

    /// Releases ancillary surfaces, such as copies cached in accelerated memory.
    fn flush(&self) {}

    /// Marks all accelerated surfaces lost without releasing them; they are recreated lazily.
    fn invalidate_accelerated_surfaces(&self) {}

    /// A priority of `0.0` disables acceleration for the image.
    fn set_acceleration_priority(&self, _priority: f32) {}

    fn set_local_acceleration_enabled(&self, _enabled: bool) {}

    fn as_any(&self) -> &dyn Any;
}
