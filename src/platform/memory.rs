//! In-process reference platform.
//!
//! [`MemoryPlatform`] hands out [`VramSurface`]s: surfaces that behave like device-local memory
//! (they can be lost, invalidated and released) but keep their pixels in a plain buffer. Faults can
//! be injected for allocation, restoration and copies, which is how the cache's recovery paths
//! are exercised.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::blit::{Color, CompositeRule};
use crate::device::DeviceConfig;
use crate::errors::{BlitError, CreateError, RestoreError};
use crate::platform::{AccelerationPolicy, CreateResult, SurfaceFactory};
use crate::surface::{FormatTag, PixelStore, Surface, SurfaceId, SurfaceSize, SurfaceState};

#[derive(Default)]
struct Faults {
    failing_allocations: AtomicU32,
    allocations_failing: AtomicBool,
    driver_rejecting: AtomicBool,
    restore_failing: AtomicBool,
    copy_failing: Mutex<HashSet<DeviceConfig>>,
}

#[derive(Default)]
struct PlatformShared {
    /// Configurations that can hold accelerated surfaces. Empty means every non-system one.
    configs: Vec<DeviceConfig>,
    faults: Faults,
    created: AtomicU64,
    surfaces: Mutex<Vec<Weak<VramSurface>>>,
}

impl PlatformShared {
    fn copy_failing(&self, config: DeviceConfig) -> bool {
        self.faults
            .copy_failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&config)
    }

    fn supports(&self, config: DeviceConfig) -> bool {
        !config.is_system() && (self.configs.is_empty() || self.configs.contains(&config))
    }
}

/// Surface factory backed by system memory that simulates an accelerated device.
#[derive(Clone, Default)]
pub struct MemoryPlatform {
    shared: Arc<PlatformShared>,
}

impl std::fmt::Debug for MemoryPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPlatform")
            .field("configs", &self.shared.configs)
            .field("created", &self.created_count())
            .finish_non_exhaustive()
    }
}

impl MemoryPlatform {
    /// A platform accepting every non-system configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform that only supports the given configurations.
    pub fn with_configs(configs: &[DeviceConfig]) -> Self {
        Self {
            shared: Arc::new(PlatformShared {
                configs: configs.to_vec(),
                ..Default::default()
            }),
        }
    }

    /// The next `count` allocations fail with [`CreateError::AllocationFailed`].
    pub fn fail_next_allocations(&self, count: u32) {
        self.shared
            .faults
            .failing_allocations
            .store(count, Ordering::Release);
    }

    pub fn set_allocations_failing(&self, failing: bool) {
        self.shared
            .faults
            .allocations_failing
            .store(failing, Ordering::Release);
    }

    pub fn set_driver_rejecting(&self, rejecting: bool) {
        self.shared
            .faults
            .driver_rejecting
            .store(rejecting, Ordering::Release);
    }

    pub fn set_restore_failing(&self, failing: bool) {
        self.shared
            .faults
            .restore_failing
            .store(failing, Ordering::Release);
    }

    /// Makes every copy into surfaces on `config` fail.
    pub fn set_copy_failing(&self, config: DeviceConfig, failing: bool) {
        let mut set = self
            .shared
            .faults
            .copy_failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if failing {
            set.insert(config);
        } else {
            set.remove(&config);
        }
    }

    /// Number of accelerated surfaces created so far.
    pub fn created_count(&self) -> u64 {
        self.shared.created.load(Ordering::Acquire)
    }

    /// Accelerated surfaces that are still referenced by someone.
    pub fn live_surfaces(&self) -> Vec<Arc<VramSurface>> {
        let mut surfaces = self
            .shared
            .surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        surfaces.retain(|s| s.strong_count() > 0);
        surfaces.iter().filter_map(Weak::upgrade).collect()
    }

    /// Simulates the platform reclaiming device memory: every live surface is marked lost and
    /// its contents are released.
    pub fn lose_all(&self) {
        let live = self.live_surfaces();
        log::debug!("Losing {} accelerated surface(s)", live.len());
        for surface in live {
            surface.release();
        }
    }

    /// An accelerated surface to render into, such as a window back buffer. Faults do not apply.
    pub fn create_destination(&self, config: DeviceConfig, size: SurfaceSize) -> Arc<VramSurface> {
        Arc::new(VramSurface::new(
            config,
            size,
            FormatTag::IntRgb,
            Arc::downgrade(&self.shared),
        ))
    }

    fn check_faults(&self) -> Result<(), CreateError> {
        let faults = &self.shared.faults;
        if faults.allocations_failing.load(Ordering::Acquire) {
            return Err(CreateError::AllocationFailed);
        }
        let pending = faults.failing_allocations.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| n.checked_sub(1),
        );
        if pending.is_ok() {
            return Err(CreateError::AllocationFailed);
        }
        if faults.driver_rejecting.load(Ordering::Acquire) {
            return Err(CreateError::DriverRejected("device busy".into()));
        }
        Ok(())
    }
}

impl SurfaceFactory for MemoryPlatform {
    fn create_accelerated(
        &self,
        config: DeviceConfig,
        size: SurfaceSize,
        format: FormatTag,
    ) -> CreateResult {
        if !self.shared.supports(config) {
            return Err(CreateError::Unsupported);
        }
        self.check_faults()?;

        let surface = Arc::new(VramSurface::new(
            config,
            size,
            format,
            Arc::downgrade(&self.shared),
        ));
        self.shared.created.fetch_add(1, Ordering::AcqRel);
        self.shared
            .surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&surface));
        Ok(surface)
    }
}

/// Simulated device-local surface.
pub struct VramSurface {
    id: SurfaceId,
    config: DeviceConfig,
    size: SurfaceSize,
    format: FormatTag,
    state: SurfaceState,
    contents: Mutex<Option<Vec<u32>>>,
    writes: AtomicU64,
    platform: Weak<PlatformShared>,
}

impl std::fmt::Debug for VramSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VramSurface")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("lost", &self.state.is_lost())
            .field("released", &self.is_released())
            .finish()
    }
}

impl VramSurface {
    fn new(
        config: DeviceConfig,
        size: SurfaceSize,
        format: FormatTag,
        platform: Weak<PlatformShared>,
    ) -> Self {
        Self {
            id: SurfaceId::new(),
            config,
            size,
            format,
            state: SurfaceState::new(),
            contents: Mutex::new(Some(vec![0; size.pixel_count()])),
            writes: AtomicU64::new(0),
            platform,
        }
    }

    /// Number of successful stores into this surface.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Current contents, or `None` once released.
    pub fn snapshot(&self) -> Option<Vec<u32>> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn release(&self) {
        self.state.set_lost(true);
        *self.contents.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl PixelStore for VramSurface {
    fn load(&self) -> Result<Vec<u32>, BlitError> {
        self.snapshot().ok_or(BlitError::Released)
    }

    fn store(&self, pixels: &[u32]) -> Result<(), BlitError> {
        if let Some(platform) = self.platform.upgrade() {
            if platform.copy_failing(self.config) {
                return Err(BlitError::Driver(format!("copy to {} failed", self.config)));
            }
        }

        let mut contents = self.contents.lock().unwrap_or_else(PoisonError::into_inner);
        let buffer = contents.as_mut().ok_or(BlitError::Released)?;
        if buffer.len() != pixels.len() {
            return Err(BlitError::SizeMismatch {
                width: self.size.width,
                height: self.size.height,
            });
        }
        buffer.copy_from_slice(pixels);
        self.writes.fetch_add(1, Ordering::AcqRel);
        self.state.set_needs_backup(true);
        Ok(())
    }
}

impl Surface for VramSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn config(&self) -> DeviceConfig {
        self.config
    }

    fn format(&self) -> FormatTag {
        self.format
    }

    fn size(&self) -> SurfaceSize {
        self.size
    }

    fn is_accelerated(&self) -> bool {
        true
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

    fn flush(&self) {
        self.release();
    }

    fn restore(&self) -> Result<(), RestoreError> {
        if let Some(platform) = self.platform.upgrade() {
            if platform.faults.restore_failing.load(Ordering::Acquire) {
                return Err(RestoreError::InvalidPipe(format!(
                    "cannot restore surface on {}",
                    self.config
                )));
            }
        }

        let mut contents = self.contents.lock().unwrap_or_else(PoisonError::into_inner);
        if contents.is_none() {
            *contents = Some(vec![0; self.size.pixel_count()]);
        }
        Ok(())
    }
}

/// Policy matching the reference platform: copies onto accelerated destinations benefit from an
/// accelerated source unless they blend or scale with a background colour.
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicy {
    transparent_pixel_color: Option<Color>,
}

impl DefaultPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bitmask images get their transparent pixels replaced by `color` when cached.
    pub fn with_transparent_pixel_color(color: Color) -> Self {
        Self {
            transparent_pixel_color: Some(color),
        }
    }
}

impl AccelerationPolicy for DefaultPolicy {
    fn is_operation_supported(
        &self,
        _dst: &dyn Surface,
        rule: CompositeRule,
        bg: Option<Color>,
        scale: bool,
    ) -> bool {
        !rule.is_translucent() && !(scale && bg.is_some())
    }

    fn transparent_pixel_color(&self, format: FormatTag) -> Option<Color> {
        match format {
            FormatTag::IntArgbBm => self.transparent_pixel_color,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: DeviceConfig = DeviceConfig::new(0, 0);
    const SIZE: SurfaceSize = SurfaceSize { width: 2, height: 2 };

    #[test]
    fn creates_accelerated_surfaces() {
        let platform = MemoryPlatform::new();
        let surface = platform
            .create_accelerated(CFG, SIZE, FormatTag::IntArgb)
            .unwrap();
        assert!(surface.is_accelerated());
        assert_eq!(surface.config(), CFG);
        assert_eq!(platform.created_count(), 1);
        assert_eq!(platform.live_surfaces().len(), 1);

        drop(surface);
        assert!(platform.live_surfaces().is_empty());
    }

    #[test]
    fn unsupported_configs_are_rejected() {
        let platform = MemoryPlatform::with_configs(&[CFG]);
        let other = DeviceConfig::new(1, 0);
        assert_eq!(
            platform.create_accelerated(other, SIZE, FormatTag::IntArgb).err(),
            Some(CreateError::Unsupported)
        );
        assert_eq!(
            platform
                .create_accelerated(DeviceConfig::SYSTEM, SIZE, FormatTag::IntArgb)
                .err(),
            Some(CreateError::Unsupported)
        );
        assert!(platform.create_accelerated(CFG, SIZE, FormatTag::IntArgb).is_ok());
    }

    #[test]
    fn allocation_faults() {
        let platform = MemoryPlatform::new();
        platform.fail_next_allocations(2);
        for _ in 0..2 {
            assert_eq!(
                platform.create_accelerated(CFG, SIZE, FormatTag::IntArgb).err(),
                Some(CreateError::AllocationFailed)
            );
        }
        assert!(platform.create_accelerated(CFG, SIZE, FormatTag::IntArgb).is_ok());

        platform.set_driver_rejecting(true);
        assert!(matches!(
            platform.create_accelerated(CFG, SIZE, FormatTag::IntArgb),
            Err(CreateError::DriverRejected(_))
        ));
    }

    #[test]
    fn lose_restore_cycle() {
        let platform = MemoryPlatform::new();
        let surface = platform
            .create_accelerated(CFG, SIZE, FormatTag::IntArgb)
            .unwrap();
        let vram = platform.live_surfaces().pop().unwrap();

        platform.lose_all();
        assert!(surface.is_lost());
        assert!(vram.is_released());
        assert_eq!(vram.store(&[1, 2, 3, 4]), Err(BlitError::Released));

        platform.set_restore_failing(true);
        assert!(surface.restore().is_err());

        platform.set_restore_failing(false);
        surface.restore().unwrap();
        assert!(!vram.is_released());
        // restoring does not clear the lost flag, the owner does that
        assert!(surface.is_lost());
    }

    #[test]
    fn copy_faults_are_per_config() {
        let platform = MemoryPlatform::new();
        let other = DeviceConfig::new(0, 1);
        let a = platform.create_destination(CFG, SIZE);
        let b = platform.create_destination(other, SIZE);

        platform.set_copy_failing(CFG, true);
        assert!(matches!(a.store(&[0; 4]), Err(BlitError::Driver(_))));
        assert!(b.store(&[0; 4]).is_ok());
        assert_eq!(b.write_count(), 1);

        platform.set_copy_failing(CFG, false);
        assert!(a.store(&[0; 4]).is_ok());
    }

    #[test]
    fn default_policy() {
        let platform = MemoryPlatform::new();
        let dst = platform.create_destination(CFG, SIZE);
        let policy = DefaultPolicy::new();

        assert!(policy.is_dest_accelerated(dst.as_ref()));
        assert!(policy.is_operation_supported(dst.as_ref(), CompositeRule::SrcOver, None, false));
        assert!(!policy.is_operation_supported(dst.as_ref(), CompositeRule::SrcOverAlpha(10), None, false));
        assert!(!policy.is_operation_supported(dst.as_ref(), CompositeRule::Src, Some(Color::WHITE), true));
        assert_eq!(policy.transparent_pixel_color(FormatTag::IntArgbBm), None);

        let policy = DefaultPolicy::with_transparent_pixel_color(Color::BLACK);
        assert_eq!(policy.transparent_pixel_color(FormatTag::IntArgbBm), Some(Color::BLACK));
        assert_eq!(policy.transparent_pixel_color(FormatTag::IntArgb), None);
    }
}
