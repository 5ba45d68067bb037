//! Caching surface manager.
//!
//! The image's pixels live in a [`SoftwareSurface`] over the image raster, which is always
//! authoritative. Once an image has been copied more than `threshold` times onto accelerated
//! destinations, a copy is created in accelerated memory for the destination's configuration and
//! handed out as the source of subsequent copies. The cached copies are kept coherent through the
//! raster's change notifications: a change marks the software surface as needing backup, and the
//! next validation copies it out again.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use hashbrown::HashMap;

use crate::blit::{Color, CompositeRule};
use crate::context::SurfaceContext;
use crate::device::{DeviceConfig, DisplayChangedListener};
use crate::event::{DisableReason, SurfaceEvent};
use crate::image::{Image, ImageId};
use crate::manager::strategy::{CacheStrategy, DirectCopy};
use crate::manager::{CacheCounters, CacheStats, ImageCapabilities, SurfaceManager};
use crate::raster::{Raster, RasterListener};
use crate::surface::{same_surface, FormatTag, SoftwareSurface, Surface, SurfaceHandle, SurfaceSize};

struct CacheState {
    /// One accelerated surface per configuration.
    surfaces: HashMap<DeviceConfig, SurfaceHandle>,
    /// The most recently validated accelerated surface. Never keeps a flushed surface alive.
    active: Option<Weak<dyn Surface>>,
}

impl CacheState {
    fn active(&self) -> Option<SurfaceHandle> {
        self.active.as_ref().and_then(Weak::upgrade)
    }
}

pub struct CachingSurfaceManager {
    image: ImageId,
    size: SurfaceSize,
    format: FormatTag,
    ctx: SurfaceContext,
    raster: Arc<Raster>,
    primary: SurfaceHandle,
    strategy: Box<dyn CacheStrategy>,
    local_enabled: AtomicBool,
    raster_registered: AtomicBool,
    display_registered: AtomicBool,
    cache: Mutex<CacheState>,
    counters: CacheCounters,
    me: Weak<CachingSurfaceManager>,
}

impl std::fmt::Debug for CachingSurfaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingSurfaceManager")
            .field("image", &self.image)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("local_enabled", &self.is_local_acceleration_enabled())
            .field("cached", &self.cached_configs())
            .finish_non_exhaustive()
    }
}

impl CachingSurfaceManager {
    /// Creates the manager for a buffered image. The authoritative surface wraps the image's
    /// raster, and the manager registers for its change notifications.
    pub fn new(image: &Image, ctx: SurfaceContext) -> Arc<Self> {
        let primary: SurfaceHandle =
            Arc::new(SoftwareSurface::new(image.raster().clone(), image.format()));
        Self::assemble(image, ctx, primary, Box::new(DirectCopy), None)
    }

    /// Builds a manager around `primary` and hooks it up to the raster and display
    /// notifications. `seed` is an accelerated surface that is already cached and active.
    pub(crate) fn assemble(
        image: &Image,
        ctx: SurfaceContext,
        primary: SurfaceHandle,
        strategy: Box<dyn CacheStrategy>,
        seed: Option<(DeviceConfig, SurfaceHandle)>,
    ) -> Arc<Self> {
        let accelerate = ctx.config().acceleration_enabled && image.acceleration_priority() > 0.0;

        let mut surfaces = HashMap::with_capacity(2);
        let mut active = None;
        if let Some((config, surface)) = seed {
            active = Some(Arc::downgrade(&surface));
            surfaces.insert(config, surface);
        }

        let manager = Arc::new_cyclic(|me| Self {
            image: image.id(),
            size: image.size(),
            format: image.format(),
            ctx,
            raster: image.raster().clone(),
            primary,
            strategy,
            local_enabled: AtomicBool::new(accelerate),
            raster_registered: AtomicBool::new(false),
            display_registered: AtomicBool::new(false),
            cache: Mutex::new(CacheState { surfaces, active }),
            counters: CacheCounters::default(),
            me: me.clone(),
        });

        if accelerate {
            manager.register_raster_listener();
            manager.register_display_listener();
        }

        log::trace!(
            "Surface manager for image {} created, acceleration {}",
            manager.image,
            if manager.is_local_acceleration_enabled() { "enabled" } else { "disabled" }
        );
        manager
    }

    pub fn image_id(&self) -> ImageId {
        self.image
    }

    pub fn context(&self) -> &SurfaceContext {
        &self.ctx
    }

    /// The authoritative surface.
    pub fn primary(&self) -> SurfaceHandle {
        self.primary.clone()
    }

    pub fn is_local_acceleration_enabled(&self) -> bool {
        self.local_enabled.load(Ordering::Acquire)
    }

    /// The accelerated surface cached for `config`, if any.
    pub fn accelerated_surface(&self, config: DeviceConfig) -> Option<SurfaceHandle> {
        self.lock().surfaces.get(&config).cloned()
    }

    /// The most recently validated accelerated surface, if it is still cached.
    pub fn active_surface(&self) -> Option<SurfaceHandle> {
        self.lock().active()
    }

    pub fn cached_configs(&self) -> Vec<DeviceConfig> {
        self.lock().surfaces.keys().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// True when `dst` is the accelerated surface copies are currently served from. Copying it
    /// onto itself through the cache would be pointless.
    pub(crate) fn is_active(&self, dst: &dyn Surface) -> bool {
        self.lock()
            .active()
            .is_some_and(|active| same_surface(active.as_ref(), dst))
    }

    /// Validates the accelerated surface for `config` and returns it when it can be used as a
    /// copy source.
    pub(crate) fn validate_for(&self, config: DeviceConfig) -> Option<SurfaceHandle> {
        if !self.is_local_acceleration_enabled() {
            return None;
        }

        let mut state = self.lock();
        // a disable may have flushed while we waited for the lock
        if !self.is_local_acceleration_enabled() {
            return None;
        }
        let mut restored = false;

        let surface = match state.surfaces.get(&config).cloned() {
            None => match self
                .ctx
                .factory()
                .create_accelerated(config, self.size, self.format)
            {
                Ok(surface) => {
                    log::debug!("Accelerated surface for image {} created on {}", self.image, config);
                    CacheCounters::bump(&self.counters.created, 1);
                    self.publish(SurfaceEvent::Promoted { image: self.image, config });
                    state.surfaces.insert(config, surface.clone());
                    restored = true;
                    surface
                }
                Err(e) => {
                    log::debug!(
                        "Cannot create accelerated surface for image {} on {}: {}",
                        self.image,
                        config,
                        e
                    );
                    CacheCounters::bump(&self.counters.create_failures, 1);
                    self.publish(SurfaceEvent::CreateFailed {
                        image: self.image,
                        config,
                        reason: e,
                    });
                    state.active = None;
                    return None;
                }
            },
            Some(surface) if surface.is_lost() => match surface.restore() {
                Ok(()) => {
                    surface.set_lost(false);
                    restored = true;
                    surface
                }
                Err(e) => {
                    log::warn!(
                        "Restoring accelerated surface for image {} on {} failed: {}",
                        self.image,
                        config,
                        e
                    );
                    CacheCounters::bump(&self.counters.restore_failures, 1);
                    self.publish(SurfaceEvent::RestoreFailed { image: self.image, config });
                    self.flush_locked(&mut state);
                    return None;
                }
            },
            Some(surface) => surface,
        };

        state.active = Some(Arc::downgrade(&surface));

        if self.primary.needs_backup() || restored {
            self.refresh_locked(&state);
        }

        if surface.is_lost() {
            None
        } else {
            Some(surface)
        }
    }

    /// Copies the authoritative contents into the cached surfaces.
    fn refresh_locked(&self, state: &CacheState) {
        // Cleared before copying so that changes arriving during the pass are not lost.
        self.primary.set_needs_backup(false);

        let bg = self.ctx.policy().transparent_pixel_color(self.format);
        let outcome = self
            .strategy
            .refresh(&self.ctx, self.primary.as_ref(), &state.surfaces, bg);

        CacheCounters::bump(&self.counters.refresh_passes, 1);
        if !outcome.is_complete() {
            // the lost entries still miss the current contents
            self.primary.set_needs_backup(true);
            CacheCounters::bump(&self.counters.copy_failures, outcome.lost.len() as u64);
            for config in &outcome.lost {
                self.publish(SurfaceEvent::EntryLost { image: self.image, config: *config });
            }
        }

        log::trace!(
            "Image {} refreshed, {} updated, {} lost",
            self.image,
            outcome.updated,
            outcome.lost.len()
        );
        self.publish(SurfaceEvent::Refreshed {
            image: self.image,
            updated: outcome.updated,
            failed: outcome.lost.len(),
        });
    }

    /// Drops every cached surface except the retained one, calling `release` on each.
    fn evict_locked(&self, state: &mut CacheState, release: impl Fn(&dyn Surface)) {
        state.active = None;
        let evicted = std::mem::replace(&mut state.surfaces, HashMap::with_capacity(2));

        if let Some(kept) = self.strategy.retained(&self.primary) {
            state.surfaces.insert(kept.config(), kept);
        }
        for surface in evicted.values() {
            if !same_surface(surface.as_ref(), self.primary.as_ref()) {
                release(surface.as_ref());
            }
        }
    }

    fn flush_locked(&self, state: &mut CacheState) {
        self.evict_locked(state, |s| s.flush());
        CacheCounters::bump(&self.counters.flushes, 1);
        self.publish(SurfaceEvent::Flushed { image: self.image });
    }

    fn disable(&self, reason: DisableReason) {
        let was_enabled = self.local_enabled.swap(false, Ordering::AcqRel);
        self.flush();
        if was_enabled {
            log::debug!("Acceleration disabled for image {}: {:?}", self.image, reason);
            self.publish(SurfaceEvent::AccelerationDisabled { image: self.image, reason });
        }
    }

    fn register_raster_listener(&self) {
        if self.raster_registered.swap(true, Ordering::AcqRel) {
            return;
        }
        // a raster that is already stolen calls back into raster_stolen right away
        let listener: Weak<dyn RasterListener> = self.me.clone() as Weak<dyn RasterListener>;
        self.raster.set_listener(listener);
    }

    fn register_display_listener(&self) {
        if !self.ctx.config().acceleration_enabled || !self.is_local_acceleration_enabled() {
            return;
        }
        if self.display_registered.swap(true, Ordering::AcqRel) {
            return;
        }
        let listener: Weak<dyn DisplayChangedListener> = self.me.clone() as Weak<dyn DisplayChangedListener>;
        self.ctx.display().add_listener(listener);
    }

    fn publish(&self, ev: SurfaceEvent) {
        self.ctx.events().publish(ev);
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RasterListener for CachingSurfaceManager {
    fn raster_changed(&self) {
        self.primary.set_needs_backup(true);
    }

    fn raster_stolen(&self) {
        if self.ctx.config().allow_raster_steal {
            return;
        }
        self.disable(DisableReason::RasterStolen);
    }
}

impl DisplayChangedListener for CachingSurfaceManager {
    fn display_changed(&self) {
        if !self.ctx.config().acceleration_enabled {
            return;
        }
        self.invalidate_accelerated_surfaces();
    }

    fn palette_changed(&self) {
        self.primary.set_needs_backup(true);
    }
}

impl SurfaceManager for CachingSurfaceManager {
    fn source_surface(
        &self,
        dst: &dyn Surface,
        rule: CompositeRule,
        bg: Option<Color>,
        scale: bool,
    ) -> SurfaceHandle {
        // each check is cheaper than the next; the copy count only moves for eligible copies
        if self.is_local_acceleration_enabled()
            && !self.is_active(dst)
            && self.ctx.policy().is_dest_accelerated(dst)
            && self.ctx.policy().is_operation_supported(dst, rule, bg, scale)
            && self.primary.increase_copy_count() > u64::from(self.ctx.config().threshold)
        {
            if let Some(accelerated) = self.validate_for(dst.config()) {
                return accelerated;
            }
        }
        self.primary.clone()
    }

    fn destination_surface(&self) -> SurfaceHandle {
        self.primary.clone()
    }

    fn restore_contents(&self) -> SurfaceHandle {
        self.primary.clone()
    }

    fn capabilities(&self, config: Option<DeviceConfig>) -> ImageCapabilities {
        let config = config.unwrap_or_else(|| self.ctx.default_config());
        let accelerated = self.is_local_acceleration_enabled()
            && self
                .lock()
                .surfaces
                .get(&config)
                .is_some_and(|s| s.is_accelerated() && !s.is_lost());
        ImageCapabilities { accelerated, config }
    }

    fn validate(&self, config: DeviceConfig) {
        let _ = self.validate_for(config);
    }

    fn flush(&self) {
        let mut state = self.lock();
        self.flush_locked(&mut state);
    }

    fn invalidate_accelerated_surfaces(&self) {
        let mut state = self.lock();
        self.evict_locked(&mut state, |s| s.invalidate());
        CacheCounters::bump(&self.counters.invalidations, 1);
        self.publish(SurfaceEvent::Invalidated { image: self.image });
    }

    fn set_acceleration_priority(&self, priority: f32) {
        if priority == 0.0 {
            self.disable(DisableReason::ZeroPriority);
        }
    }

    fn set_local_acceleration_enabled(&self, enabled: bool) {
        if !enabled {
            self.disable(DisableReason::Explicit);
            return;
        }
        if !self.ctx.config().acceleration_enabled {
            log::debug!(
                "Acceleration for image {} stays off, disabled for the process",
                self.image
            );
            return;
        }
        if !self.local_enabled.swap(true, Ordering::AcqRel) {
            log::debug!("Acceleration enabled for image {}", self.image);
            self.publish(SurfaceEvent::AccelerationEnabled { image: self.image });
        }
        self.register_raster_listener();
        self.register_display_listener();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::blit::MemoryBlitter;
    use crate::config::AccelConfig;
    use crate::event::Subscription;
    use crate::platform::{DefaultPolicy, MemoryPlatform, VramSurface};

    const SCREEN: DeviceConfig = DeviceConfig::new(0, 0);
    const SECOND: DeviceConfig = DeviceConfig::new(1, 0);
    const THIRD: DeviceConfig = DeviceConfig::new(2, 0);

    struct Fixture {
        platform: MemoryPlatform,
        ctx: SurfaceContext,
        image: Image,
    }

    impl Fixture {
        fn new(config: AccelConfig) -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let platform = MemoryPlatform::new();
            let ctx = SurfaceContext::builder(Arc::new(platform.clone()))
                .config(config)
                .build();
            let image = Image::new(4, 4, FormatTag::IntArgb);
            image.raster().fill(0xff00_ff00);
            Self { platform, ctx, image }
        }

        fn with_threshold(threshold: u32) -> Self {
            Self::new(AccelConfig::builder().threshold(threshold).build().unwrap())
        }

        fn manager(&self) -> Arc<CachingSurfaceManager> {
            CachingSurfaceManager::new(&self.image, self.ctx.clone())
        }

        fn screen(&self, config: DeviceConfig) -> Arc<VramSurface> {
            self.platform
                .create_destination(config, SurfaceSize::new(32, 32))
        }
    }

    fn copy(manager: &CachingSurfaceManager, dst: &dyn Surface) -> SurfaceHandle {
        manager.source_surface(dst, CompositeRule::SrcOver, None, false)
    }

    fn contents(surface: &SurfaceHandle) -> Vec<u32> {
        surface
            .pixels()
            .and_then(|p| p.load().ok())
            .unwrap_or_default()
    }

    fn drain(rx: &mut Subscription) -> Vec<SurfaceEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn promotes_after_threshold() {
        let fx = Fixture::with_threshold(1);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        let first = copy(&manager, screen.as_ref());
        assert!(same_surface(first.as_ref(), manager.primary().as_ref()));
        assert!(manager.accelerated_surface(SCREEN).is_none());

        let second = copy(&manager, screen.as_ref());
        assert!(second.is_accelerated());
        assert_eq!(second.config(), SCREEN);
        assert_eq!(contents(&second), fx.image.raster().snapshot());
        assert_eq!(manager.stats().created, 1);

        // later copies reuse the cached surface without copying again
        let third = copy(&manager, screen.as_ref());
        assert!(same_surface(third.as_ref(), second.as_ref()));
        assert_eq!(manager.stats().refresh_passes, 1);
    }

    #[test]
    fn threshold_gates_promotion() {
        let fx = Fixture::with_threshold(3);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        for _ in 0..3 {
            assert!(!copy(&manager, screen.as_ref()).is_accelerated());
        }
        assert!(copy(&manager, screen.as_ref()).is_accelerated());
        assert_eq!(manager.primary().state().copy_count(), 4);
    }

    #[test]
    fn ineligible_copies_do_not_count() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);
        let software = SoftwareSurface::with_size(SurfaceSize::new(8, 8), FormatTag::IntRgb);

        let src = copy(&manager, &software);
        assert!(!src.is_accelerated());

        let src = manager.source_surface(screen.as_ref(), CompositeRule::SrcOverAlpha(0x40), None, false);
        assert!(!src.is_accelerated());
        assert_eq!(manager.primary().state().copy_count(), 0);

        assert!(copy(&manager, screen.as_ref()).is_accelerated());
    }

    #[test]
    fn never_copies_the_active_surface_onto_itself() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        let accelerated = copy(&manager, screen.as_ref());
        assert!(accelerated.is_accelerated());

        let src = copy(&manager, accelerated.as_ref());
        assert!(same_surface(src.as_ref(), manager.primary().as_ref()));
    }

    #[test]
    fn raster_changes_reach_the_cache() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        let accelerated = copy(&manager, screen.as_ref());
        fx.image.raster().set_pixel(1, 1, 0xffff_0000).unwrap();
        assert!(manager.primary().needs_backup());

        let again = copy(&manager, screen.as_ref());
        assert!(same_surface(again.as_ref(), accelerated.as_ref()));
        assert_eq!(contents(&again), fx.image.raster().snapshot());
        assert!(!manager.primary().needs_backup());
    }

    #[test]
    fn allocation_failure_falls_back_and_retries() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);
        let mut rx = fx.ctx.events().subscribe();

        fx.platform.fail_next_allocations(1);
        let src = copy(&manager, screen.as_ref());
        assert!(!src.is_accelerated());
        assert_eq!(manager.stats().create_failures, 1);
        assert!(drain(&mut rx).iter().any(|ev| matches!(ev, SurfaceEvent::CreateFailed { .. })));

        assert!(copy(&manager, screen.as_ref()).is_accelerated());
    }

    #[test]
    fn lost_surface_is_restored_and_refilled() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        let accelerated = copy(&manager, screen.as_ref());
        fx.platform.lose_all();
        assert!(accelerated.is_lost());

        let again = copy(&manager, screen.as_ref());
        assert!(same_surface(again.as_ref(), accelerated.as_ref()));
        assert!(!again.is_lost());
        assert_eq!(contents(&again), fx.image.raster().snapshot());
    }

    #[test]
    fn restore_failure_flushes_everything() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);
        let second = fx.screen(SECOND);
        let mut rx = fx.ctx.events().subscribe();

        copy(&manager, screen.as_ref());
        copy(&manager, second.as_ref());
        assert_eq!(manager.cached_configs().len(), 2);

        fx.platform.lose_all();
        fx.platform.set_restore_failing(true);
        let src = copy(&manager, screen.as_ref());
        assert!(!src.is_accelerated());
        assert!(manager.cached_configs().is_empty());
        assert!(manager.active_surface().is_none());
        assert_eq!(manager.stats().restore_failures, 1);

        let events = drain(&mut rx);
        assert!(events.contains(&SurfaceEvent::RestoreFailed { image: manager.image_id(), config: SCREEN }));
        assert!(events.contains(&SurfaceEvent::Flushed { image: manager.image_id() }));

        // the cache is rebuilt once the platform recovers
        fx.platform.set_restore_failing(false);
        assert!(copy(&manager, screen.as_ref()).is_accelerated());
    }

    #[test]
    fn one_failing_entry_does_not_poison_the_others() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screens = [fx.screen(SCREEN), fx.screen(SECOND), fx.screen(THIRD)];
        for screen in &screens {
            assert!(copy(&manager, screen.as_ref()).is_accelerated());
        }

        fx.platform.set_copy_failing(SECOND, true);
        fx.image.raster().fill(0xff12_3456);
        let mut rx = fx.ctx.events().subscribe();

        let src = copy(&manager, screens[0].as_ref());
        assert!(src.is_accelerated());
        assert_eq!(contents(&src), fx.image.raster().snapshot());

        let third = manager.accelerated_surface(THIRD).unwrap();
        assert!(!third.is_lost());
        assert_eq!(contents(&third), fx.image.raster().snapshot());

        assert!(manager.accelerated_surface(SECOND).unwrap().is_lost());
        assert!(manager.primary().needs_backup());
        assert!(drain(&mut rx).contains(&SurfaceEvent::EntryLost { image: manager.image_id(), config: SECOND }));

        // once copies work again the lost entry is restored on its own validate
        fx.platform.set_copy_failing(SECOND, false);
        let src = copy(&manager, screens[1].as_ref());
        assert!(src.is_accelerated());
        assert_eq!(contents(&src), fx.image.raster().snapshot());
        assert!(!manager.primary().needs_backup());
    }

    #[test]
    fn failed_first_copy_falls_back() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        fx.platform.set_copy_failing(SCREEN, true);
        let src = copy(&manager, screen.as_ref());
        assert!(same_surface(src.as_ref(), manager.primary().as_ref()));
        assert_eq!(manager.stats().copy_failures, 1);
        assert!(!manager.capabilities(Some(SCREEN)).is_accelerated());
    }

    #[test]
    fn flush_is_idempotent() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        copy(&manager, screen.as_ref());
        let vram = fx.platform.live_surfaces();
        assert_eq!(vram.len(), 1);

        manager.flush();
        manager.flush();
        assert!(manager.cached_configs().is_empty());
        assert!(manager.active_surface().is_none());
        assert!(vram[0].is_released());
        assert_eq!(manager.stats().flushes, 2);

        // flushing does not disable anything
        assert!(copy(&manager, screen.as_ref()).is_accelerated());
    }

    #[test]
    fn stolen_raster_disables_acceleration() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);
        copy(&manager, screen.as_ref());
        let mut rx = fx.ctx.events().subscribe();

        let _buffer = fx.image.raster().data_buffer();
        assert!(!manager.is_local_acceleration_enabled());
        assert!(manager.cached_configs().is_empty());
        assert!(!copy(&manager, screen.as_ref()).is_accelerated());
        assert!(drain(&mut rx).contains(&SurfaceEvent::AccelerationDisabled {
            image: manager.image_id(),
            reason: DisableReason::RasterStolen,
        }));

        manager.set_local_acceleration_enabled(true);
        assert!(copy(&manager, screen.as_ref()).is_accelerated());
    }

    #[test]
    fn stolen_raster_is_tolerated_when_allowed() {
        let fx = Fixture::new(
            AccelConfig::builder()
                .threshold(0)
                .allow_raster_steal(true)
                .build()
                .unwrap(),
        );
        let manager = fx.manager();
        let _buffer = fx.image.raster().data_buffer();
        assert!(manager.is_local_acceleration_enabled());
    }

    #[test]
    fn already_stolen_raster_starts_disabled() {
        let fx = Fixture::with_threshold(0);
        let _buffer = fx.image.raster().data_buffer();
        let manager = fx.manager();
        assert!(!manager.is_local_acceleration_enabled());
    }

    #[test]
    fn global_switch_and_priority() {
        let fx = Fixture::new(AccelConfig::builder().acceleration_enabled(false).build().unwrap());
        let manager = fx.manager();
        assert!(!manager.is_local_acceleration_enabled());
        assert!(fx.ctx.display().is_empty());

        let fx = Fixture::with_threshold(0);
        fx.image.set_acceleration_priority(0.0);
        assert!(!fx.manager().is_local_acceleration_enabled());

        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);
        copy(&manager, screen.as_ref());
        manager.set_acceleration_priority(0.5);
        assert!(manager.is_local_acceleration_enabled());
        manager.set_acceleration_priority(0.0);
        assert!(!manager.is_local_acceleration_enabled());
        assert!(manager.cached_configs().is_empty());
    }

    #[test]
    fn late_enable_tracks_raster_changes() {
        let fx = Fixture::with_threshold(0);
        fx.image.set_acceleration_priority(0.0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);
        assert!(!manager.is_local_acceleration_enabled());

        fx.image.set_acceleration_priority(1.0);
        manager.set_local_acceleration_enabled(true);
        assert_eq!(fx.ctx.display().len(), 1);
        assert!(copy(&manager, screen.as_ref()).is_accelerated());

        fx.image.raster().fill(0xff12_3456);
        assert!(manager.primary().needs_backup());
        let src = copy(&manager, screen.as_ref());
        assert!(src.is_accelerated());
        assert_eq!(contents(&src), vec![0xff12_3456; 16]);
    }

    #[test]
    fn enabling_respects_the_global_switch() {
        let fx = Fixture::new(
            AccelConfig::builder()
                .acceleration_enabled(false)
                .threshold(0)
                .build()
                .unwrap(),
        );
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        manager.set_local_acceleration_enabled(true);
        assert!(!manager.is_local_acceleration_enabled());
        assert!(!copy(&manager, screen.as_ref()).is_accelerated());
        assert!(!manager.capabilities(Some(SCREEN)).is_accelerated());
        assert_eq!(fx.platform.created_count(), 0);
    }

    #[test]
    fn validation_waiting_on_a_disable_creates_nothing() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();

        let guard = manager.lock();
        let waiting = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.validate_for(SCREEN).is_some())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        manager.local_enabled.store(false, Ordering::Release);
        drop(guard);

        assert!(!waiting.join().unwrap());
        assert!(manager.cached_configs().is_empty());
        assert_eq!(fx.platform.created_count(), 0);
    }

    #[test]
    fn restore_contents_is_the_system_memory_surface() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);
        let accelerated = copy(&manager, screen.as_ref());

        fx.platform.lose_all();
        let source = manager.restore_contents();
        assert!(!source.is_accelerated());
        assert!(same_surface(source.as_ref(), manager.primary().as_ref()));
        assert!(!same_surface(source.as_ref(), accelerated.as_ref()));
        assert_eq!(contents(&source), fx.image.raster().snapshot());
    }

    #[test]
    fn display_change_invalidates_without_releasing() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);
        assert_eq!(fx.ctx.display().len(), 1);

        let accelerated = copy(&manager, screen.as_ref());
        fx.ctx.display().display_changed();

        assert!(accelerated.is_lost());
        assert!(manager.cached_configs().is_empty());
        assert!(manager.active_surface().is_none());
        assert_eq!(manager.stats().invalidations, 1);
        assert!(fx.platform.live_surfaces().iter().all(|s| !s.is_released()));

        // recreated lazily
        let fresh = copy(&manager, screen.as_ref());
        assert!(fresh.is_accelerated());
        assert!(!same_surface(fresh.as_ref(), accelerated.as_ref()));
    }

    #[test]
    fn palette_change_forces_a_copy() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        copy(&manager, screen.as_ref());
        let passes = manager.stats().refresh_passes;
        fx.ctx.display().palette_changed();
        assert!(manager.primary().needs_backup());

        copy(&manager, screen.as_ref());
        assert_eq!(manager.stats().refresh_passes, passes + 1);
    }

    #[test]
    fn dropped_manager_leaves_the_display_notifier() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        assert_eq!(fx.ctx.display().len(), 1);
        drop(manager);
        assert!(fx.ctx.display().is_empty());
        fx.ctx.display().display_changed();
    }

    #[test]
    fn capabilities_follow_the_cache() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        assert!(!manager.capabilities(None).is_accelerated());
        copy(&manager, screen.as_ref());
        let caps = manager.capabilities(None);
        assert!(caps.is_accelerated());
        assert_eq!(caps.config, SCREEN);
        assert!(!manager.capabilities(Some(SECOND)).is_accelerated());

        manager.invalidate_accelerated_surfaces();
        assert!(!manager.capabilities(None).is_accelerated());
    }

    #[test]
    fn bitmask_images_get_a_background() {
        let platform = MemoryPlatform::new();
        let ctx = SurfaceContext::builder(Arc::new(platform.clone()))
            .config(AccelConfig::builder().threshold(0).build().unwrap())
            .policy(Arc::new(DefaultPolicy::with_transparent_pixel_color(Color::BLACK)))
            .blitter(Arc::new(MemoryBlitter::new()))
            .build();
        let image = Image::new(2, 1, FormatTag::IntArgbBm);
        image.raster().set_pixel(0, 0, 0xffff_ffff).unwrap();
        let manager = CachingSurfaceManager::new(&image, ctx);
        let screen = platform.create_destination(SCREEN, SurfaceSize::new(8, 8));

        let src = copy(&manager, screen.as_ref());
        assert_eq!(contents(&src), vec![0xffff_ffff, Color::BLACK.argb()]);
    }

    #[test]
    fn random_faults_never_yield_an_unusable_source() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let fx = Fixture::with_threshold(1);
        let manager = fx.manager();
        let screens = [fx.screen(SCREEN), fx.screen(SECOND)];

        for _ in 0..500 {
            match rng.random_range(0..8) {
                0 => fx.platform.lose_all(),
                1 => fx.platform.fail_next_allocations(rng.random_range(0..3)),
                2 => fx.platform.set_restore_failing(rng.random_bool(0.3)),
                3 => fx.platform.set_copy_failing(SECOND, rng.random_bool(0.3)),
                4 => fx.image.raster().fill(rng.random()),
                5 => manager.flush(),
                6 => fx.ctx.display().display_changed(),
                _ => {}
            }

            let screen = &screens[rng.random_range(0..screens.len())];
            let src = copy(&manager, screen.as_ref());
            assert!(!src.is_lost());
            if src.is_accelerated() {
                assert_eq!(contents(&src), fx.image.raster().snapshot());
            } else {
                assert!(same_surface(src.as_ref(), manager.primary().as_ref()));
            }
        }
    }

    #[test]
    fn concurrent_copies_and_flushes() {
        let fx = Fixture::with_threshold(0);
        let manager = fx.manager();
        let screen = fx.screen(SCREEN);

        std::thread::scope(|s| {
            for _ in 0..4 {
                let manager = manager.clone();
                let screen = screen.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        let src = copy(&manager, screen.as_ref());
                        if !src.is_accelerated() {
                            assert!(same_surface(src.as_ref(), manager.primary().as_ref()));
                        }
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..50 {
                    manager.flush();
                    manager.invalidate_accelerated_surfaces();
                }
            });
        });

        assert!(copy(&manager, screen.as_ref()).is_accelerated());
    }
}
