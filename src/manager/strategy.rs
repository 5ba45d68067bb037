//! How a manager refreshes its accelerated copies.
//!
//! The caching and offscreen managers share all of their bookkeeping and only differ in how the
//! authoritative contents reach the cached surfaces, and in whether the primary surface survives a
//! flush. Both points are captured by [`CacheStrategy`].

use std::sync::{Arc, Mutex, PoisonError, Weak};

use hashbrown::HashMap;

use crate::blit::{copy_contents, Color};
use crate::context::SurfaceContext;
use crate::device::DeviceConfig;
use crate::errors::BlitError;
use crate::image::ImageId;
use crate::surface::{same_surface, FormatTag, SoftwareSurface, Surface, SurfaceHandle};

/// Result of one refresh pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Entries that received the current contents.
    pub updated: usize,
    /// Entries whose copy failed. They have been marked lost.
    pub lost: Vec<DeviceConfig>,
}

impl RefreshOutcome {
    pub fn is_complete(&self) -> bool {
        self.lost.is_empty()
    }

    fn record(&mut self, config: DeviceConfig, surface: &dyn Surface, res: Result<(), BlitError>) {
        match res {
            Ok(()) => self.updated += 1,
            Err(e) => {
                log::debug!("Refreshing surface on {} failed: {}", config, e);
                surface.set_lost(true);
                self.lost.push(config);
            }
        }
    }
}

pub trait CacheStrategy: Send + Sync {
    /// Copies `primary` into every cached entry that should receive it. `bg` replaces transparent
    /// pixels when set.
    fn refresh(
        &self,
        ctx: &SurfaceContext,
        primary: &dyn Surface,
        entries: &HashMap<DeviceConfig, SurfaceHandle>,
        bg: Option<Color>,
    ) -> RefreshOutcome;

    /// The entry that stays in the cache across flushes and invalidations, if any.
    fn retained(&self, primary: &SurfaceHandle) -> Option<SurfaceHandle>;
}

/// Copies straight from the system memory surface. Used by [`CachingSurfaceManager`](super::CachingSurfaceManager).
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectCopy;

impl CacheStrategy for DirectCopy {
    fn refresh(
        &self,
        ctx: &SurfaceContext,
        primary: &dyn Surface,
        entries: &HashMap<DeviceConfig, SurfaceHandle>,
        bg: Option<Color>,
    ) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        for (config, surface) in entries {
            // lost entries are restored on their own validate
            if same_surface(surface.as_ref(), primary) || surface.is_lost() {
                continue;
            }
            let res = copy_contents(ctx.blitter(), primary, surface.as_ref(), bg);
            outcome.record(*config, surface.as_ref(), res);
        }
        outcome
    }

    fn retained(&self, _primary: &SurfaceHandle) -> Option<SurfaceHandle> {
        None
    }
}

/// Copies through an intermediate system memory surface, for primaries that cannot be read by
/// other devices directly. Used by [`OffScreenSurfaceManager`](super::OffScreenSurfaceManager).
///
/// The intermediate surface belongs to the context's scratch pool and is only referenced weakly
/// here, so the pool may reclaim it between passes. It is private to the owning image: the owner's
/// cache lock is all that serializes the two hops of a pass.
#[derive(Debug)]
pub struct StagedCopy {
    owner: ImageId,
    intermediate: Mutex<Weak<dyn Surface>>,
}

impl StagedCopy {
    pub fn new(owner: ImageId) -> Self {
        let empty: Weak<dyn Surface> = Weak::<SoftwareSurface>::new();
        Self {
            owner,
            intermediate: Mutex::new(empty),
        }
    }

    fn intermediate(&self, ctx: &SurfaceContext, primary: &dyn Surface) -> SurfaceHandle {
        let mut slot = self
            .intermediate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(surface) = slot.upgrade() {
            return surface;
        }

        let format = match primary.format() {
            FormatTag::Custom(_) => FormatTag::IntArgb,
            format => format,
        };
        let surface = ctx.scratch().acquire_for(self.owner, primary.size(), format);
        *slot = Arc::downgrade(&surface);
        surface
    }

    /// True while the pool still holds the intermediate surface.
    pub fn has_intermediate(&self) -> bool {
        self.intermediate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
            > 0
    }
}

impl CacheStrategy for StagedCopy {
    fn refresh(
        &self,
        ctx: &SurfaceContext,
        primary: &dyn Surface,
        entries: &HashMap<DeviceConfig, SurfaceHandle>,
        bg: Option<Color>,
    ) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();
        let mut staged: Option<Result<SurfaceHandle, BlitError>> = None;

        for (config, surface) in entries {
            if same_surface(surface.as_ref(), primary) {
                continue;
            }

            // stage once per pass, on the first entry that needs it
            let stage = staged.get_or_insert_with(|| {
                let stage = self.intermediate(ctx, primary);
                copy_contents(ctx.blitter(), primary, stage.as_ref(), None).map(|()| stage)
            });
            let res = match stage {
                Ok(stage) => copy_contents(ctx.blitter(), stage.as_ref(), surface.as_ref(), bg),
                Err(e) => Err(e.clone()),
            };
            outcome.record(*config, surface.as_ref(), res);
        }
        outcome
    }

    fn retained(&self, primary: &SurfaceHandle) -> Option<SurfaceHandle> {
        primary.is_accelerated().then(|| primary.clone())
    }
}
