//! Image to manager association.
//!
//! The [`ImageRegistry`] hands out the manager of an image, creating it on first use through a
//! [`ManagerFactory`]. Images are held weakly; [`ImageRegistry::purge`] drops the managers of
//! images that no longer exist.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use hashbrown::HashMap;

use crate::context::SurfaceContext;
use crate::errors::SurfaceError;
use crate::image::{Image, ImageId, ImageKind};
use crate::manager::{CachingSurfaceManager, SurfaceManager};

/// Creates the manager for an image that does not have one yet.
pub trait ManagerFactory: Send + Sync {
    fn create_manager(
        &self,
        image: &Image,
        ctx: &SurfaceContext,
    ) -> Result<Arc<dyn SurfaceManager>, SurfaceError>;
}

/// Default factory: buffered images get a [`CachingSurfaceManager`]. Other kinds of images must
/// have their manager installed with [`ImageRegistry::set_manager`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CachingManagerFactory;

impl ManagerFactory for CachingManagerFactory {
    fn create_manager(
        &self,
        image: &Image,
        ctx: &SurfaceContext,
    ) -> Result<Arc<dyn SurfaceManager>, SurfaceError> {
        match image.kind() {
            ImageKind::Buffered => Ok(CachingSurfaceManager::new(image, ctx.clone())),
            kind => Err(SurfaceError::InvalidImageVariant(kind)),
        }
    }
}

struct Entry {
    image: Weak<Image>,
    manager: Arc<dyn SurfaceManager>,
}

pub struct ImageRegistry {
    ctx: SurfaceContext,
    factory: Box<dyn ManagerFactory>,
    entries: Mutex<HashMap<ImageId, Entry>>,
}

impl std::fmt::Debug for ImageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRegistry")
            .field("ctx", &self.ctx)
            .field("entries", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl ImageRegistry {
    pub fn new(ctx: SurfaceContext) -> Self {
        Self::with_factory(ctx, Box::new(CachingManagerFactory))
    }

    pub fn with_factory(ctx: SurfaceContext, factory: Box<dyn ManagerFactory>) -> Self {
        Self {
            ctx,
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &SurfaceContext {
        &self.ctx
    }

    /// Returns the manager of `image`, creating it on first use.
    pub fn get_manager(&self, image: &Arc<Image>) -> Result<Arc<dyn SurfaceManager>, SurfaceError> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(&image.id()) {
            return Ok(entry.manager.clone());
        }

        let manager = self.factory.create_manager(image, &self.ctx)?;
        log::trace!("Manager created for image {}", image.id());
        entries.insert(
            image.id(),
            Entry {
                image: Arc::downgrade(image),
                manager: manager.clone(),
            },
        );
        Ok(manager)
    }

    /// The manager of the image with `id`, without creating one.
    pub fn manager(&self, id: ImageId) -> Option<Arc<dyn SurfaceManager>> {
        self.lock().get(&id).map(|e| e.manager.clone())
    }

    /// Installs `manager` for `image`. An image keeps its manager until it is disposed.
    pub fn set_manager(
        &self,
        image: &Arc<Image>,
        manager: Arc<dyn SurfaceManager>,
    ) -> Result<(), SurfaceError> {
        let mut entries = self.lock();
        if entries.contains_key(&image.id()) {
            return Err(SurfaceError::ManagerAlreadySet(image.id()));
        }
        entries.insert(
            image.id(),
            Entry {
                image: Arc::downgrade(image),
                manager,
            },
        );
        Ok(())
    }

    /// Stores the priority on the image and passes it on to its manager, if it has one.
    pub fn set_acceleration_priority(&self, image: &Image, priority: f32) {
        image.set_acceleration_priority(priority);
        if let Some(manager) = self.manager(image.id()) {
            manager.set_acceleration_priority(image.acceleration_priority());
        }
    }

    /// Clears the stolen flag of the image's raster and re-enables acceleration, unless the
    /// image's priority is zero.
    ///
    /// Only meant for images whose raster is under the caller's control; the buffer handed out
    /// earlier can still be written to without notifications.
    pub fn restore_local_acceleration(&self, image: &Arc<Image>) -> Result<(), SurfaceError> {
        // before the lookup, so that a manager created here sees a tracked raster
        image.raster().set_stolen(false);

        let manager = self.get_manager(image)?;
        if image.acceleration_priority() > 0.0 {
            manager.set_local_acceleration_enabled(true);
        }
        Ok(())
    }

    /// Flushes and drops the managers of images that no longer exist. Returns how many were
    /// dropped.
    pub fn purge(&self) -> usize {
        let dead: Vec<Entry> = {
            let mut entries = self.lock();
            let ids: Vec<ImageId> = entries
                .iter()
                .filter(|(_, e)| e.image.strong_count() == 0)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        for entry in &dead {
            entry.manager.flush();
        }
        if !dead.is_empty() {
            log::debug!("Purged {} manager(s) of dropped images", dead.len());
        }
        dead.len()
    }

    /// Flushes and drops the manager of the image with `id`.
    pub fn dispose(&self, id: ImageId) -> bool {
        let entry = self.lock().remove(&id);
        match entry {
            Some(entry) => {
                entry.manager.flush();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ImageId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
