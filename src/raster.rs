//! Mutable pixel buffer backing an in-memory image.
//!
//! Writes that go through the [`Raster`] API notify the registered [`RasterListener`] that the
//! contents changed. Handing out the underlying buffer with [`Raster::data_buffer`] gives the
//! caller unmediated access; the raster is then "stolen" and the listener is told so, since
//! from that point on changes can no longer be tracked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use crate::errors::SurfaceError;
use crate::surface::SurfaceSize;

/// Shared pixel storage, 32-bit ARGB words in row-major order.
pub type PixelBuffer = Arc<RwLock<Vec<u32>>>;

/// Receives notifications about changes to a raster.
pub trait RasterListener: Send + Sync {
    /// Invoked when the raster's contents have changed through one of its modifier methods.
    fn raster_changed(&self);

    /// Invoked when the raster's buffer has been handed out for direct access.
    fn raster_stolen(&self);
}

pub struct Raster {
    size: SurfaceSize,
    pixels: PixelBuffer,
    stolen: AtomicBool,
    listener: Mutex<Option<Weak<dyn RasterListener>>>,
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("size", &self.size)
            .field("stolen", &self.is_stolen())
            .finish_non_exhaustive()
    }
}

impl Raster {
    /// Creates a raster filled with transparent black.
    pub fn new(width: u32, height: u32) -> Self {
        let size = SurfaceSize::new(width, height);
        Self::from_pixels(width, height, vec![0; size.pixel_count()])
    }

    /// # Panics
    ///
    /// Panics if `pixels` does not hold exactly `width * height` words.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u32>) -> Self {
        let size = SurfaceSize::new(width, height);
        assert!(
            pixels.len() == size.pixel_count(),
            "pixel buffer does not match raster dimensions"
        );

        Self {
            size,
            pixels: Arc::new(RwLock::new(pixels)),
            stolen: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    fn index(&self, x: u32, y: u32) -> Result<usize, SurfaceError> {
        if x >= self.size.width || y >= self.size.height {
            return Err(SurfaceError::OutOfBounds {
                x,
                y,
                width: self.size.width,
                height: self.size.height,
            });
        }
        Ok(y as usize * self.size.width as usize + x as usize)
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Result<u32, SurfaceError> {
        let idx = self.index(x, y)?;
        let pixels = self.pixels.read().unwrap_or_else(PoisonError::into_inner);
        Ok(pixels[idx])
    }

    pub fn set_pixel(&self, x: u32, y: u32, argb: u32) -> Result<(), SurfaceError> {
        let idx = self.index(x, y)?;
        {
            let mut pixels = self.pixels.write().unwrap_or_else(PoisonError::into_inner);
            pixels[idx] = argb;
        }
        self.notify_changed();
        Ok(())
    }

    pub fn fill(&self, argb: u32) {
        {
            let mut pixels = self.pixels.write().unwrap_or_else(PoisonError::into_inner);
            pixels.iter_mut().for_each(|p| *p = argb);
        }
        self.notify_changed();
    }

    /// Mediated bulk write. The listener is notified once `f` returns.
    pub fn update<R>(&self, f: impl FnOnce(&mut [u32]) -> R) -> R {
        let result = {
            let mut pixels = self.pixels.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut pixels)
        };
        self.notify_changed();
        result
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u32> {
        self.pixels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the contents without notifying the listener. Used by surfaces that write into
    /// the raster on behalf of the cache itself.
    pub(crate) fn store_silently(&self, src: &[u32]) -> bool {
        let mut pixels = self.pixels.write().unwrap_or_else(PoisonError::into_inner);
        if pixels.len() != src.len() {
            return false;
        }
        pixels.copy_from_slice(src);
        true
    }

    /// Hands out the underlying buffer. The raster is marked stolen and the listener notified.
    pub fn data_buffer(&self) -> PixelBuffer {
        self.stolen.store(true, Ordering::Release);
        if let Some(listener) = self.listener() {
            listener.raster_stolen();
        }
        self.pixels.clone()
    }

    pub fn is_stolen(&self) -> bool {
        self.stolen.load(Ordering::Acquire)
    }

    pub fn set_stolen(&self, stolen: bool) {
        self.stolen.store(stolen, Ordering::Release);
    }

    /// Registers `listener`, replacing any previous one. A raster that is already stolen
    /// reports so to the new listener right away.
    pub fn set_listener(&self, listener: Weak<dyn RasterListener>) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        if self.is_stolen() {
            if let Some(listener) = self.listener() {
                listener.raster_stolen();
            }
        }
    }

    fn listener(&self) -> Option<Arc<dyn RasterListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn notify_changed(&self) {
        if let Some(listener) = self.listener() {
            listener.raster_changed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter {
        changed: AtomicUsize,
        stolen: AtomicUsize,
    }

    impl RasterListener for Counter {
        fn raster_changed(&self) {
            self.changed.fetch_add(1, Ordering::SeqCst);
        }
        fn raster_stolen(&self) {
            self.stolen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn listen(raster: &Raster) -> Arc<Counter> {
        let counter = Arc::new(Counter::default());
        let weak: Weak<dyn RasterListener> = Arc::downgrade(&(counter.clone() as Arc<dyn RasterListener>));
        raster.set_listener(weak);
        counter
    }

    #[test]
    fn writes_notify_changed() {
        let raster = Raster::new(4, 4);
        let counter = listen(&raster);

        raster.set_pixel(1, 2, 0xff00ff00).unwrap();
        raster.fill(0xff000000);
        raster.update(|px| px[0] = 0xffffffff);

        assert_eq!(counter.changed.load(Ordering::SeqCst), 3);
        assert_eq!(counter.stolen.load(Ordering::SeqCst), 0);
        assert_eq!(raster.get_pixel(0, 0).unwrap(), 0xffffffff);
        assert_eq!(raster.get_pixel(1, 2).unwrap(), 0xff000000);
    }

    #[test]
    fn out_of_bounds_is_an_error() {
        let raster = Raster::new(2, 2);
        assert!(matches!(
            raster.set_pixel(2, 0, 0),
            Err(SurfaceError::OutOfBounds { x: 2, y: 0, .. })
        ));
        assert!(raster.get_pixel(0, 5).is_err());
    }

    #[test]
    fn data_buffer_steals_the_raster() {
        let raster = Raster::new(2, 2);
        let counter = listen(&raster);

        let buffer = raster.data_buffer();
        buffer.write().unwrap()[0] = 0x12345678;

        assert!(raster.is_stolen());
        assert_eq!(counter.stolen.load(Ordering::SeqCst), 1);
        // direct writes bypass change tracking
        assert_eq!(counter.changed.load(Ordering::SeqCst), 0);
        assert_eq!(raster.get_pixel(0, 0).unwrap(), 0x12345678);
    }

    #[test]
    fn registering_on_a_stolen_raster_reports_immediately() {
        let raster = Raster::new(2, 2);
        let _ = raster.data_buffer();

        let counter = listen(&raster);
        assert_eq!(counter.stolen.load(Ordering::SeqCst), 1);

        raster.set_stolen(false);
        let counter = listen(&raster);
        assert_eq!(counter.stolen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropped_listener_is_ignored() {
        let raster = Raster::new(1, 1);
        let counter = listen(&raster);
        drop(counter);
        raster.fill(1);
    }
}
