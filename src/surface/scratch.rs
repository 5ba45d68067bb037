use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use hashbrown::HashMap;

use crate::image::ImageId;
use crate::surface::{FormatTag, SoftwareSurface, SurfaceHandle, SurfaceSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScratchKey {
    owner: Option<ImageId>,
    size: SurfaceSize,
    format: FormatTag,
}

impl ScratchKey {
    fn byte_len(&self) -> usize {
        self.size
            .pixel_count()
            .saturating_mul(self.format.bytes_per_pixel())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScratchStats {
    pub retained_surfaces: usize,
    pub retained_bytes: usize,
    pub allocated: u64,
    pub reused: u64,
    pub evicted: u64,
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<ScratchKey, SurfaceHandle>,
    order: VecDeque<ScratchKey>,
    stats: ScratchStats,
}

/// Budgeted pool of intermediate system-memory surfaces.
///
/// The pool is the only strong owner of the surfaces it hands out; users keep weak references,
/// so anything trimmed or evicted here is reclaimed as soon as the current copy finishes.
pub struct ScratchPool {
    budget: usize,
    inner: Mutex<PoolInner>,
}

impl std::fmt::Debug for ScratchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchPool")
            .field("budget", &self.budget)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ScratchPool {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Returns the shared retained surface for `(size, format)`, creating one if needed.
    pub fn acquire(&self, size: SurfaceSize, format: FormatTag) -> SurfaceHandle {
        self.acquire_key(ScratchKey { owner: None, size, format })
    }

    /// Like [`acquire`](Self::acquire), but the surface is private to `owner`. Two images of the
    /// same size and format never stage through the same surface.
    pub fn acquire_for(&self, owner: ImageId, size: SurfaceSize, format: FormatTag) -> SurfaceHandle {
        self.acquire_key(ScratchKey {
            owner: Some(owner),
            size,
            format,
        })
    }

    fn acquire_key(&self, key: ScratchKey) -> SurfaceHandle {
        let ScratchKey { size, format, .. } = key;
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(surface) = inner.entries.get(&key).cloned() {
            inner.stats.reused = inner.stats.reused.saturating_add(1);
            return surface;
        }

        let surface: SurfaceHandle = Arc::new(SoftwareSurface::with_size(size, format));
        inner.stats.allocated = inner.stats.allocated.saturating_add(1);

        let bytes = key.byte_len();
        if bytes > self.budget {
            log::debug!(
                "Scratch surface {}x{} exceeds the pool budget, not retained",
                size.width,
                size.height
            );
            return surface;
        }

        while inner.stats.retained_bytes + bytes > self.budget {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if inner.entries.remove(&oldest).is_some() {
                inner.stats.retained_surfaces -= 1;
                inner.stats.retained_bytes -= oldest.byte_len();
                inner.stats.evicted = inner.stats.evicted.saturating_add(1);
            }
        }

        inner.entries.insert(key, surface.clone());
        inner.order.push_back(key);
        inner.stats.retained_surfaces += 1;
        inner.stats.retained_bytes += bytes;
        surface
    }

    /// Drops every retained surface.
    pub fn trim(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        inner.stats.retained_surfaces = 0;
        inner.stats.retained_bytes = 0;
        inner.stats.evicted = inner.stats.evicted.saturating_add(dropped as u64);
        log::trace!("Scratch pool trimmed, {} surface(s) released", dropped);
    }

    pub fn stats(&self) -> ScratchStats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
            .clone()
    }
}
