//! Device configurations and display change notifications.

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};

/// Identifies a graphics configuration on a device. Accelerated surfaces are cached per
/// configuration, so this is the key of every manager's cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device: u16,
    pub index: u16,
}

impl DeviceConfig {
    /// Pseudo configuration of surfaces living in system memory.
    pub const SYSTEM: DeviceConfig = DeviceConfig {
        device: u16::MAX,
        index: u16::MAX,
    };

    pub const fn new(device: u16, index: u16) -> Self {
        Self { device, index }
    }

    pub fn is_system(&self) -> bool {
        *self == Self::SYSTEM
    }
}

impl Display for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_system() {
            write!(f, "system")
        } else {
            write!(f, "dev{}:cfg{}", self.device, self.index)
        }
    }
}

/// Receives display subsystem notifications.
pub trait DisplayChangedListener: Send + Sync {
    /// The display mode changed; device surfaces may be gone.
    fn display_changed(&self);

    /// The device palette changed; indexed pixels need to be copied again.
    fn palette_changed(&self);
}

/// Fan-out of display notifications to weakly held listeners.
#[derive(Default)]
pub struct DisplayNotifier {
    listeners: Mutex<Vec<Weak<dyn DisplayChangedListener>>>,
}

impl std::fmt::Debug for DisplayNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayNotifier")
            .field("listeners", &self.len())
            .finish()
    }
}

impl DisplayNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Weak<dyn DisplayChangedListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }

    /// Number of listeners that are still alive.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn display_changed(&self) {
        let live = self.live();
        log::debug!("Display changed, notifying {} listener(s)", live.len());
        for listener in live {
            listener.display_changed();
        }
    }

    pub fn palette_changed(&self) {
        for listener in self.live() {
            listener.palette_changed();
        }
    }

    // Listeners are called without holding the lock so they may register others.
    fn live(&self) -> Vec<Arc<dyn DisplayChangedListener>> {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}
