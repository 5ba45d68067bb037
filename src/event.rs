//! Cache events.
//!
//! Managers publish a [`SurfaceEvent`] whenever the accelerated state of an image changes. Anyone
//! interested (diagnostics overlays, tests) can [`subscribe`](SurfaceBus::subscribe); events
//! published while nobody listens are dropped.

use tokio::sync::broadcast;

use crate::device::DeviceConfig;
use crate::errors::CreateError;
use crate::image::ImageId;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// A handle for receiving cache events.
pub type Subscription = broadcast::Receiver<SurfaceEvent>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisableReason {
    RasterStolen,
    ZeroPriority,
    Explicit,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceEvent {
    /// An accelerated surface was created for the image.
    Promoted { image: ImageId, config: DeviceConfig },
    /// An accelerated surface could not be created; the image stays in system memory.
    CreateFailed { image: ImageId, config: DeviceConfig, reason: CreateError },
    /// A copy pass from the software surface finished.
    Refreshed { image: ImageId, updated: usize, failed: usize },
    /// A single accelerated surface failed to refresh and was marked lost.
    EntryLost { image: ImageId, config: DeviceConfig },
    /// A lost surface could not be restored; all accelerated surfaces were dropped.
    RestoreFailed { image: ImageId, config: DeviceConfig },
    Flushed { image: ImageId },
    Invalidated { image: ImageId },
    AccelerationDisabled { image: ImageId, reason: DisableReason },
    AccelerationEnabled { image: ImageId },
}

#[derive(Debug, Clone)]
pub struct SurfaceBus {
    tx: broadcast::Sender<SurfaceEvent>,
}

impl Default for SurfaceBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl SurfaceBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> Subscription {
        self.tx.subscribe()
    }

    pub fn publish(&self, ev: SurfaceEvent) {
        // send() only fails when there are no receivers, which is fine
        let _ = self.tx.send(ev);
    }
}
