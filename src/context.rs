//! Shared collaborators of the surface managers.
//!
//! A [`SurfaceContext`] is built once and cloned into every manager. It bundles the immutable
//! [`AccelConfig`] with the platform hooks, the blit engine, the display notifier, the scratch
//! pool and the event bus.
//!
//! ```
//! use std::sync::Arc;
//! use surfcache::config::AccelConfig;
//! use surfcache::context::SurfaceContext;
//! use surfcache::platform::MemoryPlatform;
//!
//! let platform = MemoryPlatform::new();
//! let ctx = SurfaceContext::builder(Arc::new(platform))
//!     .config(AccelConfig::builder().threshold(2).build().unwrap())
//!     .build();
//! assert_eq!(ctx.config().threshold, 2);
//! ```

use std::sync::Arc;

use crate::blit::{BlitEngine, MemoryBlitter};
use crate::config::AccelConfig;
use crate::device::{DeviceConfig, DisplayNotifier};
use crate::event::SurfaceBus;
use crate::platform::{AccelerationPolicy, DefaultPolicy, SurfaceFactory};
use crate::surface::ScratchPool;

#[derive(Clone)]
pub struct SurfaceContext {
    config: Arc<AccelConfig>,
    factory: Arc<dyn SurfaceFactory>,
    policy: Arc<dyn AccelerationPolicy>,
    blitter: Arc<dyn BlitEngine>,
    display: Arc<DisplayNotifier>,
    scratch: Arc<ScratchPool>,
    events: SurfaceBus,
    default_config: DeviceConfig,
}

impl std::fmt::Debug for SurfaceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceContext")
            .field("config", &self.config)
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}

impl SurfaceContext {
    pub fn builder(factory: Arc<dyn SurfaceFactory>) -> SurfaceContextBuilder {
        SurfaceContextBuilder {
            factory,
            config: None,
            policy: None,
            blitter: None,
            display: None,
            events: None,
            default_config: DeviceConfig::new(0, 0),
        }
    }

    pub fn config(&self) -> &AccelConfig {
        &self.config
    }

    pub fn factory(&self) -> &dyn SurfaceFactory {
        self.factory.as_ref()
    }

    pub fn policy(&self) -> &dyn AccelerationPolicy {
        self.policy.as_ref()
    }

    pub fn blitter(&self) -> &dyn BlitEngine {
        self.blitter.as_ref()
    }

    pub fn display(&self) -> &Arc<DisplayNotifier> {
        &self.display
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    pub fn events(&self) -> &SurfaceBus {
        &self.events
    }

    /// Configuration of the default screen device.
    pub fn default_config(&self) -> DeviceConfig {
        self.default_config
    }
}

pub struct SurfaceContextBuilder {
    factory: Arc<dyn SurfaceFactory>,
    config: Option<Arc<AccelConfig>>,
    policy: Option<Arc<dyn AccelerationPolicy>>,
    blitter: Option<Arc<dyn BlitEngine>>,
    display: Option<Arc<DisplayNotifier>>,
    events: Option<SurfaceBus>,
    default_config: DeviceConfig,
}

impl SurfaceContextBuilder {
    /// Defaults to [`AccelConfig::process`].
    pub fn config(mut self, config: AccelConfig) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    pub fn shared_config(mut self, config: Arc<AccelConfig>) -> Self {
        self.config = Some(config);
        self
    }

    /// Defaults to [`DefaultPolicy`].
    pub fn policy(mut self, policy: Arc<dyn AccelerationPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Defaults to [`MemoryBlitter`].
    pub fn blitter(mut self, blitter: Arc<dyn BlitEngine>) -> Self {
        self.blitter = Some(blitter);
        self
    }

    pub fn display(mut self, display: Arc<DisplayNotifier>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn events(mut self, events: SurfaceBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn default_config(mut self, config: DeviceConfig) -> Self {
        self.default_config = config;
        self
    }

    pub fn build(self) -> SurfaceContext {
        let config = self.config.unwrap_or_else(AccelConfig::process);
        let scratch = Arc::new(ScratchPool::new(config.scratch_budget_bytes));

        SurfaceContext {
            factory: self.factory,
            policy: self.policy.unwrap_or_else(|| Arc::new(DefaultPolicy::new())),
            blitter: self.blitter.unwrap_or_else(|| Arc::new(MemoryBlitter::new())),
            display: self.display.unwrap_or_default(),
            events: self.events.unwrap_or_default(),
            scratch,
            config,
            default_config: self.default_config,
        }
    }
}
