//! Acceleration cache for in-memory images.
//!
//! An image lives in system memory, where it is always authoritative. When it gets copied onto
//! accelerated destinations often enough, its [`CachingSurfaceManager`] keeps a copy in the
//! destination device's memory and serves that copy instead, keeping it coherent with the system
//! memory pixels. Every failure on the accelerated side falls back to the system memory surface.

pub mod blit;
pub mod config;
pub mod context;
pub mod device;
pub mod errors;
pub mod event;
pub mod image;
pub mod manager;
pub mod platform;
pub mod raster;
pub mod registry;
pub mod surface;

pub use config::AccelConfig;
pub use context::SurfaceContext;
pub use device::DeviceConfig;
pub use errors::SurfaceError;
pub use image::{Image, ImageId, ImageKind};
pub use manager::{CachingSurfaceManager, ImageCapabilities, OffScreenSurfaceManager, SurfaceManager};
pub use registry::ImageRegistry;
pub use surface::{Surface, SurfaceHandle};
