use crate::image::{ImageId, ImageKind};
use crate::surface::FormatTag;

/// Errors surfaced to callers of the public API. Acceleration failures never end up here; they are
/// recovered inside the managers and the caller simply receives the software surface.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Invalid image variant: {0:?}")]
    InvalidImageVariant(ImageKind),

    #[error("Image {0} already has a surface manager")]
    ManagerAlreadySet(ImageId),

    #[error("Pixel ({x}, {y}) is outside of a {width}x{height} raster")]
    OutOfBounds { x: u32, y: u32, width: u32, height: u32 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Reasons an accelerated surface could not be created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateError {
    #[error("Out of accelerated memory")]
    AllocationFailed,

    #[error("Driver rejected surface creation: {0}")]
    DriverRejected(String),

    #[error("Configuration does not support accelerated surfaces")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RestoreError {
    #[error("Invalid pipe while restoring surface: {0}")]
    InvalidPipe(String),
}

/// Failure of a single copy between two surfaces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlitError {
    #[error("No blit loop from {src:?} to {dst:?}")]
    NoLoop { src: FormatTag, dst: FormatTag },

    #[error("Surface is lost")]
    SurfaceLost,

    #[error("Surface resources were released")]
    Released,

    #[error("Surface has no addressable pixels")]
    NotAddressable,

    #[error("Copy of {width}x{height} does not fit the surface")]
    SizeMismatch { width: u32, height: u32 },

    #[error("Driver error during blit: {0}")]
    Driver(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid acceleration threshold: {0}")]
    InvalidThreshold(String),

    #[error("scratch_budget_bytes must be at least 1")]
    ZeroScratchBudget,

    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}
