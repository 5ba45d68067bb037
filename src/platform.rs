//! Platform hooks the managers call into.
//!
//! A platform supplies two things: a [`SurfaceFactory`] that allocates accelerated surfaces for a
//! device configuration, and an [`AccelerationPolicy`] that knows which operations benefit from
//! an accelerated source. [`memory::MemoryPlatform`] is an in-process implementation of both,
//! with fault injection, used by the tests and demos.

use crate::blit::{Color, CompositeRule};
use crate::device::DeviceConfig;
use crate::errors::CreateError;
use crate::surface::{FormatTag, Surface, SurfaceHandle, SurfaceSize};

pub mod memory;

pub use memory::{DefaultPolicy, MemoryPlatform, VramSurface};

/// Result of an accelerated surface allocation.
pub type CreateResult = Result<SurfaceHandle, CreateError>;

/// Allocates surfaces in accelerated memory.
pub trait SurfaceFactory: Send + Sync {
    /// Creates an accelerated surface compatible with `config`. Failures are soft: the caller
    /// keeps using the software surface.
    fn create_accelerated(
        &self,
        config: DeviceConfig,
        size: SurfaceSize,
        format: FormatTag,
    ) -> CreateResult;
}

/// Decides whether an operation is worth serving from an accelerated surface.
pub trait AccelerationPolicy: Send + Sync {
    /// True when copies onto `dst` can be accelerated.
    fn is_dest_accelerated(&self, dst: &dyn Surface) -> bool {
        dst.is_accelerated() && !dst.config().is_system()
    }

    /// True when the operation is likely to benefit from an accelerated source. Alpha blending
    /// composites typically do not.
    fn is_operation_supported(
        &self,
        dst: &dyn Surface,
        rule: CompositeRule,
        bg: Option<Color>,
        scale: bool,
    ) -> bool;

    /// Colour substituted for transparent pixels when copying an image of `format` into
    /// accelerated memory, or `None` for a plain copy.
    fn transparent_pixel_color(&self, _format: FormatTag) -> Option<Color> {
        None
    }
}
