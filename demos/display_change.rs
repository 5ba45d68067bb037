use std::sync::Arc;

use surfcache::blit::CompositeRule;
use surfcache::device::DeviceConfig;
use surfcache::platform::MemoryPlatform;
use surfcache::surface::{FormatTag, SurfaceSize};
use surfcache::{
    AccelConfig, CachingSurfaceManager, Image, OffScreenSurfaceManager, Surface, SurfaceContext,
    SurfaceManager,
};

const PRIMARY: DeviceConfig = DeviceConfig::new(0, 0);
const SECONDARY: DeviceConfig = DeviceConfig::new(1, 0);

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let platform = MemoryPlatform::with_configs(&[PRIMARY, SECONDARY]);
    let ctx = SurfaceContext::builder(Arc::new(platform.clone()))
        .config(AccelConfig::builder().threshold(0).build()?)
        .build();

    let left = platform.create_destination(PRIMARY, SurfaceSize::new(320, 200));
    let right = platform.create_destination(SECONDARY, SurfaceSize::new(320, 200));

    // A sprite shown on both monitors gets one cached copy per monitor.
    let sprite = Image::new(32, 32, FormatTag::IntArgb);
    sprite.raster().fill(0xff80_8000);
    let manager = CachingSurfaceManager::new(&sprite, ctx.clone());
    for dst in [&left, &right] {
        let src = manager.source_surface(dst.as_ref(), CompositeRule::Src, None, false);
        println!("sprite on {}: accelerated = {}", dst.config(), src.is_accelerated());
    }
    println!("cached on {:?}", manager.cached_configs());

    // An offscreen buffer rendered on the primary monitor.
    let buffer = Image::volatile(128, 128, FormatTag::IntRgb);
    let offscreen = OffScreenSurfaceManager::new(&buffer, ctx.clone(), Some(PRIMARY));
    let src = offscreen.source_surface(right.as_ref(), CompositeRule::Src, None, false);
    println!("offscreen buffer on {}: accelerated = {}", SECONDARY, src.is_accelerated());

    // The display mode changes: everything accelerated is gone. Managers drop their entries and
    // recreate them lazily; the offscreen buffer keeps its primary surface.
    platform.lose_all();
    ctx.display().display_changed();
    println!("after display change, sprite cached on {:?}", manager.cached_configs());
    println!("after display change, buffer cached on {:?}", offscreen.cached_configs());

    let src = manager.source_surface(left.as_ref(), CompositeRule::Src, None, false);
    println!("sprite recreated on {}: accelerated = {}", PRIMARY, src.is_accelerated());

    // Restoring fails while the device is still busy; the manager gives up on its cache and
    // falls back to system memory until the device is usable again.
    platform.set_restore_failing(true);
    platform.lose_all();
    let src = manager.source_surface(left.as_ref(), CompositeRule::Src, None, false);
    println!("restore failed, accelerated = {}", src.is_accelerated());
    println!("stats: {}", serde_json::to_string_pretty(&manager.stats())?);

    Ok(())
}
