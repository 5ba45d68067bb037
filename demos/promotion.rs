use std::sync::Arc;

use surfcache::blit::CompositeRule;
use surfcache::device::DeviceConfig;
use surfcache::event::SurfaceEvent;
use surfcache::platform::MemoryPlatform;
use surfcache::surface::{FormatTag, SurfaceSize};
use surfcache::{AccelConfig, Image, ImageRegistry, SurfaceContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // The configuration is normally read from the environment once per process. Here we build
    // one explicitly so that an image gets promoted on its third copy.
    let config = AccelConfig::builder().threshold(2).build()?;

    // The memory platform simulates a device with its own memory. A real application would
    // plug in its own surface factory.
    let platform = MemoryPlatform::new();
    let ctx = SurfaceContext::builder(Arc::new(platform.clone()))
        .config(config)
        .build();

    // Print everything the cache does in the background.
    let mut events = ctx.events().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            match ev {
                SurfaceEvent::Promoted { image, config } => {
                    println!("image {image} promoted to {config}")
                }
                SurfaceEvent::Refreshed { updated, failed, .. } => {
                    println!("refresh pass: {updated} updated, {failed} failed")
                }
                other => println!("{other:?}"),
            }
        }
    });

    let registry = ImageRegistry::new(ctx);
    let image = Arc::new(Image::new(64, 64, FormatTag::IntArgb));
    image.raster().fill(0xff20_4080);

    // The window back buffer we keep copying the image onto.
    let screen = platform.create_destination(DeviceConfig::new(0, 0), SurfaceSize::new(640, 480));
    let manager = registry.get_manager(&image)?;

    for frame in 0..5 {
        if frame == 3 {
            // Changing the pixels marks the cached copy stale; the next copy refreshes it.
            image.raster().set_pixel(10, 10, 0xffff_ffff)?;
        }
        let src = manager.source_surface(screen.as_ref(), CompositeRule::SrcOver, None, false);
        println!(
            "frame {frame}: copying from {} surface",
            if src.is_accelerated() { "accelerated" } else { "system memory" }
        );
    }

    let caps = manager.capabilities(None);
    println!("capabilities: {}", serde_json::to_string(&caps)?);

    // Dropping the last holders of the context closes the event channel, which ends the printer
    // once it has seen every event.
    registry.dispose(image.id());
    drop(manager);
    drop(registry);
    printer.await?;
    Ok(())
}
