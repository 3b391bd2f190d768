// =============================================================================
// VULKAN ENGINE DEMOS
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  BaseApp (winit event loop, frame pacing, input)                │
// │    └── Application (demo: triangle or mesh viewer)              │
// │          └── VulkanContext (device, swapchain, frames)          │
// │                └── Pipelines, buffers, textures                 │
// └─────────────────────────────────────────────────────────────────┘
//
// The demo is picked by [demo] scene in config.toml.
//
// =============================================================================

mod demo;

use anyhow::Result;
use env_logger::Target;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use demo::{MeshApp, TriangleApp};
use vulkan_engine::config::DemoScene;
use vulkan_engine::{BaseApp, Config};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan engine");
    log::info!(
        "Window: {}x{} ({:?})",
        config.window.width,
        config.window.height,
        config.window.mode
    );
    log::info!("Present mode: {}", config.graphics.present_mode);
    log::info!("Scene: {:?}", config.demo.scene);

    let clear_color = config.graphics.clear_color;
    match config.demo.scene {
        DemoScene::Triangle => BaseApp::new(config, TriangleApp::new(clear_color)).run(),
        DemoScene::Mesh => {
            let cache = config.demo.mesh_cache.clone();
            BaseApp::new(config, MeshApp::new(clear_color, cache)).run()
        }
    }
}

/// Log to stderr, or to the configured file instead.
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.target(log_target(config.debug.log_file.as_deref()));
    builder.init();
}

/// The file replaces stderr; an unopenable file falls back to stderr.
fn log_target(log_file: Option<&Path>) -> Target {
    let Some(path) = log_file else {
        return Target::Stderr;
    };

    match OpenOptions::new().create(true).write(true).truncate(true).open(path) {
        Ok(mut file) => {
            let _ = writeln!(file, "=== Vulkan Engine Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
            Target::Pipe(Box::new(file))
        }
        Err(e) => {
            eprintln!("Warning: cannot open log file {:?}: {}", path, e);
            Target::Stderr
        }
    }
}
