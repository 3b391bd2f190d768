// =============================================================================
// FRAME LOOP - BaseApp drives an Application through winit
// =============================================================================
//
// FRAME FLOW:
// 1. Application update
// 2. Begin render (wait for the slot's fence, acquire swapchain image)
// 3. Application records commands
// 4. End render (submit, present)
// 5. Notify the application if the swapchain was rebuilt
//
// Input callbacks run on the same thread between frames.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::backend::{ContextDesc, VulkanContext};
use crate::config::{Config, WindowMode};
use crate::fps::FpsCounter;

/// Lifecycle hooks a demo implements. Only `on_init` and `on_render` are
/// required.
pub trait Application {
    /// Adjust the context requirements before initialization.
    fn configure(&mut self, _desc: &mut ContextDesc) {}

    fn on_init(&mut self, ctx: &mut VulkanContext) -> Result<()>;

    fn on_update(&mut self, _ctx: &mut VulkanContext, _delta_seconds: f32) {}

    /// Record draw commands for the current frame.
    fn on_render(&mut self, ctx: &mut VulkanContext, cmd: vk::CommandBuffer);

    /// The swapchain was rebuilt; size-dependent resources must follow.
    fn on_resize(&mut self, _ctx: &mut VulkanContext, _extent: vk::Extent2D) -> Result<()> {
        Ok(())
    }

    /// Called once, with the device idle, before the context goes away.
    fn on_cleanup(&mut self, _ctx: &mut VulkanContext) {}

    fn on_key(&mut self, _key: KeyCode, _pressed: bool) {}

    fn on_mouse_button(&mut self, _button: MouseButton, _pressed: bool) {}

    fn on_cursor_moved(&mut self, _x: f64, _y: f64) {}

    fn on_scroll(&mut self, _delta: MouseScrollDelta) {}
}

/// Owns the window, the context and the application.
///
/// Field order matters for Drop: application resources go before the
/// context that created them.
pub struct BaseApp<A: Application> {
    app: A,
    context: Option<VulkanContext>,
    window: Option<Arc<Window>>,
    config: Config,
    fps: FpsCounter,
    last_frame: Instant,
    swapchain_generation: u64,
    is_fullscreen: bool,
    init_error: Option<anyhow::Error>,
}

impl<A: Application> BaseApp<A> {
    pub fn new(config: Config, app: A) -> Self {
        let is_fullscreen = config.window.mode == WindowMode::Borderless;
        Self {
            app,
            context: None,
            window: None,
            config,
            fps: FpsCounter::default(),
            last_frame: Instant::now(),
            swapchain_generation: 0,
            is_fullscreen,
            init_error: None,
        }
    }

    /// Run the event loop until the window closes. Initialization failures
    /// are returned once the loop has exited.
    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new().context("Failed to create event loop")?;
        event_loop.run_app(&mut self).context("Event loop error")?;

        match self.init_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        match self.config.window.mode {
            WindowMode::Windowed => {}
            WindowMode::Borderless => {
                window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
            }
            WindowMode::Maximized => {
                window_attributes = window_attributes.with_maximized(true);
            }
        }

        let window = Arc::new(
            event_loop
                .create_window(window_attributes)
                .context("Failed to create window")?,
        );
        self.window = Some(window.clone());

        let mut desc = self.config.context_desc();
        self.app.configure(&mut desc);

        let mut context = VulkanContext::new(window, &desc).context("Failed to initialize Vulkan")?;
        self.swapchain_generation = context.swapchain_generation();

        self.app
            .on_init(&mut context)
            .context("Application initialization failed")?;

        self.context = Some(context);
        self.last_frame = Instant::now();
        Ok(())
    }

    fn frame(&mut self) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let Some(ctx) = self.context.as_mut() else {
            return;
        };

        self.app.on_update(ctx, delta);

        match ctx.begin_render() {
            Ok(true) => {
                // A pending resize may have rebuilt the swapchain just now
                sync_swapchain_generation(&mut self.app, ctx, &mut self.swapchain_generation);

                let cmd = ctx.command_buffer();
                self.app.on_render(ctx, cmd);

                if let Err(e) = ctx.end_render() {
                    log::error!("Render error: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => {
                log::error!("Render error: {}", e);
            }
        }

        sync_swapchain_generation(&mut self.app, ctx, &mut self.swapchain_generation);

        self.update_fps(delta);
    }

    fn update_fps(&mut self, delta: f32) {
        if !self.config.debug.show_fps || !self.fps.tick(delta) {
            return;
        }

        if let Some(ref window) = self.window {
            window.set_title(&fps_title(
                &self.config.window.title,
                self.fps.fps(),
                self.fps.frame_time_ms(),
            ));
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }
}

fn sync_swapchain_generation<A: Application>(app: &mut A, ctx: &mut VulkanContext, seen: &mut u64) {
    let generation = ctx.swapchain_generation();
    if generation == *seen {
        return;
    }
    *seen = generation;

    let extent = ctx.swapchain().extent();
    if extent.width == 0 || extent.height == 0 {
        return;
    }

    if let Err(e) = app.on_resize(ctx, extent) {
        log::error!("Resize handling failed: {:#}", e);
    }
}

pub fn fps_title(title: &str, fps: f32, frame_time_ms: f32) -> String {
    format!("{} - {:.0} FPS ({:.2}ms)", title, fps, frame_time_ms)
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl<A: Application> ApplicationHandler for BaseApp<A> {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            log::error!("{:#}", e);
            self.init_error = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref ctx) = self.context {
                    if let Err(e) = ctx.wait_device_idle() {
                        log::error!("Failed to wait for device idle: {}", e);
                    }
                }
                event_loop.exit();
            }

            // Zero size means iconified; frames are skipped until it grows
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut ctx) = self.context {
                    ctx.request_resize();
                }
            }

            WindowEvent::RedrawRequested => self.frame(),

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                let pressed = event.state.is_pressed();

                match key {
                    KeyCode::Escape if pressed => {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                    KeyCode::F11 if pressed && !event.repeat => self.toggle_fullscreen(),
                    _ => self.app.on_key(key, pressed),
                }
            }

            WindowEvent::MouseInput { state, button, .. } => {
                self.app.on_mouse_button(button, state == ElementState::Pressed);
            }

            WindowEvent::CursorMoved { position, .. } => {
                self.app.on_cursor_moved(position.x, position.y);
            }

            WindowEvent::MouseWheel { delta, .. } => self.app.on_scroll(delta),

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl<A: Application> Drop for BaseApp<A> {
    fn drop(&mut self) {
        if let Some(ref mut ctx) = self.context {
            log::info!("Cleaning up application resources...");
            if let Err(e) = ctx.wait_device_idle() {
                log::error!("Failed to wait for device idle: {}", e);
            }
            self.app.on_cleanup(ctx);
        }
    }
}
