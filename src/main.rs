// =============================================================================
// VK-BOOTSTRAP - Vulkan context bring-up with a buffer fill round trip
// =============================================================================
//
// Opens a window, builds the whole Vulkan object chain against it, runs one
// GPU buffer fill and reads the result back on the host.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit window (non-resizable, Escape/close exits)               │
// │    └── GraphicsContext                                          │
// │          └── Instance + Surface                                 │
// │                └── Device + Queue                               │
// │                      └── Swapchain, Command Pool + Buffer       │
// └─────────────────────────────────────────────────────────────────┘
//
// ROUND TRIP:
// 1. Create a buffer and bind host-visible device-local memory
// 2. Record a one-shot fill of the whole buffer
// 3. Submit and wait for the device to go idle
// 4. Read the first word through the mapping
//
// =============================================================================

use anyhow::{anyhow, Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;
use vk_bootstrap::backend::{AshLoader, WindowSystem};
use vk_bootstrap::config::Config;
use vk_bootstrap::{GpuError, GpuResult, GraphicsContext};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vk-bootstrap");
    log::info!("Window: {}x{}", config.window.width, config.window.height);
    log::info!("Present modes: {:?}", config.graphics.present_modes);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or(config.debug.log_level.as_str())).init();
}

// =============================================================================
// WINDOW SYSTEM
// =============================================================================

/// winit window as the Vulkan presentation target
struct WinitWindow(Arc<Window>);

impl WindowSystem for WinitWindow {
    fn required_extensions(&self) -> GpuResult<Vec<String>> {
        let names = ash_window::enumerate_required_extensions(self.raw_display_handle())
            .map_err(GpuError::vulkan("ash_window::enumerate_required_extensions"))?;

        Ok(names
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
            .collect())
    }

    fn raw_display_handle(&self) -> RawDisplayHandle {
        self.0.raw_display_handle()
    }

    fn raw_window_handle(&self) -> RawWindowHandle {
        self.0.raw_window_handle()
    }

    fn extent(&self) -> vk::Extent2D {
        let size = self.0.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    // Dropped before the window it presents to
    context: Option<GraphicsContext>,
    window: Option<Arc<Window>>,
    /// First fatal error; returned from main so the exit code is non-zero
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            context: None,
            window: None,
            error: None,
        }
    }

    /// Build the context and run the round trip once
    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<()> {
        let loader = AshLoader::new()?;
        let mut context = GraphicsContext::new(&loader, &WinitWindow(window), &self.config)
            .context("Failed to initialize Vulkan")?;

        let instance = context.instance();
        log::info!("Enabled instance extensions: {}", instance.extensions.join(", "));
        log::info!("Enabled layers: {}", instance.layers.join(", "));

        if self.config.round_trip.enabled {
            let value = context
                .fill_round_trip(&self.config.round_trip)
                .context("Buffer fill round trip failed")?;
            log::info!("Buffer value: {:#010x} ({})", value, value);
        }

        self.context = Some(context);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.error.get_or_insert(error);
        event_loop.exit();
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(context) = self.context.take() {
            context.wait_idle()?;
            context.destroy()?;
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow!("Failed to create window: {}", e));
                return;
            }
        };
        self.window = Some(window.clone());

        if let Err(e) = self.init_vulkan(window) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Err(e) = self.shutdown() {
            log::error!("Shutdown failed: {:#}", e);
            self.error.get_or_insert(e);
        }
        self.window = None;
    }
}
