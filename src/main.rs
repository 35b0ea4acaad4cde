// =============================================================================
// TRIANGLE RENDERER - window, asset storage and the render loop
// =============================================================================
//
// FRAME FLOW:
// 1. winit asks for a redraw (about_to_wait -> RedrawRequested)
// 2. Renderer rebuilds the swapchain if the window changed size
// 3. Wait for the frame slot, acquire, record, submit, present
//
// Startup failures end the event loop and are returned from main, so the
// process exits with a non-zero status.
// =============================================================================

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use triangle_renderer::config::Config;
use triangle_renderer::renderer::Renderer;
use triangle_renderer::storage::Storage;
use winit::{
    application::ApplicationHandler,
    dpi::{PhysicalPosition, PhysicalSize},
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let mut config = Config::load();

    let log_file_error = init_logging(&config);
    log::info!(target: "app", "Start");
    for warning in config.take_warnings().into_iter().chain(log_file_error) {
        log::warn!(target: "app", "{}", warning);
    }
    log::debug!(target: "app", "Config: {:?}", config);
    log::info!(
        target: "app",
        "Window: {}x{}, {} frames in flight",
        config.window.width,
        config.window.height,
        config.graphics.max_frames_in_flight
    );

    let storage = Storage::open(&config.assets.paths).context("Couldn't open storage")?;

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config, storage);
    event_loop.run_app(&mut app)?;

    if let Some(e) = app.startup_error.take() {
        return Err(e);
    }

    log::info!(target: "app", "Shutdown");
    Ok(())
}

/// Initialize logging, optionally into a file instead of stderr.
/// Returns the reason the log file couldn't be used, to be logged once the
/// logger is up.
fn init_logging(config: &Config) -> Option<String> {
    use env_logger::{Builder, Target};

    // RUST_LOG wins over the configured level
    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();

    let mut file_error = None;
    if config.debug.log_to_file {
        match open_log_file(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                file_error = Some(format!(
                    "Couldn't open log file {}: {}, logging to stderr",
                    config.debug.log_file, e
                ));
            }
        }
    }

    builder.init();
    file_error
}

/// Create/clear the log file and write its header
fn open_log_file<P: AsRef<Path>>(path: P) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    writeln!(file, "=== Vulkan Renderer Log ===")?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file)?;
    Ok(file)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: the renderer must go before the window it draws into.
struct App {
    config: Config,
    storage: Storage,

    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    startup_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config, storage: Storage) -> Self {
        Self {
            config,
            storage,
            renderer: None,
            window: None,
            startup_error: None,
        }
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Arc<Window>> {
        let size = PhysicalSize::new(self.config.window.width, self.config.window.height);
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(size)
            .with_resizable(self.config.window.resizable);

        if self.config.window.centered {
            if let Some(monitor) = event_loop.primary_monitor() {
                let screen = monitor.size();
                let x = screen.width.saturating_sub(size.width) / 2;
                let y = screen.height.saturating_sub(size.height) / 2;
                window_attributes = window_attributes.with_position(PhysicalPosition::new(x as i32, y as i32));
            }
        }

        let window = event_loop
            .create_window(window_attributes)
            .context("Failed to create window")?;
        Ok(Arc::new(window))
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = self.create_window(event_loop)?;

        let size = window.inner_size();
        let renderer = Renderer::new(
            &mut self.storage,
            &self.config,
            &*window,
            (size.width, size.height),
        )
        .context("Couldn't create renderer")?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        // Renderer waits for the GPU before releasing anything
        self.renderer = None;
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            log::error!(target: "app", "{:#}", e);
            self.startup_error = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!(target: "app", "Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.draw_frame();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!(target: "app", "ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_gets_header_and_later_records() {
        let path = std::env::temp_dir().join(format!("triangle-renderer-log-{}.log", std::process::id()));
        std::fs::write(&path, "stale contents from a previous run\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "[INFO  app] Start").unwrap();
        drop(file);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("=== Vulkan Renderer Log ===\n"));
        assert!(contents.ends_with("[INFO  app] Start\n"));
        assert!(!contents.contains("stale contents"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!("triangle-renderer-logdir-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        // A directory can't be opened for writing
        assert!(open_log_file(&dir).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
