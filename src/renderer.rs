// =============================================================================
// RENDERER - Device -> SwapChain -> Pipeline, one triangle per frame
// =============================================================================
//
// Owns the object graph and tears it down in reverse dependency order:
// pipeline, swapchain, device. Any change of surface size marks the swapchain
// stale; it is rebuilt at the start of the next frame.

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use crate::backend::frame::VulkanFrame;
use crate::backend::pipeline::create_graphics_pipeline;
use crate::backend::{
    Device, DeviceConfig, FrameDriver, FrameOutcome, Pipeline, RenderError, Result, ShaderInfo, ShaderKind,
    SwapChain, SwapChainConfig,
};
use crate::config::Config;
use crate::storage::{resource_id, ResourceKind, Storage};

/// Shader stage kept around so the pipeline can be rebuilt after a format change
struct ShaderStage {
    kind: ShaderKind,
    bytecode: Vec<u8>,
}

pub struct Renderer {
    // Field order is drop order: pipeline, swapchain, then the device
    pipeline: Option<Pipeline>,
    swapchain: Option<SwapChain>,
    device: Arc<Device>,

    driver: FrameDriver,
    shaders: Vec<ShaderStage>,
    clear_color: [f32; 4],

    /// Framebuffer size as last reported by the window
    extent: vk::Extent2D,
    stale: bool,
}

impl Renderer {
    pub fn new<W>(storage: &mut Storage, config: &Config, window: &W, framebuffer_size: (u32, u32)) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        // Fail before touching the GPU if the shaders aren't there
        let shaders = vec![
            load_shader(storage, &config.assets.vertex_shader)?,
            load_shader(storage, &config.assets.fragment_shader)?,
        ];

        let frames_in_flight = config.graphics.max_frames_in_flight.max(1);

        let device = Device::new(
            &DeviceConfig {
                app_name: &config.window.title,
                engine_name: &config.app.engine_name,
                validate: cfg!(debug_assertions) && config.debug.validation_layers,
                max_frames_in_flight: frames_in_flight,
            },
            window,
        )?;

        let extent = vk::Extent2D {
            width: framebuffer_size.0,
            height: framebuffer_size.1,
        };

        let swapchain = SwapChain::new(
            &device,
            &SwapChainConfig {
                extent,
                frames_in_flight,
            },
            None,
        )?;

        let mut renderer = Self {
            pipeline: None,
            swapchain: None,
            device,
            driver: FrameDriver::new(frames_in_flight, config.graphics.frame_timeout()),
            shaders,
            clear_color: config.graphics.clear_color,
            extent,
            stale: false,
        };

        renderer.pipeline = Some(renderer.build_pipeline(swapchain.render_pass())?);
        renderer.swapchain = Some(swapchain);

        log::info!(target: "renderer", "Renderer ready ({} frames in flight)", frames_in_flight);
        Ok(renderer)
    }

    /// Framebuffer size changed; a zero size pauses rendering
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == (self.extent.width, self.extent.height) {
            return;
        }
        log::debug!(target: "renderer", "Resize to {}x{}", width, height);
        self.extent = vk::Extent2D { width, height };
        self.stale = true;
    }

    /// One iteration of the render loop. Problems are logged, never returned.
    pub fn draw_frame(&mut self) -> Option<FrameOutcome> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return None;
        }

        if self.stale {
            if let Err(e) = self.recreate_swapchain() {
                log::error!(target: "renderer", "Couldn't recreate swapchain: {}", e);
                return None;
            }
        }

        let (Some(swapchain), Some(pipeline)) = (self.swapchain.as_ref(), self.pipeline.as_ref()) else {
            return None;
        };

        let mut frame = VulkanFrame {
            device: &self.device,
            swapchain,
            pipeline,
            clear_color: self.clear_color,
        };
        let outcome = self.driver.draw_frame(&mut frame);

        if outcome.needs_rebuild() {
            self.stale = true;
        }
        Some(outcome)
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        self.device.wait_idle()?;

        let previous_pass = self.swapchain.as_mut().and_then(SwapChain::take_render_pass);
        let previous_format = previous_pass.as_ref().map(|pass| pass.format);

        // Only one swapchain per surface: the old one goes first
        self.swapchain = None;

        let swapchain = SwapChain::new(
            &self.device,
            &SwapChainConfig {
                extent: self.extent,
                frames_in_flight: self.driver.frames_in_flight(),
            },
            previous_pass,
        )?;

        // A new render pass invalidates the pipeline built against the old one
        if self.pipeline.is_none() || previous_format != Some(swapchain.surface_format.format) {
            log::info!(target: "renderer", "Surface format changed, rebuilding pipeline");
            self.pipeline = None;
            self.pipeline = Some(self.build_pipeline(swapchain.render_pass())?);
        }

        self.swapchain = Some(swapchain);
        self.stale = false;
        Ok(())
    }

    fn build_pipeline(&self, render_pass: vk::RenderPass) -> Result<Pipeline> {
        let stages: Vec<ShaderInfo<'_>> = self
            .shaders
            .iter()
            .map(|stage| ShaderInfo {
                kind: stage.kind,
                bytecode: &stage.bytecode,
            })
            .collect();

        create_graphics_pipeline(&self.device, render_pass, &stages)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!(target: "renderer", "Destroying renderer...");
        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.device.wait_idle() {
            log::error!(target: "renderer", "Couldn't wait for device: {}", e);
        }
        self.pipeline = None;
        self.swapchain = None;
    }
}

fn load_shader(storage: &mut Storage, name: &str) -> Result<ShaderStage> {
    let id = resource_id(ResourceKind::Shader, name);
    let program = storage.get_shader(id).ok_or(RenderError::ShaderNotFound(id))?;
    let kind = program
        .kind
        .ok_or_else(|| RenderError::InvalidShader(format!("can't tell the stage of '{}'", name)))?;

    Ok(ShaderStage {
        kind,
        bytecode: program.bytecode.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn storage_with(name: &str, files: &[&str]) -> (Storage, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("triangle-renderer-shaders-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for file in files {
            fs::write(dir.join(file), [0x03u8, 0x02, 0x23, 0x07]).unwrap();
        }
        (Storage::open(&[&dir]).unwrap(), dir)
    }

    #[test]
    fn shader_stage_comes_from_file_name() {
        let (mut storage, dir) = storage_with("stage", &["Base.vert.spv"]);

        let stage = load_shader(&mut storage, "Base.vert.spv").unwrap();
        assert_eq!(stage.kind, ShaderKind::Vertex);
        assert_eq!(stage.bytecode.len(), 4);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_shader_reports_its_id() {
        let (mut storage, dir) = storage_with("missing", &["Base.vert.spv"]);

        let expected = resource_id(ResourceKind::Shader, "Base.frag.spv");
        match load_shader(&mut storage, "Base.frag.spv") {
            Err(RenderError::ShaderNotFound(id)) => assert_eq!(id, expected),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("shader should not exist"),
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn shader_without_stage_is_invalid() {
        let (mut storage, dir) = storage_with("nostage", &["Lighting.comp.spv"]);

        let result = load_shader(&mut storage, "Lighting.comp.spv");
        assert!(matches!(result, Err(RenderError::InvalidShader(_))));

        let _ = fs::remove_dir_all(&dir);
    }
}
