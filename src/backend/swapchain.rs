// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen, the
// render pass + framebuffers drawing into them, and the per-frame sync slots.

use ash::vk;
use std::sync::Arc;

use super::error::{RenderError, Result};
use super::guard::HandleGuard;
use super::pipeline::{create_framebuffers, RenderPass};
use super::selector::QueueFamilyIndices;
use super::sync::{create_frame_syncs, FrameSync};
use super::Device;

pub struct SwapChainConfig {
    /// Framebuffer size of the window, used when the surface leaves it to us
    pub extent: vk::Extent2D,
    pub frames_in_flight: usize,
}

/// Prefer 8-bit BGRA sRGB, otherwise take whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX if offered, FIFO otherwise (always supported)
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    // u32::MAX means the surface size follows the swapchain
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped when the surface has a maximum
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// Concurrent sharing only when two distinct families touch the images
pub fn sharing_mode(queues: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if queues.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![queues.graphics, queues.present])
    }
}

/// Views first, then one framebuffer per view. A failing framebuffer releases
/// the framebuffers and the views built before it.
pub fn build_image_targets<I, V, F, E>(
    images: &[I],
    mut create_view: impl FnMut(I) -> std::result::Result<V, E>,
    destroy_view: impl FnMut(V),
    create_framebuffers: impl FnOnce(&[V]) -> std::result::Result<Vec<F>, E>,
) -> std::result::Result<(Vec<V>, Vec<F>), E>
where
    I: Copy,
    V: Copy,
{
    let mut views = HandleGuard::new(destroy_view);
    for &image in images {
        views.push(create_view(image)?);
    }
    let framebuffers = create_framebuffers(views.handles())?;
    Ok((views.keep(), framebuffers))
}

/// # Safety
/// `device` must be a valid logical device and `image` one of its swapchain images.
unsafe fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    device
        .create_image_view(&create_info, None)
        .map_err(RenderError::swapchain("image view"))
}

pub struct SwapChain {
    pub handle: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub frames: Vec<FrameSync>,
    // Dropped after the framebuffers that reference it
    render_pass: Option<RenderPass>,
    device: Arc<Device>,
}

impl SwapChain {
    /// Build the whole presentation chain. `previous_pass` is reused when its
    /// format still matches the chosen surface format.
    pub fn new(device: &Arc<Device>, config: &SwapChainConfig, previous_pass: Option<RenderPass>) -> Result<Self> {
        let surface_loader = &device.surface_loader;
        let surface = device.surface;
        let physical_device = device.physical_device;

        let caps = unsafe { surface_loader.get_physical_device_surface_capabilities(physical_device, surface) }
            .map_err(RenderError::swapchain("surface capabilities"))?;
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface) }
            .map_err(RenderError::swapchain("surface formats"))?;
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(physical_device, surface) }
                .map_err(RenderError::swapchain("present modes"))?;

        let surface_format = choose_surface_format(&formats)
            .ok_or(RenderError::swapchain("surface formats")(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
        if present_modes.is_empty() {
            return Err(RenderError::swapchain("present modes")(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&caps, config.extent);
        let min_image_count = image_count(&caps);
        let (sharing, family_indices) = sharing_mode(device.queue_families());

        log::info!(
            target: "vulkan",
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(RenderError::swapchain("vkCreateSwapchainKHR"))?;

        // Everything below is owned by `chain`; an early return drops it and
        // releases whatever was built so far.
        let mut chain = Self {
            handle,
            surface_format,
            present_mode,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            frames: Vec::new(),
            render_pass: None,
            device: Arc::clone(device),
        };

        chain.images = unsafe { device.swapchain_loader.get_swapchain_images(handle) }
            .map_err(RenderError::swapchain("swapchain images"))?;

        let render_pass = match previous_pass {
            Some(pass) if pass.format == surface_format.format => {
                log::debug!(target: "vulkan", "Reusing render pass for {:?}", pass.format);
                pass
            }
            _ => RenderPass::new(device, surface_format.format)?,
        };
        let pass_handle = render_pass.handle;
        chain.render_pass = Some(render_pass);

        let vk_device = &device.device;
        let (image_views, framebuffers) = build_image_targets(
            &chain.images,
            |image| unsafe { create_image_view(vk_device, image, surface_format.format) },
            |view| unsafe { vk_device.destroy_image_view(view, None) },
            |views| unsafe { create_framebuffers(vk_device, views, pass_handle, extent) },
        )?;
        chain.image_views = image_views;
        chain.framebuffers = framebuffers;

        chain.frames = unsafe { create_frame_syncs(vk_device, config.frames_in_flight)? };

        log::info!(
            target: "vulkan",
            "Created swapchain with {} images, {} frames in flight",
            chain.images.len(),
            chain.frames.len()
        );

        Ok(chain)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
            .as_ref()
            .map_or(vk::RenderPass::null(), |pass| pass.handle)
    }

    /// Detach the render pass so it can outlive this chain
    pub fn take_render_pass(&mut self) -> Option<RenderPass> {
        self.render_pass.take()
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        unsafe {
            self.device
                .swapchain_loader
                .acquire_next_image(self.handle, timeout, semaphore, vk::Fence::null())
        }
        .map_err(RenderError::frame("acquire"))
    }

    /// Present rendered image to screen; `Ok(true)` means suboptimal
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<bool> {
        let swapchains = [self.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.device.swapchain_loader.queue_present(queue, &present_info) }
            .map_err(RenderError::frame("present"))
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for frame in &self.frames {
                frame.destroy(device);
            }
            for &framebuffer in self.framebuffers.iter().rev() {
                device.destroy_framebuffer(framebuffer, None);
            }
            for &view in self.image_views.iter().rev() {
                device.destroy_image_view(view, None);
            }
            // Images belong to the swapchain itself
            self.device.swapchain_loader.destroy_swapchain(self.handle, None);
        }
        log::debug!(target: "vulkan", "Swapchain destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::guard::create_each;
    use std::cell::RefCell;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn undefined_extent_is_clamped() {
        let caps = caps((u32::MAX, u32::MAX), (64, 64), (4096, 4096));
        let extent = choose_extent(&caps, vk::Extent2D { width: 100, height: 50 });
        assert_eq!((extent.width, extent.height), (100, 64));
    }

    #[test]
    fn defined_extent_is_used_verbatim() {
        let caps = caps((800, 600), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn srgb_bgra_is_preferred() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn format_falls_back_to_first() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_respects_maximum() {
        let mut caps = caps((1, 1), (1, 1), (1, 1));
        caps.min_image_count = 2;
        caps.max_image_count = 0;
        assert_eq!(image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(image_count(&caps), 2);
    }

    #[test]
    fn sharing_mode_follows_families() {
        let (mode, families) = sharing_mode(QueueFamilyIndices { graphics: 0, present: 0 });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(families.is_empty());

        let (mode, families) = sharing_mode(QueueFamilyIndices { graphics: 0, present: 2 });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(families, vec![0, 2]);
    }

    #[test]
    fn framebuffer_failure_releases_views() {
        let destroyed_views = RefCell::new(Vec::new());
        let destroyed_framebuffers = RefCell::new(Vec::new());

        let result: std::result::Result<(Vec<u32>, Vec<u32>), &str> = build_image_targets(
            &[1u32, 2, 3],
            |image| Ok(image * 10),
            |view| destroyed_views.borrow_mut().push(view),
            |views| {
                create_each(
                    views.iter().copied(),
                    |view| if view == 30 { Err("framebuffer") } else { Ok(view + 1) },
                    |fb| destroyed_framebuffers.borrow_mut().push(fb),
                )
            },
        );

        assert_eq!(result, Err("framebuffer"));
        assert_eq!(*destroyed_framebuffers.borrow(), vec![21, 11]);
        assert_eq!(*destroyed_views.borrow(), vec![30, 20, 10]);
    }

    #[test]
    fn view_failure_releases_earlier_views() {
        let destroyed_views = RefCell::new(Vec::new());
        let mut framebuffers_called = false;

        let result: std::result::Result<(Vec<u32>, Vec<u32>), &str> = build_image_targets(
            &[1u32, 2, 3],
            |image| if image == 2 { Err("view") } else { Ok(image) },
            |view| destroyed_views.borrow_mut().push(view),
            |_| {
                framebuffers_called = true;
                Ok(Vec::new())
            },
        );

        assert_eq!(result, Err("view"));
        assert!(!framebuffers_called);
        assert_eq!(*destroyed_views.borrow(), vec![1]);
    }

    #[test]
    fn targets_are_kept_on_success() {
        let destroyed = RefCell::new(Vec::<u32>::new());
        let (views, framebuffers) = build_image_targets(
            &[1u32, 2],
            |image| Ok::<_, ()>(image + 100),
            |view| destroyed.borrow_mut().push(view),
            |views| Ok(views.iter().map(|v| v * 2).collect()),
        )
        .unwrap();

        assert_eq!(views, vec![101, 102]);
        assert_eq!(framebuffers, vec![202, 204]);
        assert!(destroyed.borrow().is_empty());
    }
}
