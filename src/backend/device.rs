// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Context (instance) + presentation surface
// - Physical device and queue family selection
// - Logical device + queue retrieval
// - Command pool with one command buffer per frame in flight

use ash::extensions::khr::{Surface, Swapchain};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use super::context::{Context, ContextConfig};
use super::error::{RenderError, Result};
use super::guard::HandleGuard;
use super::selector::{pick_physical_device, QueueFamilyIndices};

#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family_index: u32,
}

pub struct DeviceConfig<'a> {
    pub app_name: &'a str,
    pub engine_name: &'a str,
    pub validate: bool,
    pub max_frames_in_flight: usize,
}

/// Vulkan device wrapper with automatic cleanup
pub struct Device {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub command_pool: vk::CommandPool,

    pub graphics_queue: Queue,
    pub present_queue: Queue,

    pub swapchain_loader: Swapchain,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: Surface,

    // Destroyed last, after everything created from it
    _context: Context,
}

impl Device {
    /// Create the whole device stack for `window`
    pub fn new<W>(config: &DeviceConfig<'_>, window: &W) -> Result<Arc<Self>>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let context = Context::new(&ContextConfig {
            app_name: config.app_name,
            engine_name: config.engine_name,
            validate: config.validate,
            display_handle: window.raw_display_handle(),
        })?;

        let surface_loader = Surface::new(context.entry(), context.instance());
        let surface = unsafe {
            ash_window::create_surface(
                context.entry(),
                context.instance(),
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(RenderError::SurfaceCreationFailed)?;

        // From here on, a failure must not leak the surface
        let mut surfaces = HandleGuard::new(|s| unsafe { surface_loader.destroy_surface(s, None) });
        surfaces.push(surface);

        let (physical_device, queues) =
            unsafe { pick_physical_device(context.instance(), &surface_loader, surface)? };

        let device = unsafe { create_logical_device(context.instance(), physical_device, queues)? };

        let built = unsafe { create_commands(&device, queues.command_family(), config.max_frames_in_flight) };
        let (command_pool, command_buffers) = match built {
            Ok(commands) => commands,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let graphics_queue = Queue {
            handle: unsafe { device.get_device_queue(queues.graphics, 0) },
            family_index: queues.graphics,
        };
        let present_queue = Queue {
            handle: unsafe { device.get_device_queue(queues.present, 0) },
            family_index: queues.present,
        };

        let swapchain_loader = Swapchain::new(context.instance(), &device);

        surfaces.keep();

        log::info!(
            target: "vulkan",
            "Logical device ready with {} command buffers",
            command_buffers.len()
        );

        Ok(Arc::new(Self {
            command_buffers,
            command_pool,
            graphics_queue,
            present_queue,
            swapchain_loader,
            device,
            physical_device,
            surface,
            surface_loader,
            _context: context,
        }))
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics: self.graphics_queue.family_index,
            present: self.present_queue.family_index,
        }
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(RenderError::frame("wait idle"))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!(target: "vulkan", "Destroying Vulkan device...");

        // Teardown is total: a failed wait is reported, not fatal
        if let Err(e) = self.wait_idle() {
            log::error!(target: "vulkan", "Couldn't wait for device: {}", e);
        }

        unsafe {
            // Also frees the command buffers
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        // context drops here: debug sink, then instance
    }
}

/// One queue per distinct family, swapchain extension enabled
///
/// # Safety
/// `physical_device` must belong to `instance`.
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queues: QueueFamilyIndices,
) -> Result<ash::Device> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<_> = queues
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extensions = [Swapchain::name().as_ptr()];

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions);

    instance
        .create_device(physical_device, &create_info, None)
        .map_err(RenderError::device("vkCreateDevice"))
}

/// Resettable command pool on `family` plus `count` primary buffers
///
/// # Safety
/// `device` must be a valid logical device.
unsafe fn create_commands(
    device: &ash::Device,
    family: u32,
    count: usize,
) -> Result<(vk::CommandPool, Vec<vk::CommandBuffer>)> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(family)
        // RESET: buffers are re-recorded individually every frame
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    let command_pool = device
        .create_command_pool(&pool_info, None)
        .map_err(RenderError::device("command pool"))?;

    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);

    match device.allocate_command_buffers(&alloc_info) {
        Ok(command_buffers) => Ok((command_pool, command_buffers)),
        Err(result) => {
            device.destroy_command_pool(command_pool, None);
            Err(RenderError::device("command buffers")(result))
        }
    }
}
