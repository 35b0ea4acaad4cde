// Synchronization primitives
//
// One slot per frame in flight: two semaphores order acquire -> submit ->
// present on the GPU, one fence hands the slot back to the CPU.

use ash::vk;

use super::error::{RenderError, Result};
use super::guard::{create_each, HandleGuard};

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    /// # Safety
    /// `device` must be a valid logical device.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the very first wait on the slot returns at once
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let mut semaphores = HandleGuard::new(|s| device.destroy_semaphore(s, None));
        let image_available = semaphores.push(
            device
                .create_semaphore(&semaphore_info, None)
                .map_err(RenderError::swapchain("image available semaphore"))?,
        );
        let render_finished = semaphores.push(
            device
                .create_semaphore(&semaphore_info, None)
                .map_err(RenderError::swapchain("render finished semaphore"))?,
        );
        let in_flight_fence = device
            .create_fence(&fence_info, None)
            .map_err(RenderError::swapchain("in flight fence"))?;

        semaphores.keep();

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
        })
    }

    /// # Safety
    /// None of the objects may still be in use by the GPU.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight_fence, None);
    }
}

/// Build `count` sync slots, releasing all of them if any one fails
///
/// # Safety
/// `device` must be a valid logical device.
pub unsafe fn create_frame_syncs(device: &ash::Device, count: usize) -> Result<Vec<FrameSync>> {
    create_each(
        0..count,
        |_| FrameSync::new(device),
        |sync| sync.destroy(device),
    )
}
