// Frame driver - the per-frame protocol
//
// wait -> acquire -> reset fence -> record -> submit -> present -> advance
//
// The protocol lives in `FrameDriver` and talks to the GPU only through
// `FrameBackend`, so the ordering and slot bookkeeping can be exercised
// without a device.

use ash::vk;
use std::time::Duration;

use super::error::{RenderError, Result};
use super::pipeline::Pipeline;
use super::swapchain::SwapChain;
use super::sync::FrameSync;
use super::Device;

/// GPU side of one frame, addressed by frame slot
pub trait FrameBackend {
    fn wait_for_fence(&mut self, slot: usize, timeout: u64) -> Result<()>;
    /// Returns the image index and whether the swapchain is suboptimal
    fn acquire_image(&mut self, slot: usize, timeout: u64) -> Result<(u32, bool)>;
    fn reset_fence(&mut self, slot: usize) -> Result<()>;
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    /// Returns whether the swapchain is suboptimal
    fn present(&mut self, slot: usize, image_index: u32) -> Result<bool>;
    /// Give the slot back after its fence was reset but nothing got submitted:
    /// consume the acquire semaphore and re-signal the fence.
    fn release_slot(&mut self, slot: usize) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Presented, but the swapchain no longer matches the surface exactly
    Suboptimal,
    /// Out of date: nothing was presented, the swapchain must be rebuilt
    Stale,
    /// Recording or submission failed after acquire. The image stays owned by
    /// the application until the swapchain is rebuilt.
    Abandoned,
    Failed,
}

impl FrameOutcome {
    pub fn needs_rebuild(self) -> bool {
        matches!(self, Self::Suboptimal | Self::Stale | Self::Abandoned)
    }
}

#[derive(Debug)]
pub struct FrameDriver {
    current_frame: usize,
    frames_in_flight: usize,
    timeout: u64,
}

impl FrameDriver {
    pub fn new(frames_in_flight: usize, timeout: Duration) -> Self {
        Self {
            current_frame: 0,
            frames_in_flight: frames_in_flight.max(1),
            timeout: u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Run one frame. Errors are logged, never returned, and the slot
    /// advances no matter what happened.
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> FrameOutcome {
        let slot = self.current_frame;

        let outcome = match self.run(backend, slot) {
            Ok(outcome) => outcome,
            Err(e) if e.is_stale_surface() => {
                log::debug!(target: "renderer", "Frame {}: {}", slot, e);
                FrameOutcome::Stale
            }
            Err(e) => {
                log::error!(target: "renderer", "Frame {}: {}", slot, e);
                FrameOutcome::Failed
            }
        };

        self.current_frame = (slot + 1) % self.frames_in_flight;
        outcome
    }

    fn run<B: FrameBackend>(&self, backend: &mut B, slot: usize) -> Result<FrameOutcome> {
        backend.wait_for_fence(slot, self.timeout)?;

        // Reset only once an image is ours; a failed acquire leaves the fence
        // signaled so the next wait on this slot returns.
        let (image_index, acquire_suboptimal) = backend.acquire_image(slot, self.timeout)?;
        backend.reset_fence(slot)?;

        let submitted = backend
            .record(slot, image_index)
            .and_then(|()| backend.submit(slot));
        if let Err(e) = submitted {
            log::error!(target: "renderer", "Frame {}: {}", slot, e);
            if let Err(release) = backend.release_slot(slot) {
                log::error!(target: "renderer", "Couldn't release frame slot {}: {}", slot, release);
            }
            return Ok(FrameOutcome::Abandoned);
        }

        let present_suboptimal = backend.present(slot, image_index)?;
        if acquire_suboptimal || present_suboptimal {
            Ok(FrameOutcome::Suboptimal)
        } else {
            Ok(FrameOutcome::Presented)
        }
    }
}

/// Vulkan backend for one frame of the triangle pass
pub struct VulkanFrame<'a> {
    pub device: &'a Device,
    pub swapchain: &'a SwapChain,
    pub pipeline: &'a Pipeline,
    pub clear_color: [f32; 4],
}

impl VulkanFrame<'_> {
    fn command_buffer(&self, slot: usize) -> Result<vk::CommandBuffer> {
        self.device
            .command_buffers
            .get(slot)
            .copied()
            .ok_or(RenderError::frame("command buffer")(vk::Result::ERROR_UNKNOWN))
    }

    fn sync(&self, slot: usize) -> Result<&FrameSync> {
        self.swapchain
            .frames
            .get(slot)
            .ok_or(RenderError::frame("frame sync")(vk::Result::ERROR_UNKNOWN))
    }
}

impl FrameBackend for VulkanFrame<'_> {
    fn wait_for_fence(&mut self, slot: usize, timeout: u64) -> Result<()> {
        let fences = [self.sync(slot)?.in_flight_fence];
        unsafe { self.device.device.wait_for_fences(&fences, true, timeout) }
            .map_err(RenderError::frame("wait for fence"))
    }

    fn acquire_image(&mut self, slot: usize, timeout: u64) -> Result<(u32, bool)> {
        let semaphore = self.sync(slot)?.image_available;
        self.swapchain.acquire_next_image(timeout, semaphore)
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        let fences = [self.sync(slot)?.in_flight_fence];
        unsafe { self.device.device.reset_fences(&fences) }.map_err(RenderError::frame("reset fence"))
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let device = &self.device.device;
        let command_buffer = self.command_buffer(slot)?;
        // The framebuffer follows the acquired image, not the frame slot
        let framebuffer = self
            .swapchain
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or(RenderError::frame("framebuffer")(vk::Result::ERROR_OUT_OF_DATE_KHR))?;
        let extent = self.swapchain.extent;

        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(RenderError::frame("reset command buffer"))?;

            let begin_info = vk::CommandBufferBeginInfo::builder();
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(RenderError::frame("begin command buffer"))?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            }];
            let render_area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.swapchain.render_pass())
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[render_area]);

            device.cmd_draw(command_buffer, 3, 1, 0, 0);

            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .map_err(RenderError::frame("end command buffer"))
        }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let sync = *self.sync(slot)?;
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffer(slot)?];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue.handle, &[submit_info], sync.in_flight_fence)
        }
        .map_err(RenderError::frame("submit"))
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<bool> {
        let wait_semaphores = [self.sync(slot)?.render_finished];
        self.swapchain
            .present(self.device.present_queue.handle, image_index, &wait_semaphores)
    }

    fn release_slot(&mut self, slot: usize) -> Result<()> {
        let sync = *self.sync(slot)?;
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        // Empty batch: waits on the acquire, signals the fence
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue.handle, &[submit_info], sync.in_flight_fence)
        }
        .map_err(RenderError::frame("release slot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Release(usize),
    }

    #[derive(Default)]
    struct MockBackend {
        calls: Vec<Call>,
        next_image: u32,
        image_count: u32,
        wait_result: Option<vk::Result>,
        acquire_result: Option<vk::Result>,
        record_result: Option<vk::Result>,
        submit_result: Option<vk::Result>,
        present_result: Option<vk::Result>,
        present_suboptimal: bool,
    }

    impl MockBackend {
        fn new(image_count: u32) -> Self {
            Self {
                image_count,
                ..Default::default()
            }
        }

        fn fail(result: Option<vk::Result>, step: &'static str) -> Result<()> {
            match result {
                Some(result) => Err(RenderError::frame(step)(result)),
                None => Ok(()),
            }
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_fence(&mut self, slot: usize, _timeout: u64) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            Self::fail(self.wait_result, "wait for fence")
        }

        fn acquire_image(&mut self, slot: usize, _timeout: u64) -> Result<(u32, bool)> {
            self.calls.push(Call::Acquire(slot));
            Self::fail(self.acquire_result, "acquire")?;
            let image = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok((image, false))
        }

        fn reset_fence(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Record(slot, image_index));
            Self::fail(self.record_result, "record")
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Submit(slot));
            Self::fail(self.submit_result, "submit")
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<bool> {
            self.calls.push(Call::Present(slot, image_index));
            Self::fail(self.present_result, "present")?;
            Ok(self.present_suboptimal)
        }

        fn release_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Release(slot));
            Ok(())
        }
    }

    fn driver(frames: usize) -> FrameDriver {
        FrameDriver::new(frames, Duration::from_millis(1000))
    }

    #[test]
    fn protocol_runs_in_order() {
        let mut driver = driver(3);
        let mut backend = MockBackend::new(2);

        assert_eq!(driver.draw_frame(&mut backend), FrameOutcome::Presented);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn slot_advances_modulo_frames_in_flight() {
        for frames in 1..=4 {
            let mut driver = driver(frames);
            let mut backend = MockBackend::new(3);
            for i in 0..10 {
                assert_eq!(driver.current_frame(), i % frames);
                driver.draw_frame(&mut backend);
                assert!(driver.current_frame() < frames);
            }
        }
    }

    #[test]
    fn slot_advances_after_acquire_failure() {
        let mut driver = driver(3);
        let mut backend = MockBackend::new(3);
        backend.acquire_result = Some(vk::Result::ERROR_OUT_OF_DATE_KHR);

        assert_eq!(driver.draw_frame(&mut backend), FrameOutcome::Stale);
        assert_eq!(driver.current_frame(), 1);
        // Fence untouched, nothing recorded
        assert_eq!(backend.calls, vec![Call::Wait(0), Call::Acquire(0)]);
    }

    #[test]
    fn slot_advances_after_present_failure() {
        let mut driver = driver(2);
        let mut backend = MockBackend::new(3);
        backend.present_result = Some(vk::Result::ERROR_DEVICE_LOST);

        assert_eq!(driver.draw_frame(&mut backend), FrameOutcome::Failed);
        assert_eq!(driver.draw_frame(&mut backend), FrameOutcome::Failed);
        assert_eq!(driver.current_frame(), 0);
    }

    #[test]
    fn suboptimal_present_requests_rebuild() {
        let mut driver = driver(2);
        let mut backend = MockBackend::new(3);
        backend.present_suboptimal = true;

        let outcome = driver.draw_frame(&mut backend);
        assert_eq!(outcome, FrameOutcome::Suboptimal);
        assert!(outcome.needs_rebuild());
        assert!(!FrameOutcome::Failed.needs_rebuild());
    }

    #[test]
    fn record_failure_releases_slot() {
        let mut driver = driver(2);
        let mut backend = MockBackend::new(3);
        backend.record_result = Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let outcome = driver.draw_frame(&mut backend);
        assert_eq!(outcome, FrameOutcome::Abandoned);
        assert!(outcome.needs_rebuild());
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Release(0),
            ]
        );
        assert_eq!(driver.current_frame(), 1);
    }

    #[test]
    fn submit_failure_releases_slot_and_requests_rebuild() {
        let mut driver = driver(2);
        let mut backend = MockBackend::new(3);
        backend.submit_result = Some(vk::Result::ERROR_DEVICE_LOST);

        let outcome = driver.draw_frame(&mut backend);
        assert_eq!(outcome, FrameOutcome::Abandoned);
        assert!(outcome.needs_rebuild());
        assert_eq!(backend.calls.last(), Some(&Call::Release(0)));
        assert!(!backend.calls.iter().any(|c| matches!(c, Call::Present(..))));
    }

    #[test]
    fn fence_timeout_skips_frame_and_advances() {
        let mut driver = driver(3);
        let mut backend = MockBackend::new(3);
        backend.wait_result = Some(vk::Result::TIMEOUT);

        let outcome = driver.draw_frame(&mut backend);
        assert_eq!(outcome, FrameOutcome::Failed);
        assert!(!outcome.needs_rebuild());
        assert_eq!(backend.calls, vec![Call::Wait(0)]);
        assert_eq!(driver.current_frame(), 1);
    }

    #[test]
    fn record_uses_acquired_image_not_slot() {
        let mut driver = driver(3);
        let mut backend = MockBackend::new(2);
        for _ in 0..3 {
            driver.draw_frame(&mut backend);
        }
        let recorded: Vec<_> = backend
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Record(slot, image) => Some((*slot, *image)),
                _ => None,
            })
            .collect();
        assert_eq!(recorded, vec![(0, 0), (1, 1), (2, 0)]);
    }

    #[test]
    fn zero_frames_is_clamped() {
        let driver = driver(0);
        assert_eq!(driver.frames_in_flight(), 1);
    }
}
