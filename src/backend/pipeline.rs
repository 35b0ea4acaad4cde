// Graphics pipeline creation and management
//
// The draw path is one hardcoded pipeline: no vertex input (the triangle is
// generated in the vertex shader), dynamic viewport/scissor, no descriptors.

use ash::vk;
use std::sync::Arc;

use super::error::{RenderError, Result};
use super::guard::{create_each, HandleGuard};
use super::shader::{create_shader_module, ShaderInfo, ENTRY_POINT};
use super::Device;

/// Create a render pass with a single color attachment that ends up presentable
///
/// # Safety
/// `device` must be a valid logical device.
pub unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The image may still be read by the presentation engine when acquire
    // returns; hold the first color write until the acquire semaphore fired.
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    device
        .create_render_pass(&render_pass_info, None)
        .map_err(RenderError::swapchain("render pass"))
}

/// Render pass plus the color format it was built for
///
/// Survives a swapchain rebuild when the surface format does not change.
pub struct RenderPass {
    pub handle: vk::RenderPass,
    pub format: vk::Format,
    device: Arc<Device>,
}

impl RenderPass {
    pub fn new(device: &Arc<Device>, format: vk::Format) -> Result<Self> {
        let handle = unsafe { create_render_pass(&device.device, format)? };
        Ok(Self {
            handle,
            format,
            device: Arc::clone(device),
        })
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.handle, None) };
    }
}

/// Create one framebuffer per swapchain image view
///
/// # Safety
/// All handles must be valid.
pub unsafe fn create_framebuffers(
    device: &ash::Device,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    create_each(
        image_views.iter().copied(),
        |image_view| {
            let attachments = &[image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            device
                .create_framebuffer(&framebuffer_info, None)
                .map_err(RenderError::swapchain("framebuffer"))
        },
        |framebuffer| device.destroy_framebuffer(framebuffer, None),
    )
}

/// Pipeline + layout, destroyed together when dropped
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<Device>,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
        log::debug!(target: "vulkan", "Graphics pipeline destroyed");
    }
}

/// Build the fixed triangle pipeline against `render_pass`
pub fn create_graphics_pipeline(
    device: &Arc<Device>,
    render_pass: vk::RenderPass,
    shaders: &[ShaderInfo<'_>],
) -> Result<Pipeline> {
    let vk_device = &device.device;

    // Modules are only needed until the pipeline is linked; the guard is
    // never kept, so they go away on success and on failure alike.
    let mut modules = HandleGuard::new(|module| unsafe { vk_device.destroy_shader_module(module, None) });
    let mut shader_stages = Vec::with_capacity(shaders.len());
    for shader in shaders {
        let module = modules.push(unsafe { create_shader_module(vk_device, shader.bytecode)? });
        shader_stages.push(
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(shader.kind.stage_flags())
                .module(module)
                .name(ENTRY_POINT)
                .build(),
        );
    }

    // No vertex buffers at all
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Counts only, the actual rectangles are set while recording
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(color_blend_attachments)
        .blend_constants([0.0; 4]);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    // Zero external parameters: no descriptor sets, no push constants
    let layout_info = vk::PipelineLayoutCreateInfo::builder();

    let mut layouts = HandleGuard::new(|layout| unsafe { vk_device.destroy_pipeline_layout(layout, None) });
    let pipeline_layout = layouts.push(unsafe {
        vk_device
            .create_pipeline_layout(&layout_info, None)
            .map_err(RenderError::pipeline("pipeline layout"))?
    });

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        vk_device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, result)| RenderError::pipeline("graphics pipeline")(result))?
    };

    layouts.keep();
    drop(modules);

    log::info!(target: "vulkan", "Created graphics pipeline with {} stages", shaders.len());

    Ok(Pipeline {
        pipeline: pipelines[0],
        layout: pipeline_layout,
        device: Arc::clone(device),
    })
}
