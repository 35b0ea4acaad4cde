// Minimal Vulkan renderer core
//
// backend   - device, swapchain, pipeline and the per-frame protocol
// renderer  - composes the backend into something that draws a triangle
// storage   - shader bytecode on disk, addressed by content id
// config    - config.toml

pub mod backend;
pub mod config;
pub mod renderer;
pub mod storage;
