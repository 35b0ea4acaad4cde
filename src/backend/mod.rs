// Backend module - Vulkan abstraction layer
//
// Design: thin wrapper around ash; every owned handle is released by a Drop
// impl or a HandleGuard, in reverse creation order.

pub mod context;
pub mod debug;
pub mod device;
pub mod error;
pub mod frame;
pub mod guard;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::{Device, DeviceConfig};
pub use error::{RenderError, Result};
pub use frame::{FrameDriver, FrameOutcome};
pub use pipeline::Pipeline;
pub use shader::{ShaderInfo, ShaderKind};
pub use swapchain::{SwapChain, SwapChainConfig};
