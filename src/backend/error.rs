// Render errors - what can go wrong between the driver and the screen
//
// Capability errors are detected before anything is created, creation errors
// name the step that failed, per-frame errors are only ever logged.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to load the Vulkan library: {0}")]
    LoaderUnavailable(String),

    #[error("Validation layer {0} is not available on this host")]
    UnsupportedValidationLayer(String),

    #[error("Required instance extension {0} is not available")]
    MissingExtension(String),

    #[error("Couldn't create Vulkan instance: {}", result_string(*.0))]
    ContextCreationFailed(vk::Result),

    #[error("Couldn't attach debug messenger: {}", result_string(*.0))]
    DebugSinkUnavailable(vk::Result),

    #[error("Couldn't create presentation surface: {}", result_string(*.0))]
    SurfaceCreationFailed(vk::Result),

    #[error("No physical device satisfies the renderer requirements")]
    NoSuitableDevice,

    #[error("Could not find queue families with graphics and present support")]
    NoSuitableQueueFamilies,

    #[error("Couldn't create logical device ({step}): {}", result_string(*.result))]
    DeviceCreationFailed {
        step: &'static str,
        result: vk::Result,
    },

    #[error("Couldn't create swap chain ({step}): {}", result_string(*.result))]
    SwapChainCreationFailed {
        step: &'static str,
        result: vk::Result,
    },

    #[error("Couldn't create graphics pipeline ({step}): {}", result_string(*.result))]
    PipelineCreationFailed {
        step: &'static str,
        result: vk::Result,
    },

    #[error("Shader resource {0} not found")]
    ShaderNotFound(u64),

    #[error("Invalid SPIR-V bytecode: {0}")]
    InvalidShader(String),

    #[error("Frame {step} failed: {}", result_string(*.result))]
    Frame {
        step: &'static str,
        result: vk::Result,
    },
}

pub type Result<T> = std::result::Result<T, RenderError>;

impl RenderError {
    /// Wrap a raw result as a swap chain build failure at `step`
    pub fn swapchain(step: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::SwapChainCreationFailed { step, result }
    }

    pub fn pipeline(step: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::PipelineCreationFailed { step, result }
    }

    pub fn device(step: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::DeviceCreationFailed { step, result }
    }

    pub fn frame(step: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::Frame { step, result }
    }

    /// The raw driver result behind this error, if there is one
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::ContextCreationFailed(result)
            | Self::DebugSinkUnavailable(result)
            | Self::SurfaceCreationFailed(result) => Some(*result),
            Self::DeviceCreationFailed { result, .. }
            | Self::SwapChainCreationFailed { result, .. }
            | Self::PipelineCreationFailed { result, .. }
            | Self::Frame { result, .. } => Some(*result),
            _ => None,
        }
    }

    /// True for OUT_OF_DATE / SUBOPTIMAL: the surface changed under us
    pub fn is_stale_surface(&self) -> bool {
        matches!(
            self.vk_result(),
            Some(vk::Result::ERROR_OUT_OF_DATE_KHR) | Some(vk::Result::SUBOPTIMAL_KHR)
        )
    }
}

/// Human readable text for a driver result code
pub fn result_string(result: vk::Result) -> &'static str {
    match result {
        vk::Result::SUCCESS => "Success",
        vk::Result::NOT_READY => "Not ready",
        vk::Result::TIMEOUT => "Timeout",
        vk::Result::EVENT_SET => "Event set",
        vk::Result::EVENT_RESET => "Event reset",
        vk::Result::INCOMPLETE => "Incomplete",
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => "Error out of host memory",
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => "Error out of device memory",
        vk::Result::ERROR_INITIALIZATION_FAILED => "Error initialization failed",
        vk::Result::ERROR_DEVICE_LOST => "Error device lost",
        vk::Result::ERROR_MEMORY_MAP_FAILED => "Error memory map failed",
        vk::Result::ERROR_LAYER_NOT_PRESENT => "Error layer not present",
        vk::Result::ERROR_EXTENSION_NOT_PRESENT => "Error extension not present",
        vk::Result::ERROR_FEATURE_NOT_PRESENT => "Error feature not present",
        vk::Result::ERROR_INCOMPATIBLE_DRIVER => "Error incompatible driver",
        vk::Result::ERROR_TOO_MANY_OBJECTS => "Error too many objects",
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED => "Error format not supported",
        vk::Result::ERROR_FRAGMENTED_POOL => "Error fragmented pool",
        vk::Result::ERROR_UNKNOWN => "Error unknown",
        vk::Result::ERROR_OUT_OF_POOL_MEMORY => "Error out of pool memory",
        vk::Result::ERROR_INVALID_EXTERNAL_HANDLE => "Error invalid external handle",
        vk::Result::ERROR_FRAGMENTATION => "Error fragmentation",
        vk::Result::ERROR_INVALID_OPAQUE_CAPTURE_ADDRESS => {
            "Error invalid opaque capture address"
        }
        vk::Result::ERROR_SURFACE_LOST_KHR => "Error surface lost",
        vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => "Error native window in use",
        vk::Result::SUBOPTIMAL_KHR => "Suboptimal",
        vk::Result::ERROR_OUT_OF_DATE_KHR => "Error out of date",
        vk::Result::ERROR_INCOMPATIBLE_DISPLAY_KHR => "Error incompatible display",
        vk::Result::ERROR_VALIDATION_FAILED_EXT => "Error validation failed",
        vk::Result::ERROR_INVALID_SHADER_NV => "Error invalid shader NV",
        vk::Result::ERROR_INVALID_DRM_FORMAT_MODIFIER_PLANE_LAYOUT_EXT => {
            "Error invalid DRM format modifier plane layout"
        }
        vk::Result::ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT => {
            "Error full screen exclusive mode lost"
        }
        _ => "Unknown result",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_reads_as_stale_surface() {
        let err = RenderError::frame("acquire")(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(err.is_stale_surface());

        let err = RenderError::frame("present")(vk::Result::ERROR_DEVICE_LOST);
        assert!(!err.is_stale_surface());
        assert!(!RenderError::NoSuitableDevice.is_stale_surface());
    }

    #[test]
    fn messages_name_the_failing_step() {
        let err = RenderError::swapchain("framebuffer")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(
            err.to_string(),
            "Couldn't create swap chain (framebuffer): Error out of device memory"
        );
    }

    #[test]
    fn unlisted_results_still_get_text() {
        assert_eq!(result_string(vk::Result::from_raw(-123_456)), "Unknown result");
        assert_eq!(result_string(vk::Result::TIMEOUT), "Timeout");
    }
}
