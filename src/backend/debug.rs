// Debug sink - validation layer messages routed into the log
//
// The messenger belongs to exactly one Context: attached right after the
// instance is created, detached right before the instance is destroyed.

use ash::extensions::ext::DebugUtils;
use ash::vk;
use std::ffi::CStr;

use super::error::{RenderError, Result};

pub struct DebugSink {
    loader: DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugSink {
    /// Register the validation callback with the driver.
    ///
    /// # Safety
    /// `instance` must have been created with the debug utils extension enabled
    /// and must outlive the returned sink.
    pub unsafe fn attach(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = loader
            .create_debug_utils_messenger(&create_info, None)
            .map_err(RenderError::DebugSinkUnavailable)?;

        log::debug!(target: "vulkan", "Debug messenger attached");

        Ok(Self { loader, messenger })
    }

    /// Unregister the callback.
    ///
    /// # Safety
    /// Must be called before the owning instance is destroyed, exactly once.
    pub unsafe fn detach(&mut self) {
        if self.messenger != vk::DebugUtilsMessengerEXT::null() {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
            self.messenger = vk::DebugUtilsMessengerEXT::null();
            log::debug!(target: "vulkan", "Debug messenger detached");
        }
    }
}

/// Log level a validation message of this severity is reported at
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Trace
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }

    let message = CStr::from_ptr((*p_callback_data).p_message);
    log::log!(
        target: "vulkan",
        severity_level(message_severity),
        "{}",
        message.to_string_lossy()
    );

    vk::FALSE
}
