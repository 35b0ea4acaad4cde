// Context - the Vulkan instance and what it needs before it can exist
//
// Responsibilities:
// - Probe the host for validation layers and presentation extensions
// - Create the instance
// - Attach the debug sink (best effort) when validation is on

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};

use super::debug::DebugSink;
use super::error::{RenderError, Result};

/// Layers that must all be present when validation is requested
pub const VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

pub struct ContextConfig<'a> {
    pub app_name: &'a str,
    pub engine_name: &'a str,
    pub validate: bool,
    pub display_handle: RawDisplayHandle,
}

/// Return the first requested name that the host doesn't list
pub fn first_missing<'a>(requested: &[&'a CStr], available: &[String]) -> Option<&'a CStr> {
    requested.iter().copied().find(|name| {
        let name = name.to_string_lossy();
        !available.iter().any(|a| *a == name)
    })
}

/// Layers the host has installed
pub fn available_layers(entry: &Entry) -> Result<Vec<String>> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .map_err(RenderError::ContextCreationFailed)?;

    Ok(layers
        .iter()
        .map(|props| {
            // Safety: the driver fills layer_name with a nul-terminated string
            unsafe { CStr::from_ptr(props.layer_name.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        })
        .collect())
}

/// Instance extensions the host supports
pub fn available_extensions(entry: &Entry) -> Result<Vec<String>> {
    let extensions = entry
        .enumerate_instance_extension_properties(None)
        .map_err(RenderError::ContextCreationFailed)?;

    Ok(extensions
        .iter()
        .map(|props| {
            unsafe { CStr::from_ptr(props.extension_name.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        })
        .collect())
}

/// Presentation extensions for this platform, plus debug utils when validating
pub fn required_extensions(
    display_handle: RawDisplayHandle,
    validate: bool,
) -> Result<Vec<&'static CStr>> {
    let platform = ash_window::enumerate_required_extensions(display_handle)
        .map_err(RenderError::ContextCreationFailed)?;

    let mut extensions: Vec<&'static CStr> = platform
        .iter()
        // Safety: ash-window hands out pointers to static extension name constants
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
        .collect();

    if validate {
        extensions.push(DebugUtils::name());
    }

    Ok(extensions)
}

/// Vulkan instance wrapper with automatic cleanup
pub struct Context {
    debug_sink: Option<DebugSink>,
    instance: ash::Instance,
    entry: Entry,
}

impl Context {
    pub fn new(config: &ContextConfig<'_>) -> Result<Self> {
        log::info!(target: "vulkan", "Creating Vulkan context: {}", config.app_name);

        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::LoaderUnavailable(e.to_string()))?;

        if config.validate {
            let layers = available_layers(&entry)?;
            if let Some(missing) = first_missing(VALIDATION_LAYERS, &layers) {
                log::error!(target: "vulkan", "Validation layers not supported!");
                return Err(RenderError::UnsupportedValidationLayer(
                    missing.to_string_lossy().into_owned(),
                ));
            }
        }

        let extensions = required_extensions(config.display_handle, config.validate)?;
        if let Some(missing) = first_missing(&extensions, &available_extensions(&entry)?) {
            return Err(RenderError::MissingExtension(
                missing.to_string_lossy().into_owned(),
            ));
        }

        let app_name = CString::new(config.app_name).unwrap_or_default();
        let engine_name = CString::new(config.engine_name).unwrap_or_default();

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let extension_names: Vec<_> = extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_names: Vec<_> = if config.validate {
            VALIDATION_LAYERS.iter().map(|layer| layer.as_ptr()).collect()
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(RenderError::ContextCreationFailed)?;

        // Diagnostics are best effort; the context is usable without them
        let debug_sink = if config.validate {
            match unsafe { DebugSink::attach(&entry, &instance) } {
                Ok(sink) => Some(sink),
                Err(e) => {
                    log::warn!(target: "vulkan", "Failed to setup debug messenger: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            debug_sink,
            instance,
            entry,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if let Some(mut sink) = self.debug_sink.take() {
                sink.detach();
            }
            self.instance.destroy_instance(None);
        }
        log::debug!(target: "vulkan", "Vulkan context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_layers_present() {
        let available = vec![
            "VK_LAYER_MESA_device_select".to_string(),
            "VK_LAYER_KHRONOS_validation".to_string(),
        ];
        assert_eq!(first_missing(VALIDATION_LAYERS, &available), None);
    }

    #[test]
    fn reports_the_absent_layer() {
        let available = vec!["VK_LAYER_MESA_device_select".to_string()];
        assert_eq!(
            first_missing(VALIDATION_LAYERS, &available),
            Some(c"VK_LAYER_KHRONOS_validation")
        );
    }

    #[test]
    fn partial_name_match_is_not_enough() {
        let available = vec!["VK_LAYER_KHRONOS_validation_extra".to_string()];
        assert!(first_missing(VALIDATION_LAYERS, &available).is_some());
    }

    #[test]
    fn nothing_requested_nothing_missing() {
        assert_eq!(first_missing(&[], &[]), None);
    }
}
