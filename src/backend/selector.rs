// Device selection - which GPU, which queue families
//
// Selection runs on plain descriptors so the policy is the same whether the
// data came from the driver or from a test.

use ash::extensions::khr::Surface;
use ash::vk;
use std::ffi::CStr;

use super::error::{RenderError, Result};

/// Smallest max 2D image dimension we accept
pub const MIN_IMAGE_DIMENSION_2D: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub api_version: u32,
    pub max_image_dimension_2d: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub geometry_shader: bool,
    pub queue_families: Vec<QueueFamilyInfo>,
}

impl AdapterInfo {
    pub fn meets_requirements(&self) -> bool {
        vk::api_version_major(self.api_version) >= 1
            && self.max_image_dimension_2d >= MIN_IMAGE_DIMENSION_2D
            && self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            && self.geometry_shader
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    /// Family for the command pool. Frame command buffers are submitted to
    /// the graphics queue, and a pool's buffers may only go to its own family.
    pub fn command_family(&self) -> u32 {
        self.graphics
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub adapter: usize,
    pub queues: QueueFamilyIndices,
}

/// Pick graphics/present families, preferring one family that does both
pub fn select_queue_families(families: &[QueueFamilyInfo]) -> Option<QueueFamilyIndices> {
    let mut first_graphics = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if family.graphics && first_graphics.is_none() {
            first_graphics = Some(index);
        }

        if family.graphics && family.present {
            return Some(QueueFamilyIndices {
                graphics: index,
                present: index,
            });
        }
    }

    let first_present = families
        .iter()
        .position(|family| family.present)
        .map(|index| index as u32);

    match (first_graphics, first_present) {
        (Some(graphics), Some(present)) => Some(QueueFamilyIndices { graphics, present }),
        _ => None,
    }
}

/// First adapter, in enumeration order, passing every requirement
pub fn select_adapter(adapters: &[AdapterInfo]) -> Result<Selection> {
    let mut capable_adapter_seen = false;

    for (index, adapter) in adapters.iter().enumerate() {
        if !adapter.meets_requirements() {
            log::warn!(
                target: "vulkan",
                "Physical device {} doesn't support required parameters",
                adapter.name
            );
            continue;
        }
        capable_adapter_seen = true;

        match select_queue_families(&adapter.queue_families) {
            Some(queues) => return Ok(Selection { adapter: index, queues }),
            None => log::warn!(
                target: "vulkan",
                "Could not find queue families with required properties on {}",
                adapter.name
            ),
        }
    }

    if capable_adapter_seen {
        Err(RenderError::NoSuitableQueueFamilies)
    } else {
        Err(RenderError::NoSuitableDevice)
    }
}

/// Describe one physical device, including present support against `surface`
///
/// # Safety
/// All handles must be valid.
pub unsafe fn query_adapter(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> AdapterInfo {
    let props = instance.get_physical_device_properties(physical_device);
    let features = instance.get_physical_device_features(physical_device);

    let queue_families = instance
        .get_physical_device_queue_family_properties(physical_device)
        .iter()
        .enumerate()
        .map(|(index, family)| QueueFamilyInfo {
            graphics: family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            // A failed query counts as "no"
            present: surface_loader
                .get_physical_device_surface_support(physical_device, index as u32, surface)
                .unwrap_or(false),
        })
        .collect();

    AdapterInfo {
        name: CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned(),
        api_version: props.api_version,
        max_image_dimension_2d: props.limits.max_image_dimension2_d,
        device_type: props.device_type,
        geometry_shader: features.geometry_shader == vk::TRUE,
        queue_families,
    }
}

/// Enumerate every adapter and run the selection policy over them
///
/// # Safety
/// All handles must be valid.
pub unsafe fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = instance
        .enumerate_physical_devices()
        .map_err(|_| RenderError::NoSuitableDevice)?;

    let adapters: Vec<AdapterInfo> = devices
        .iter()
        .map(|&device| query_adapter(instance, surface_loader, surface, device))
        .collect();

    let selection = select_adapter(&adapters)?;
    let adapter = &adapters[selection.adapter];

    log::info!(
        target: "vulkan",
        "Selected GPU: {} (API {}.{}.{}), graphics family {}, present family {}",
        adapter.name,
        vk::api_version_major(adapter.api_version),
        vk::api_version_minor(adapter.api_version),
        vk::api_version_patch(adapter.api_version),
        selection.queues.graphics,
        selection.queues.present,
    );

    Ok((devices[selection.adapter], selection.queues))
}
