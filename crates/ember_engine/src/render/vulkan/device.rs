//! Physical device selection and logical device creation
//!
//! Every enumerated GPU gets a suitability score; zero means unusable (no
//! geometry-capable queue family, incomplete graphics+present pair, missing
//! device extensions, or no swapchain support for the surface). The highest
//! score wins, with first-enumerated precedence on ties.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Instance};
use std::collections::HashSet;
use std::ffi::CStr;

use crate::render::vulkan::{Surface, VulkanError, VulkanResult};

/// Queue family indices required for rendering and presentation
///
/// Graphics and present may alias the same physical family; a device is
/// usable only when both are present.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueFamilyIndices {
    /// Family supporting graphics commands
    pub graphics: Option<u32>,
    /// Family supporting presentation to the surface
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Whether both required families were found
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Find graphics and present families for a device/surface pair
    pub fn find(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: &Surface,
    ) -> VulkanResult<Self> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut indices = Self::default();
        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;

            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && indices.graphics.is_none() {
                indices.graphics = Some(index);
            }
            if indices.present.is_none() && surface.supports_present(device, index)? {
                indices.present = Some(index);
            }
            if indices.is_complete() {
                break;
            }
        }
        Ok(indices)
    }
}

/// Read-only snapshot of a selected GPU's capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features
    pub features: vk::PhysicalDeviceFeatures,
    /// Memory heap/type table
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Resolved queue family indices
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Enumerate all GPUs and pick the highest-scoring one
    ///
    /// Fails with [`VulkanError::NoSuitableDevice`] when every device scores
    /// zero.
    pub fn select(instance: &Instance, surface: &Surface) -> VulkanResult<Self> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        let mut best: Option<(u32, Self)> = None;
        for device in devices {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };
            let queue_families = QueueFamilyIndices::find(instance, device, surface)?;

            let extensions_supported = Self::check_extension_support(instance, device)?;
            // Swapchain adequacy is only queryable once the swapchain
            // extension is known to exist.
            let swapchain_adequate = extensions_supported
                && !surface.formats(device)?.is_empty()
                && !surface.present_modes(device)?.is_empty();

            let score = rate_device(
                properties.device_type,
                properties.limits.max_image_dimension2_d,
                features.geometry_shader == vk::TRUE,
                queue_families.is_complete(),
                extensions_supported,
                swapchain_adequate,
            );

            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
            log::debug!("GPU candidate {:?} scored {}", name, score);

            if score == 0 {
                continue;
            }
            // Strictly-greater comparison keeps the first-enumerated device
            // on ties.
            if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
                let memory_properties =
                    unsafe { instance.get_physical_device_memory_properties(device) };
                best = Some((
                    score,
                    Self {
                        device,
                        properties,
                        features,
                        memory_properties,
                        queue_families,
                    },
                ));
            }
        }

        match best {
            Some((score, info)) => {
                let name = unsafe { CStr::from_ptr(info.properties.device_name.as_ptr()) };
                log::info!("Selected GPU: {} (score {})", name.to_string_lossy(), score);
                Ok(info)
            }
            None => Err(VulkanError::NoSuitableDevice),
        }
    }

    fn check_extension_support(
        instance: &Instance,
        device: vk::PhysicalDevice,
    ) -> VulkanResult<bool> {
        let available = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };

        let required = [SwapchainLoader::name()];
        Ok(required.iter().all(|required_ext| {
            available.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                name == *required_ext
            })
        }))
    }
}

/// Suitability score for one GPU
///
/// Zero marks the device unusable; otherwise discrete GPUs get a 1000-point
/// head start and the maximum 2D image dimension breaks ties between devices
/// of the same class.
pub fn rate_device(
    device_type: vk::PhysicalDeviceType,
    max_image_dimension_2d: u32,
    has_geometry_shader: bool,
    queues_complete: bool,
    extensions_supported: bool,
    swapchain_adequate: bool,
) -> u32 {
    if !has_geometry_shader || !queues_complete || !extensions_supported || !swapchain_adequate {
        return 0;
    }

    let mut score = max_image_dimension_2d;
    if device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 1000;
    }
    score
}

/// Logical device wrapper with RAII cleanup
///
/// Exclusively owns the opened device handle and its graphics/present queues.
/// Destroyed before the instance.
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Open a logical device with one queue per unique required family
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let graphics_family = physical
            .queue_families
            .graphics
            .ok_or(VulkanError::NoSuitableDevice)?;
        let present_family = physical
            .queue_families
            .present
            .ok_or(VulkanError::NoSuitableDevice)?;

        // Graphics and present may be the same family; request each unique
        // family exactly once.
        let unique_families: HashSet<u32> =
            [graphics_family, present_family].iter().copied().collect();

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];

        let device_features = vk::PhysicalDeviceFeatures::builder()
            .geometry_shader(true)
            .sampler_anisotropy(physical.features.sampler_anisotropy == vk::TRUE);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .create_device(physical.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        log::debug!(
            "Logical device created (graphics family {}, present family {})",
            graphics_family,
            present_family
        );

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            graphics_family,
            present_family,
            swapchain_loader,
        })
    }

    /// Block until all queues on the device are idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discrete_gpu_scores_base_plus_max_dimension() {
        let score = rate_device(
            vk::PhysicalDeviceType::DISCRETE_GPU,
            16384,
            true,
            true,
            true,
            true,
        );
        assert_eq!(score, 17384);
    }

    #[test]
    fn integrated_gpu_scores_max_dimension_only() {
        let score = rate_device(
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            16384,
            true,
            true,
            true,
            true,
        );
        assert_eq!(score, 16384);
    }

    #[test]
    fn missing_geometry_shader_is_unusable() {
        let score = rate_device(
            vk::PhysicalDeviceType::DISCRETE_GPU,
            16384,
            false,
            true,
            true,
            true,
        );
        assert_eq!(score, 0);
    }

    #[test]
    fn incomplete_queue_pair_is_unusable() {
        let score = rate_device(
            vk::PhysicalDeviceType::DISCRETE_GPU,
            16384,
            true,
            false,
            true,
            true,
        );
        assert_eq!(score, 0);
    }

    #[test]
    fn missing_swapchain_support_is_unusable() {
        assert_eq!(
            rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, true, true, false, false),
            0
        );
        assert_eq!(
            rate_device(vk::PhysicalDeviceType::DISCRETE_GPU, 16384, true, true, true, false),
            0
        );
    }

    #[test]
    fn queue_indices_complete_only_with_both_families() {
        let mut indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        indices.graphics = Some(0);
        assert!(!indices.is_complete());
        indices.present = Some(0);
        assert!(indices.is_complete());
    }
}
