//! Presentation surface
//!
//! Wraps the platform window handle as a presentable target. Created from the
//! instance plus the windowing layer's raw handles; destroyed after the
//! swapchain but before the instance.

use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::render::vulkan::{VulkanError, VulkanInstance, VulkanResult};

/// Vulkan surface wrapper for presentation
pub struct Surface {
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface from a window's raw platform handles
    pub fn new<W>(instance: &VulkanInstance, window: &W) -> VulkanResult<Self>
    where
        W: HasRawWindowHandle + HasRawDisplayHandle,
    {
        let surface_loader = khr::Surface::new(&instance.entry, &instance.instance);

        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
            .map_err(VulkanError::Api)?
        };

        Ok(Self {
            surface_loader,
            surface,
        })
    }

    /// Get the underlying surface handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Get the surface loader
    pub fn loader(&self) -> &khr::Surface {
        &self.surface_loader
    }

    /// Surface capabilities for a physical device
    pub fn capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Supported surface formats for a physical device
    pub fn formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Supported present modes for a physical device
    pub fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Whether a queue family can present to this surface
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> VulkanResult<bool> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(physical_device, queue_family_index, self.surface)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
