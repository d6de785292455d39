//! Swapchain creation and surface negotiation
//!
//! Negotiation against the surface's advertised capabilities is factored into
//! pure functions so the format, present mode, extent, and image count rules
//! can be tested without a GPU. The swapchain itself owns its image views and
//! is rebuilt wholesale on resize or staleness.

use ash::vk;
use std::rc::Rc;

use crate::render::vulkan::{LogicalDevice, Surface, VulkanError, VulkanResult};

/// Negotiated swapchain parameters
///
/// Snapshot of the choices made against the surface capabilities at creation
/// time. Recreation re-runs the negotiation from scratch.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainParams {
    /// Selected surface format and color space
    pub surface_format: vk::SurfaceFormatKHR,
    /// Selected presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Pixel extent of the swapchain images
    pub extent: vk::Extent2D,
    /// Number of swapchain images requested
    pub image_count: u32,
}

/// Prefer 8-bit BGRA with sRGB encoding; fall back to the first advertised
/// format. `None` only for an empty list, which a conformant surface never
/// reports.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Prefer mailbox (low-latency triple buffering); fall back to FIFO, which
/// every conformant driver must support.
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Resolve the swapchain extent from the surface capabilities
///
/// When the surface reports a fixed current extent it must be used verbatim.
/// The sentinel width of `u32::MAX` means the surface defers to the
/// application, in which case the framebuffer size is clamped into the
/// supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_width: u32,
    framebuffer_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: framebuffer_width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: framebuffer_height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the driver minimum, so acquisition never waits on the driver
/// releasing an image. A max of zero means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Swapchain with owned images and views
///
/// Images are owned by the swapchain object itself; only the views are
/// explicitly created and destroyed here.
pub struct Swapchain {
    device: Rc<LogicalDevice>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    /// Parameters negotiated at creation
    pub params: SwapchainParams,
}

impl Swapchain {
    /// Create a swapchain sized to the current framebuffer
    pub fn new(
        device: Rc<LogicalDevice>,
        physical_device: vk::PhysicalDevice,
        surface: &Surface,
        framebuffer_width: u32,
        framebuffer_height: u32,
    ) -> VulkanResult<Self> {
        let (swapchain, images, image_views, params) = Self::build(
            &device,
            physical_device,
            surface,
            framebuffer_width,
            framebuffer_height,
        )?;
        Ok(Self {
            device,
            swapchain,
            images,
            image_views,
            params,
        })
    }

    /// Tear down and rebuild against the surface's current state
    ///
    /// The old swapchain is destroyed first; some window systems refuse a
    /// second swapchain on the same surface. The caller must have waited for
    /// the device to go idle.
    pub fn recreate(
        &mut self,
        physical_device: vk::PhysicalDevice,
        surface: &Surface,
        framebuffer_width: u32,
        framebuffer_height: u32,
    ) -> VulkanResult<()> {
        self.destroy_resources();
        let (swapchain, images, image_views, params) = Self::build(
            &self.device,
            physical_device,
            surface,
            framebuffer_width,
            framebuffer_height,
        )?;
        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.params = params;
        Ok(())
    }

    fn build(
        device: &Rc<LogicalDevice>,
        physical_device: vk::PhysicalDevice,
        surface: &Surface,
        framebuffer_width: u32,
        framebuffer_height: u32,
    ) -> VulkanResult<(
        vk::SwapchainKHR,
        Vec<vk::Image>,
        Vec<vk::ImageView>,
        SwapchainParams,
    )> {
        let capabilities = surface.capabilities(physical_device)?;
        let formats = surface.formats(physical_device)?;
        let present_modes = surface.present_modes(physical_device)?;

        if present_modes.is_empty() {
            return Err(VulkanError::InitializationFailed(
                "surface reports no present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&formats).ok_or_else(|| {
            VulkanError::InitializationFailed("surface reports no formats".to_string())
        })?;

        let params = SwapchainParams {
            surface_format,
            present_mode: choose_present_mode(&present_modes),
            extent: choose_extent(&capabilities, framebuffer_width, framebuffer_height),
            image_count: choose_image_count(&capabilities),
        };

        let (sharing_mode, queue_family_indices) =
            if device.graphics_family == device.present_family {
                (vk::SharingMode::EXCLUSIVE, vec![])
            } else {
                (
                    vk::SharingMode::CONCURRENT,
                    vec![device.graphics_family, device.present_family],
                )
            };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(params.image_count)
            .image_format(params.surface_format.format)
            .image_color_space(params.surface_format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .clipped(true);

        let swapchain = unsafe {
            device
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let images = unsafe {
            device
                .swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        let image_views = images
            .iter()
            .map(|&image| {
                Self::create_image_view(&device, image, params.surface_format.format)
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::debug!(
            "Swapchain created: {}x{}, {} images, {:?}/{:?}",
            params.extent.width,
            params.extent.height,
            images.len(),
            params.surface_format.format,
            params.present_mode
        );

        Ok((swapchain, images, image_views, params))
    }

    fn destroy_resources(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
        self.image_views.clear();
        self.images.clear();
    }

    fn create_image_view(
        device: &LogicalDevice,
        image: vk::Image,
        format: vk::Format,
    ) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            device
                .device
                .create_image_view(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }

    /// Get the swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Swapchain image views, indexed by acquired image index
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of images in the swapchain
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Pixel extent of the swapchain images
    pub fn extent(&self) -> vk::Extent2D {
        self.params.extent
    }

    /// Color format of the swapchain images
    pub fn format(&self) -> vk::Format {
        self.params.surface_format.format
    }

    /// Acquire the next presentable image
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    /// `ERROR_OUT_OF_DATE_KHR` maps to `Ok(None)` so the caller can trigger
    /// recreation instead of treating staleness as failure.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
    ) -> VulkanResult<Option<(u32, bool)>> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => Ok(Some((index, suboptimal))),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Queue the image for presentation
    ///
    /// Returns `true` when the swapchain is stale (out of date or suboptimal)
    /// and must be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(queue, &present_info)
        };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_bgra_srgb_format() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&available).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_format() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&available).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn empty_format_list_yields_none_instead_of_panicking() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn prefers_mailbox_present_mode() {
        let available = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&available), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn falls_back_to_fifo_present_mode() {
        let available = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&available), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn fixed_current_extent_is_used_verbatim() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 1920, 1080);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn deferred_extent_clamps_framebuffer_size() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            max_image_extent: vk::Extent2D {
                width: 1600,
                height: 900,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 1920, 200);
        assert_eq!(extent.width, 1600);
        assert_eq!(extent.height, 480);
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 3);

        let tight = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&tight), 3);
    }

    #[test]
    fn zero_max_image_count_means_unbounded() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 4,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 5);
    }
}
