//! Framebuffers, depth buffers, and offscreen render targets
//!
//! All three are sized to the swapchain extent and rebuilt in lockstep with
//! it on recreation. `RenderTarget` backs the HDR and bloom stages: a color
//! image that is both rendered into and sampled by the following stage.

use ash::vk;
use std::rc::Rc;

use crate::render::vulkan::buffer::find_memory_type;
use crate::render::vulkan::{LogicalDevice, VulkanError, VulkanResult};
use crate::render::vulkan::render_pass::RenderPass;

/// Owned image + memory + view, shared shape of depth and color targets
struct OwnedImage {
    device: Rc<LogicalDevice>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

impl OwnedImage {
    fn new(
        device: Rc<LogicalDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            device
                .device
                .create_image(&image_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let memory_type = find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = unsafe {
            device
                .device
                .allocate_memory(&alloc_info, None)
                .map_err(VulkanError::Api)?
        };

        unsafe {
            device
                .device
                .bind_image_memory(image, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            device
                .device
                .create_image_view(&view_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            image,
            memory,
            view,
        })
    }
}

impl Drop for OwnedImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Depth attachment sized to the swapchain
pub struct DepthBuffer {
    image: OwnedImage,
    format: vk::Format,
}

impl DepthBuffer {
    /// Create a depth buffer in the first supported depth format
    pub fn new(
        device: Rc<LogicalDevice>,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> VulkanResult<Self> {
        let format = Self::find_depth_format(instance, physical_device)?;
        let image = OwnedImage::new(
            device,
            memory_properties,
            extent,
            format,
            samples,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;
        Ok(Self { image, format })
    }

    /// First depth format with optimal-tiling attachment support
    pub fn find_depth_format(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<vk::Format> {
        let candidates = [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ];

        for format in candidates {
            let props =
                unsafe { instance.get_physical_device_format_properties(physical_device, format) };
            if props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            {
                return Ok(format);
            }
        }

        Err(VulkanError::InitializationFailed(
            "no supported depth format".to_string(),
        ))
    }

    /// Depth image view for framebuffer attachment
    pub fn view(&self) -> vk::ImageView {
        self.image.view
    }

    /// Selected depth format
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

/// Offscreen color target that is rendered into and then sampled
pub struct RenderTarget {
    image: OwnedImage,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl RenderTarget {
    /// Create a color target with attachment and sampled usage
    pub fn new(
        device: Rc<LogicalDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> VulkanResult<Self> {
        let image = OwnedImage::new(
            device,
            memory_properties,
            extent,
            format,
            samples,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        Ok(Self {
            image,
            format,
            extent,
        })
    }

    /// Color image view (attachment side)
    pub fn view(&self) -> vk::ImageView {
        self.image.view
    }

    /// Pixel format of the target
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Pixel extent of the target
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// Framebuffer binding attachment views to a render pass
pub struct Framebuffer {
    device: Rc<LogicalDevice>,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// Create a framebuffer from ordered attachment views
    pub fn new(
        device: Rc<LogicalDevice>,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .device
                .create_framebuffer(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self {
            device,
            framebuffer,
        })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}
