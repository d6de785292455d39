//! Sampled textures uploaded through a staging buffer
//!
//! Upload path: staging buffer → transition to TRANSFER_DST → buffer-to-image
//! copy → transition to SHADER_READ_ONLY. Only those two transitions exist in
//! the engine; requesting any other pair is a programming error and panics.

use ash::vk;
use std::rc::Rc;

use crate::render::vulkan::buffer::{find_memory_type, StagingBuffer};
use crate::render::vulkan::commands::CommandPool;
use crate::render::vulkan::{LogicalDevice, VulkanError, VulkanResult};

/// Sampled 2D texture in device-local memory
pub struct Texture {
    device: Rc<LogicalDevice>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    /// Pixel extent of the texture
    pub extent: vk::Extent2D,
}

impl Texture {
    /// Upload RGBA8 pixels as a sampled texture
    pub fn from_rgba8(
        device: Rc<LogicalDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        pool: &CommandPool,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> VulkanResult<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "texture data is {} bytes, expected {} for {}x{} RGBA",
                    pixels.len(),
                    expected,
                    width,
                    height
                ),
            });
        }

        let staging = StagingBuffer::from_data(device.clone(), memory_properties, pixels)?;

        let format = vk::Format::R8G8B8A8_SRGB;
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .samples(vk::SampleCountFlags::TYPE_1)
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

        pool.one_time_submit(device.graphics_queue, |dev, cmd| {
            record_layout_transition(
                dev,
                cmd,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            };
            unsafe {
                dev.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer.handle(),
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            record_layout_transition(
                dev,
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
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
            extent: vk::Extent2D { width, height },
        })
    }

    /// Sampled image view
    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Record a pipeline barrier moving `image` between layouts
///
/// # Panics
///
/// Panics on a layout pair the upload path never produces. A bad pair can
/// only come from a code change, not from runtime data.
fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (old, new) => panic!("unsupported image layout transition: {old:?} -> {new:?}"),
    };

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}
