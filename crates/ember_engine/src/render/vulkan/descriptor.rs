//! Descriptor set layouts, pools, and samplers

use ash::vk;
use std::rc::Rc;

use crate::render::vulkan::{LogicalDevice, VulkanError, VulkanResult};

/// Builder for a descriptor set layout, one binding at a time
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Start an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a uniform buffer binding
    pub fn uniform_buffer(mut self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(stages)
                .build(),
        );
        self
    }

    /// Add a combined image sampler binding
    pub fn combined_image_sampler(mut self, binding: u32, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(stages)
                .build(),
        );
        self
    }

    /// Create the layout
    pub fn build(self, device: Rc<LogicalDevice>) -> VulkanResult<DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);

        let layout = unsafe {
            device
                .device
                .create_descriptor_set_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(DescriptorSetLayout { device, layout })
    }
}

/// Descriptor set layout with RAII cleanup
pub struct DescriptorSetLayout {
    device: Rc<LogicalDevice>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Get the layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool sized for the renderer's fixed set usage
pub struct DescriptorPool {
    device: Rc<LogicalDevice>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a pool with capacity for `max_sets` sets of uniform buffers and
    /// combined image samplers
    pub fn new(device: Rc<LogicalDevice>, max_sets: u32) -> VulkanResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: max_sets,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: max_sets * 2,
            },
        ];

        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);

        let pool = unsafe {
            device
                .device
                .create_descriptor_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, pool })
    }

    /// Allocate one descriptor set per given layout
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        unsafe {
            self.device
                .device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Point a set's uniform buffer binding at a buffer
    pub fn write_uniform_buffer(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);

        unsafe {
            self.device
                .device
                .update_descriptor_sets(&[write.build()], &[]);
        }
    }

    /// Point a set's sampler binding at an image view
    pub fn write_combined_image_sampler(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info);

        unsafe {
            self.device
                .device
                .update_descriptor_sets(&[write.build()], &[]);
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Texture sampler with optional anisotropic filtering
pub struct Sampler {
    device: Rc<LogicalDevice>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create a linear sampler; anisotropy is enabled only when the device
    /// feature was requested
    pub fn new(
        device: Rc<LogicalDevice>,
        max_anisotropy: Option<f32>,
    ) -> VulkanResult<Self> {
        let mut create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

        if let Some(max) = max_anisotropy {
            create_info = create_info.anisotropy_enable(true).max_anisotropy(max);
        }

        let sampler = unsafe {
            device
                .device
                .create_sampler(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, sampler })
    }

    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
        }
    }
}
