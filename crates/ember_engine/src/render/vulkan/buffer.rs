//! GPU buffer management
//!
//! `Buffer` is the raw allocation; typed wrappers (`VertexBuffer`,
//! `IndexBuffer`, `UniformBuffer`, `StagingBuffer`) encode usage and upload
//! strategy. Geometry lives in device-local memory filled through a staging
//! copy; uniforms stay host-visible and persistently mapped so per-frame
//! writes are a memcpy.

use ash::vk;
use std::rc::Rc;

use crate::render::vulkan::commands::CommandPool;
use crate::render::vulkan::{LogicalDevice, VulkanError, VulkanResult};

/// Raw buffer plus its backing memory
pub struct Buffer {
    device: Rc<LogicalDevice>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    /// Allocate a buffer with the given usage and memory properties
    pub fn new(
        device: Rc<LogicalDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .device
                .create_buffer(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let memory_type = match find_memory_type(
            memory_properties,
            requirements.memory_type_bits,
            properties,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = unsafe {
            match device.device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    device.device.destroy_buffer(buffer, None);
                    return Err(VulkanError::Api(e));
                }
            }
        };

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
        })
    }

    /// Get the buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Allocation size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copy host data into a host-visible allocation (map, copy, unmap)
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        unsafe {
            let ptr = self
                .device
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.device.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Record and submit a full-size copy into another buffer
    pub fn copy_to(&self, dst: &Buffer, pool: &CommandPool) -> VulkanResult<()> {
        pool.one_time_submit(self.device.graphics_queue, |device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: self.size,
            };
            unsafe { device.cmd_copy_buffer(cmd, self.buffer, dst.buffer, &[region]) };
        })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Find a memory type index satisfying both the resource's type filter and
/// the requested property flags
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    for i in 0..memory_properties.memory_type_count {
        let type_matches = type_filter & (1 << i) != 0;
        let property_matches = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);
        if type_matches && property_matches {
            return Ok(i);
        }
    }
    Err(VulkanError::NoSuitableMemoryType)
}

/// Host-visible scratch buffer for uploads
pub struct StagingBuffer {
    /// Underlying allocation
    pub buffer: Buffer,
}

impl StagingBuffer {
    /// Allocate and fill a staging buffer from host data
    pub fn from_data<T: bytemuck::Pod>(
        device: Rc<LogicalDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        data: &[T],
    ) -> VulkanResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = Buffer::new(
            device,
            memory_properties,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.write(data)?;
        Ok(Self { buffer })
    }
}

/// Device-local vertex buffer filled through a staging copy
pub struct VertexBuffer {
    /// Underlying allocation
    pub buffer: Buffer,
    /// Number of vertices stored
    pub vertex_count: u32,
}

impl VertexBuffer {
    /// Upload vertices into device-local memory
    pub fn new<T: bytemuck::Pod>(
        device: Rc<LogicalDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        pool: &CommandPool,
        vertices: &[T],
    ) -> VulkanResult<Self> {
        let staging = StagingBuffer::from_data(device.clone(), memory_properties, vertices)?;
        let buffer = Buffer::new(
            device,
            memory_properties,
            staging.buffer.size(),
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        staging.buffer.copy_to(&buffer, pool)?;
        Ok(Self {
            buffer,
            vertex_count: vertices.len() as u32,
        })
    }
}

/// Device-local index buffer filled through a staging copy
pub struct IndexBuffer {
    /// Underlying allocation
    pub buffer: Buffer,
    /// Number of indices stored
    pub index_count: u32,
    /// Index width as seen by draw calls
    pub index_type: vk::IndexType,
}

impl IndexBuffer {
    /// Upload 32-bit indices into device-local memory
    pub fn new(
        device: Rc<LogicalDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        pool: &CommandPool,
        indices: &[u32],
    ) -> VulkanResult<Self> {
        let staging = StagingBuffer::from_data(device.clone(), memory_properties, indices)?;
        let buffer = Buffer::new(
            device,
            memory_properties,
            staging.buffer.size(),
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        staging.buffer.copy_to(&buffer, pool)?;
        Ok(Self {
            buffer,
            index_count: indices.len() as u32,
            index_type: vk::IndexType::UINT32,
        })
    }
}

/// Persistently mapped host-visible uniform buffer
///
/// One of these exists per frame slot; the frame pacer's fence guarantees the
/// GPU is done reading before the slot's buffer is rewritten.
pub struct UniformBuffer {
    /// Underlying allocation
    pub buffer: Buffer,
    mapped: *mut std::ffi::c_void,
}

impl UniformBuffer {
    /// Allocate a mapped uniform buffer of `size` bytes
    pub fn new(
        device: Rc<LogicalDevice>,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
    ) -> VulkanResult<Self> {
        let buffer = Buffer::new(
            device,
            memory_properties,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let mapped = unsafe {
            buffer
                .device
                .device
                .map_memory(buffer.memory, 0, size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };

        Ok(Self { buffer, mapped })
    }

    /// Overwrite the buffer contents with one Pod value
    pub fn write_value<T: bytemuck::Pod>(&self, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped as *mut u8, bytes.len());
        }
    }
}

impl Drop for UniformBuffer {
    fn drop(&mut self) {
        // The Buffer drop frees the memory; the persistent mapping must be
        // released first.
        unsafe {
            self.buffer.device.device.unmap_memory(self.buffer.memory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    #[test]
    fn finds_matching_memory_type() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let index = find_memory_type(
            &props,
            0b11,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index.unwrap(), 1);
    }

    #[test]
    fn type_filter_excludes_otherwise_matching_types() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        // Only bit 1 allowed by the resource.
        let index = find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(index.unwrap(), 1);
    }

    #[test]
    fn missing_memory_type_is_an_error() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let result = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(matches!(result, Err(VulkanError::NoSuitableMemoryType)));
    }
}
