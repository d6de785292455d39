//! Command pool and command buffer recording
//!
//! `CommandRecorder` wraps one primary command buffer; `ActiveRenderPass`
//! scopes recording that is only legal between begin/end of a render pass,
//! including stepping to the next subpass for the UI overlay.

use ash::vk;
use std::rc::Rc;

use crate::render::vulkan::{Framebuffer, GraphicsPipeline, LogicalDevice, RenderPass, VulkanError, VulkanResult};

/// Command pool with RAII cleanup
pub struct CommandPool {
    device: Rc<LogicalDevice>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a resettable command pool for a queue family
    pub fn new(device: Rc<LogicalDevice>, queue_family_index: u32) -> VulkanResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let pool = unsafe {
            device
                .device
                .create_command_pool(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, pool })
    }

    /// Allocate primary command buffers from this pool
    pub fn allocate(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe {
            self.device
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)
        }
    }

    /// Record, submit, and synchronously wait on a throwaway command buffer
    ///
    /// Used for staging copies and image layout transitions during setup.
    pub fn one_time_submit<F>(&self, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let command_buffer = self.allocate(1)?[0];

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;

            record(&self.device.device, command_buffer);

            self.device
                .device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            self.device
                .device
                .queue_submit(queue, &[submit_info.build()], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device
                .device
                .queue_wait_idle(queue)
                .map_err(VulkanError::Api)?;

            self.device
                .device
                .free_command_buffers(self.pool, &command_buffers);
        }

        Ok(())
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Records into one primary command buffer
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    /// Reset the buffer and begin recording
    pub fn begin(device: &'a ash::Device, command_buffer: vk::CommandBuffer) -> VulkanResult<Self> {
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            device
                .begin_command_buffer(command_buffer, &vk::CommandBufferBeginInfo::default())
                .map_err(VulkanError::Api)?;
        }
        Ok(Self {
            device,
            command_buffer,
        })
    }

    /// Begin a render pass over the full framebuffer extent
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) -> ActiveRenderPass<'_, 'a> {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(
                self.command_buffer,
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }

        ActiveRenderPass { recorder: self }
    }

    /// End recording; the buffer is ready for submission
    pub fn end(self) -> VulkanResult<vk::CommandBuffer> {
        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::Api)?;
        }
        Ok(self.command_buffer)
    }
}

/// Recording scope inside a render pass
///
/// Ends the pass on drop, so a pass can never leak past its scope.
pub struct ActiveRenderPass<'r, 'a> {
    recorder: &'r mut CommandRecorder<'a>,
}

impl ActiveRenderPass<'_, '_> {
    fn device(&self) -> &ash::Device {
        self.recorder.device
    }

    fn cmd(&self) -> vk::CommandBuffer {
        self.recorder.command_buffer
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: &GraphicsPipeline) {
        unsafe {
            self.device().cmd_bind_pipeline(
                self.cmd(),
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }
    }

    /// Set the dynamic viewport and scissor to cover the given extent
    pub fn set_viewport_scissor(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device().cmd_set_viewport(self.cmd(), 0, &[viewport]);
            self.device().cmd_set_scissor(self.cmd(), 0, &[scissor]);
        }
    }

    /// Bind one vertex buffer at binding 0
    pub fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(self.cmd(), 0, &[buffer], &[0]);
        }
    }

    /// Bind an index buffer
    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe {
            self.device()
                .cmd_bind_index_buffer(self.cmd(), buffer, 0, index_type);
        }
    }

    /// Bind descriptor sets starting at set 0
    pub fn bind_descriptor_sets(
        &mut self,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                self.cmd(),
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                sets,
                &[],
            );
        }
    }

    /// Upload push constants for the given stages
    pub fn push_constants<T: bytemuck::Pod>(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        value: &T,
    ) {
        unsafe {
            self.device()
                .cmd_push_constants(self.cmd(), layout, stages, 0, bytemuck::bytes_of(value));
        }
    }

    /// Issue an indexed draw
    pub fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe {
            self.device()
                .cmd_draw_indexed(self.cmd(), index_count, 1, first_index, vertex_offset, 0);
        }
    }

    /// Issue a non-indexed draw
    pub fn draw(&mut self, vertex_count: u32) {
        unsafe {
            self.device().cmd_draw(self.cmd(), vertex_count, 1, 0, 0);
        }
    }

    /// Advance to the next subpass of the current pass
    pub fn next_subpass(&mut self) {
        unsafe {
            self.device()
                .cmd_next_subpass(self.cmd(), vk::SubpassContents::INLINE);
        }
    }
}

impl Drop for ActiveRenderPass<'_, '_> {
    fn drop(&mut self) {
        unsafe {
            self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer);
        }
    }
}
