//! Shader modules, pipeline layouts, and graphics pipelines
//!
//! Pipelines are fully explicit: `FixedFunctionState` spells out every
//! fixed-function stage rather than relying on driver defaults. Viewport and
//! scissor are dynamic so pipelines survive swapchain recreation.

use ash::vk;
use std::ffi::CStr;
use std::io::Cursor;
use std::path::Path;
use std::rc::Rc;

use crate::render::vulkan::{LogicalDevice, RenderPass, VulkanError, VulkanResult};

/// Compiled SPIR-V shader module
pub struct ShaderModule {
    device: Rc<LogicalDevice>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V bytes
    pub fn from_bytes(device: Rc<LogicalDevice>, bytes: &[u8]) -> VulkanResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
            VulkanError::InitializationFailed(format!("invalid SPIR-V: {e}"))
        })?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe {
            device
                .device
                .create_shader_module(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, module })
    }

    /// Load and create a shader module from a SPIR-V file
    pub fn from_file(device: Rc<LogicalDevice>, path: &Path) -> VulkanResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            VulkanError::InitializationFailed(format!(
                "failed to read shader {}: {e}",
                path.display()
            ))
        })?;
        Self::from_bytes(device, &bytes)
    }

    /// Get the module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage create info for this module's `main` entry point
    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        const ENTRY: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Pipeline layout owned separately from the pipelines that use it
pub struct PipelineLayout {
    device: Rc<LogicalDevice>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Create a layout from descriptor set layouts and push-constant ranges
    pub fn new(
        device: Rc<LogicalDevice>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe {
            device
                .device
                .create_pipeline_layout(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, layout })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Explicit fixed-function configuration for one pipeline
pub struct FixedFunctionState {
    /// Vertex binding descriptions
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attribute descriptions
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Polygon fill mode
    pub polygon_mode: vk::PolygonMode,
    /// Face culling mode
    pub cull_mode: vk::CullModeFlags,
    /// Winding order treated as front-facing
    pub front_face: vk::FrontFace,
    /// Rasterization sample count
    pub samples: vk::SampleCountFlags,
    /// Whether depth testing is enabled
    pub depth_test: bool,
    /// Whether depth writes are enabled
    pub depth_write: bool,
    /// Whether alpha blending is enabled on the color attachment
    pub blend: bool,
}

impl FixedFunctionState {
    /// Opaque 3D geometry: back-face culling, depth test and write, no blend
    pub fn opaque_3d(
        vertex_bindings: Vec<vk::VertexInputBindingDescription>,
        vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        Self {
            vertex_bindings,
            vertex_attributes,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: true,
            depth_write: true,
            blend: false,
        }
    }

    /// Fullscreen post-process triangle: no vertex input, no depth, no cull
    pub fn fullscreen() -> Self {
        Self {
            vertex_bindings: vec![],
            vertex_attributes: vec![],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: false,
            depth_write: false,
            blend: false,
        }
    }

    /// UI overlay: alpha-blended, no depth, no cull
    pub fn ui_overlay(
        vertex_bindings: Vec<vk::VertexInputBindingDescription>,
        vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        Self {
            vertex_bindings,
            vertex_attributes,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            depth_test: false,
            depth_write: false,
            blend: true,
        }
    }
}

/// Graphics pipeline with RAII cleanup
///
/// Holds handles only; the layout and render pass it was built against must
/// outlive it, which the renderer's field order guarantees.
pub struct GraphicsPipeline {
    device: Rc<LogicalDevice>,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Build a pipeline for one subpass of a render pass
    pub fn new(
        device: Rc<LogicalDevice>,
        layout: &PipelineLayout,
        render_pass: &RenderPass,
        subpass: u32,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        state: &FixedFunctionState,
    ) -> VulkanResult<Self> {
        let stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&state.vertex_bindings)
            .vertex_attribute_descriptions(&state.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(state.topology)
            .primitive_restart_enable(false);

        // Actual viewport/scissor values are set at record time.
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(state.polygon_mode)
            .line_width(1.0)
            .cull_mode(state.cull_mode)
            .front_face(state.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(state.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachment = if state.blend {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        };
        let blend_attachments = [blend_attachment];

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(subpass);

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };

        Ok(Self {
            device,
            pipeline: pipelines[0],
        })
    }

    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
        }
    }
}
