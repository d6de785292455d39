//! High-level renderer owning the full Vulkan object graph
//!
//! Frame recording runs three stages: the scene pass renders lit geometry
//! into an HDR float target, the bloom pass extracts and blurs bright
//! regions, and the composite pass tone-maps both onto the swapchain image
//! and then draws the UI overlay in a second subpass.
//!
//! Field declaration order doubles as teardown order: Rust drops fields in
//! declaration order, so dependent resources are declared first and the
//! device, surface, and instance come last.

use ash::vk;
use std::path::Path;
use std::rc::Rc;

use crate::assets::scene::LoadedScene;
use crate::core::config::RendererConfig;
use crate::render::mesh::UiVertex;
use crate::render::vulkan::render_pass::HDR_COLOR_FORMAT;
use crate::render::vulkan::{
    vertex_layout, Buffer, CommandPool, CommandRecorder, DepthBuffer, DescriptorPool,
    DescriptorSetLayout, DescriptorSetLayoutBuilder, FixedFunctionState, FrameDriver, FramePacer,
    FrameStatus, FrameSync, Framebuffer, GraphicsPipeline, IndexBuffer, LogicalDevice,
    PhysicalDeviceInfo, PipelineLayout, RenderPass, RenderPassDesc, Sampler, ShaderModule,
    Surface, Swapchain, Texture, VertexBuffer, VulkanError, VulkanInstance, VulkanResult,
};
use crate::render::window::Window;

const UI_MAX_VERTICES: usize = 4096;
const UI_MAX_INDICES: usize = 8192;

/// Clamp a requested per-pixel sample count to what the device supports
///
/// `supported` is the intersection of the device's color and depth
/// framebuffer sample counts. The request is halved until a supported
/// count is found; 1 is always supported.
pub fn pick_sample_count(requested: u32, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    let mut count = requested.clamp(1, 64).next_power_of_two();
    if count > requested {
        count /= 2;
    }
    while count > 1 {
        let flag = vk::SampleCountFlags::from_raw(count);
        if supported.contains(flag) {
            return flag;
        }
        count /= 2;
    }
    vk::SampleCountFlags::TYPE_1
}

/// Per-frame camera uniforms
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CameraMatrices {
    /// World-to-view transform, column major
    pub view: [[f32; 4]; 4],
    /// View-to-clip transform, column major
    pub proj: [[f32; 4]; 4],
}

unsafe impl bytemuck::Zeroable for CameraMatrices {}
unsafe impl bytemuck::Pod for CameraMatrices {}

impl Default for CameraMatrices {
    fn default() -> Self {
        let identity = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        Self {
            view: identity,
            proj: identity,
        }
    }
}

/// Per-draw push constants for the scene pass
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ScenePush {
    model: [[f32; 4]; 4],
    base_color: [f32; 4],
}

unsafe impl bytemuck::Zeroable for ScenePush {}
unsafe impl bytemuck::Pod for ScenePush {}

/// UI vertex/index batch supplied by the caller for one frame
///
/// Positions are in framebuffer pixels; the overlay shader maps them to clip
/// space using the pushed extent.
#[derive(Debug, Clone, Default)]
pub struct UiDrawData {
    /// Overlay vertices
    pub vertices: Vec<UiVertex>,
    /// Triangle-list indices into `vertices`
    pub indices: Vec<u32>,
}

/// Scene geometry resident on the GPU plus the node arena for per-draw
/// transforms
struct SceneGeometry {
    loaded: LoadedScene,
    vertex_buffer: VertexBuffer,
    index_buffer: IndexBuffer,
}

/// Host-visible overlay buffers for one frame slot
struct UiFrameBuffers {
    vertex: Buffer,
    index: Buffer,
    index_count: u32,
}

struct Pipelines {
    scene: GraphicsPipeline,
    bloom: GraphicsPipeline,
    composite: GraphicsPipeline,
    ui: GraphicsPipeline,
}

struct Layouts {
    scene: PipelineLayout,
    bloom: PipelineLayout,
    composite: PipelineLayout,
    ui: PipelineLayout,
}

struct SetLayouts {
    camera: DescriptorSetLayout,
    single_sampler: DescriptorSetLayout,
    dual_sampler: DescriptorSetLayout,
}

/// The renderer
///
/// Owns every Vulkan object from instance to per-frame sync. Transient
/// presentation conditions are reported as [`FrameStatus::SwapchainStale`];
/// the caller reacts by calling [`VulkanRenderer::recreate_swapchain`].
pub struct VulkanRenderer {
    pacer: FramePacer,
    frame_sync: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    scene: Option<SceneGeometry>,
    ui_buffers: Vec<UiFrameBuffers>,
    uniform_buffers: Vec<crate::render::vulkan::UniformBuffer>,
    scene_sets: Vec<vk::DescriptorSet>,
    bloom_set: vk::DescriptorSet,
    composite_set: vk::DescriptorSet,
    pipelines: Pipelines,
    layouts: Layouts,
    descriptor_pool: DescriptorPool,
    set_layouts: SetLayouts,
    sampler: Sampler,
    hdr_framebuffer: Framebuffer,
    bloom_framebuffer: Framebuffer,
    composite_framebuffers: Vec<Framebuffer>,
    hdr_target: crate::render::vulkan::RenderTarget,
    bloom_target: crate::render::vulkan::RenderTarget,
    msaa_target: Option<crate::render::vulkan::RenderTarget>,
    depth_buffer: DepthBuffer,
    msaa_samples: vk::SampleCountFlags,
    hdr_pass: RenderPass,
    bloom_pass: RenderPass,
    composite_pass: RenderPass,
    swapchain: Swapchain,
    command_pool: CommandPool,
    clear_color: [f32; 4],
    device: Rc<LogicalDevice>,
    physical: PhysicalDeviceInfo,
    surface: Surface,
    instance: VulkanInstance,
}

impl VulkanRenderer {
    /// Bootstrap the full rendering stack against a window
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        config.validate().map_err(|e| {
            VulkanError::InitializationFailed(format!("invalid renderer config: {e}"))
        })?;

        let instance = VulkanInstance::new(
            window,
            &config.application_name,
            config.application_version,
            config.validation_enabled(),
        )?;
        let surface = Surface::new(&instance, &**window.inner())?;
        let physical = PhysicalDeviceInfo::select(&instance.instance, &surface)?;
        let device = Rc::new(LogicalDevice::new(&instance.instance, &physical)?);

        let command_pool = CommandPool::new(device.clone(), device.graphics_family)?;

        let (width, height) = window.get_framebuffer_size();
        let swapchain = Swapchain::new(
            device.clone(),
            physical.device,
            &surface,
            width,
            height,
        )?;

        let limits = &physical.properties.limits;
        let msaa_samples = pick_sample_count(
            config.msaa_samples,
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts,
        );

        let depth_format = DepthBuffer::find_depth_format(&instance.instance, physical.device)?;
        let hdr_pass = RenderPass::new(
            device.clone(),
            &RenderPassDesc::hdr(depth_format, msaa_samples),
        )?;
        let bloom_pass = RenderPass::new(device.clone(), &RenderPassDesc::bloom())?;
        let composite_pass = RenderPass::new(
            device.clone(),
            &RenderPassDesc::composite(swapchain.format()),
        )?;

        let extent = swapchain.extent();
        let depth_buffer = DepthBuffer::new(
            device.clone(),
            &instance.instance,
            physical.device,
            &physical.memory_properties,
            extent,
            msaa_samples,
        )?;
        let hdr_target = crate::render::vulkan::RenderTarget::new(
            device.clone(),
            &physical.memory_properties,
            extent,
            HDR_COLOR_FORMAT,
            vk::SampleCountFlags::TYPE_1,
        )?;
        let bloom_target = crate::render::vulkan::RenderTarget::new(
            device.clone(),
            &physical.memory_properties,
            extent,
            HDR_COLOR_FORMAT,
            vk::SampleCountFlags::TYPE_1,
        )?;
        let msaa_target = if msaa_samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(crate::render::vulkan::RenderTarget::new(
                device.clone(),
                &physical.memory_properties,
                extent,
                HDR_COLOR_FORMAT,
                msaa_samples,
            )?)
        };

        // MSAA: [multisampled color, depth, resolve]; otherwise [color, depth].
        let hdr_attachments = match &msaa_target {
            Some(msaa) => vec![msaa.view(), depth_buffer.view(), hdr_target.view()],
            None => vec![hdr_target.view(), depth_buffer.view()],
        };
        let hdr_framebuffer =
            Framebuffer::new(device.clone(), &hdr_pass, &hdr_attachments, extent)?;
        let bloom_framebuffer =
            Framebuffer::new(device.clone(), &bloom_pass, &[bloom_target.view()], extent)?;
        let composite_framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| Framebuffer::new(device.clone(), &composite_pass, &[view], extent))
            .collect::<VulkanResult<Vec<_>>>()?;

        let max_anisotropy = if physical.features.sampler_anisotropy == vk::TRUE {
            Some(physical.properties.limits.max_sampler_anisotropy)
        } else {
            None
        };
        let sampler = Sampler::new(device.clone(), max_anisotropy)?;

        let set_layouts = SetLayouts {
            camera: DescriptorSetLayoutBuilder::new()
                .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
                .build(device.clone())?,
            single_sampler: DescriptorSetLayoutBuilder::new()
                .combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
                .build(device.clone())?,
            dual_sampler: DescriptorSetLayoutBuilder::new()
                .combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
                .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
                .build(device.clone())?,
        };

        let frames = config.max_frames_in_flight as usize;
        let descriptor_pool = DescriptorPool::new(device.clone(), (frames + 2) as u32)?;

        let camera_layouts = vec![set_layouts.camera.handle(); frames];
        let scene_sets = descriptor_pool.allocate(&camera_layouts)?;
        let bloom_set = descriptor_pool.allocate(&[set_layouts.single_sampler.handle()])?[0];
        let composite_set = descriptor_pool.allocate(&[set_layouts.dual_sampler.handle()])?[0];

        let mut uniform_buffers = Vec::with_capacity(frames);
        for set in &scene_sets {
            let ubo = crate::render::vulkan::UniformBuffer::new(
                device.clone(),
                &physical.memory_properties,
                std::mem::size_of::<CameraMatrices>() as vk::DeviceSize,
            )?;
            descriptor_pool.write_uniform_buffer(
                *set,
                0,
                ubo.buffer.handle(),
                std::mem::size_of::<CameraMatrices>() as vk::DeviceSize,
            );
            uniform_buffers.push(ubo);
        }

        descriptor_pool.write_combined_image_sampler(
            bloom_set,
            0,
            hdr_target.view(),
            sampler.handle(),
        );
        descriptor_pool.write_combined_image_sampler(
            composite_set,
            0,
            hdr_target.view(),
            sampler.handle(),
        );
        descriptor_pool.write_combined_image_sampler(
            composite_set,
            1,
            bloom_target.view(),
            sampler.handle(),
        );

        let scene_push = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<ScenePush>() as u32,
        }];
        let ui_push = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: std::mem::size_of::<[f32; 2]>() as u32,
        }];

        let layouts = Layouts {
            scene: PipelineLayout::new(
                device.clone(),
                &[set_layouts.camera.handle()],
                &scene_push,
            )?,
            bloom: PipelineLayout::new(
                device.clone(),
                &[set_layouts.single_sampler.handle()],
                &[],
            )?,
            composite: PipelineLayout::new(
                device.clone(),
                &[set_layouts.dual_sampler.handle()],
                &[],
            )?,
            ui: PipelineLayout::new(device.clone(), &[], &ui_push)?,
        };

        let pipelines = Self::build_pipelines(
            &device,
            config,
            &layouts,
            &hdr_pass,
            &bloom_pass,
            &composite_pass,
            msaa_samples,
        )?;

        let command_buffers = command_pool.allocate(frames as u32)?;

        let mut frame_sync = Vec::with_capacity(frames);
        let mut ui_buffers = Vec::with_capacity(frames);
        for _ in 0..frames {
            frame_sync.push(FrameSync::new(device.clone())?);
            ui_buffers.push(UiFrameBuffers {
                vertex: Buffer::new(
                    device.clone(),
                    &physical.memory_properties,
                    (UI_MAX_VERTICES * std::mem::size_of::<UiVertex>()) as vk::DeviceSize,
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                )?,
                index: Buffer::new(
                    device.clone(),
                    &physical.memory_properties,
                    (UI_MAX_INDICES * std::mem::size_of::<u32>()) as vk::DeviceSize,
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                )?,
                index_count: 0,
            });
        }

        log::info!(
            "Renderer initialized: {}x{}, {} frames in flight, {:?} MSAA",
            extent.width,
            extent.height,
            frames,
            msaa_samples
        );

        Ok(Self {
            pacer: FramePacer::new(frames),
            frame_sync,
            command_buffers,
            scene: None,
            ui_buffers,
            uniform_buffers,
            scene_sets,
            bloom_set,
            composite_set,
            pipelines,
            layouts,
            descriptor_pool,
            set_layouts,
            sampler,
            hdr_framebuffer,
            bloom_framebuffer,
            composite_framebuffers,
            hdr_target,
            bloom_target,
            msaa_target,
            depth_buffer,
            msaa_samples,
            hdr_pass,
            bloom_pass,
            composite_pass,
            swapchain,
            command_pool,
            clear_color: config.clear_color,
            device,
            physical,
            surface,
            instance,
        })
    }

    fn build_pipelines(
        device: &Rc<LogicalDevice>,
        config: &RendererConfig,
        layouts: &Layouts,
        hdr_pass: &RenderPass,
        bloom_pass: &RenderPass,
        composite_pass: &RenderPass,
        msaa_samples: vk::SampleCountFlags,
    ) -> VulkanResult<Pipelines> {
        let load = |shader: &crate::core::config::ShaderConfig| -> VulkanResult<(ShaderModule, ShaderModule)> {
            Ok((
                ShaderModule::from_file(device.clone(), Path::new(&shader.vertex_shader_path))?,
                ShaderModule::from_file(device.clone(), Path::new(&shader.fragment_shader_path))?,
            ))
        };

        let (scene_vs, scene_fs) = load(&config.shaders.scene)?;
        let (bloom_vs, bloom_fs) = load(&config.shaders.bloom)?;
        let (composite_vs, composite_fs) = load(&config.shaders.composite)?;
        let (ui_vs, ui_fs) = load(&config.shaders.ui)?;

        Ok(Pipelines {
            scene: GraphicsPipeline::new(
                device.clone(),
                &layouts.scene,
                hdr_pass,
                0,
                &scene_vs,
                &scene_fs,
                &FixedFunctionState {
                    samples: msaa_samples,
                    ..FixedFunctionState::opaque_3d(
                        vertex_layout::vertex_binding(),
                        vertex_layout::vertex_attributes(),
                    )
                },
            )?,
            bloom: GraphicsPipeline::new(
                device.clone(),
                &layouts.bloom,
                bloom_pass,
                0,
                &bloom_vs,
                &bloom_fs,
                &FixedFunctionState::fullscreen(),
            )?,
            composite: GraphicsPipeline::new(
                device.clone(),
                &layouts.composite,
                composite_pass,
                0,
                &composite_vs,
                &composite_fs,
                &FixedFunctionState::fullscreen(),
            )?,
            ui: GraphicsPipeline::new(
                device.clone(),
                &layouts.ui,
                composite_pass,
                1,
                &ui_vs,
                &ui_fs,
                &FixedFunctionState::ui_overlay(
                    vertex_layout::ui_vertex_binding(),
                    vertex_layout::ui_vertex_attributes(),
                ),
            )?,
        })
    }

    /// Upload a loaded scene's geometry, replacing any previous scene
    pub fn upload_scene(&mut self, scene: &LoadedScene) -> VulkanResult<()> {
        // The old geometry may still be referenced by in-flight frames.
        self.device.wait_idle()?;

        let vertex_buffer = VertexBuffer::new(
            self.device.clone(),
            &self.physical.memory_properties,
            &self.command_pool,
            &scene.vertices,
        )?;
        let index_buffer = IndexBuffer::new(
            self.device.clone(),
            &self.physical.memory_properties,
            &self.command_pool,
            &scene.indices,
        )?;

        log::debug!(
            "Scene uploaded: {} vertices, {} indices, {} nodes",
            scene.vertices.len(),
            scene.indices.len(),
            scene.nodes.len()
        );

        self.scene = Some(SceneGeometry {
            loaded: scene.clone(),
            vertex_buffer,
            index_buffer,
        });
        Ok(())
    }

    /// Upload RGBA8 pixels as a sampled texture usable by callers
    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> VulkanResult<Texture> {
        Texture::from_rgba8(
            self.device.clone(),
            &self.physical.memory_properties,
            &self.command_pool,
            width,
            height,
            pixels,
        )
    }

    /// Render and present one frame
    ///
    /// A `SwapchainStale` result is not an error; the caller recreates the
    /// swapchain and retries on the next loop iteration.
    pub fn draw_frame(
        &mut self,
        camera: Option<&CameraMatrices>,
        ui: Option<&UiDrawData>,
    ) -> VulkanResult<FrameStatus> {
        let mut pacer = self.pacer;
        let mut frame = RendererFrame {
            renderer: self,
            camera: camera.copied().unwrap_or_default(),
            ui,
        };
        let status = pacer.run_frame(&mut frame);
        self.pacer = pacer;

        let status = status?;
        if status == FrameStatus::SwapchainStale {
            log::warn!("Swapchain stale; recreation required");
        }
        Ok(status)
    }

    /// Rebuild the swapchain and everything sized to it
    ///
    /// Blocks while the window is minimized, waits for the device to go
    /// idle, then renegotiates against the surface's current state.
    pub fn recreate_swapchain(&mut self, window: &mut Window) -> VulkanResult<()> {
        window.wait_while_minimized();
        self.device.wait_idle()?;

        let (width, height) = window.get_framebuffer_size();
        self.composite_framebuffers.clear();
        self.swapchain
            .recreate(self.physical.device, &self.surface, width, height)?;

        let extent = self.swapchain.extent();
        self.depth_buffer = DepthBuffer::new(
            self.device.clone(),
            &self.instance.instance,
            self.physical.device,
            &self.physical.memory_properties,
            extent,
            self.msaa_samples,
        )?;
        self.hdr_target = crate::render::vulkan::RenderTarget::new(
            self.device.clone(),
            &self.physical.memory_properties,
            extent,
            HDR_COLOR_FORMAT,
            vk::SampleCountFlags::TYPE_1,
        )?;
        self.bloom_target = crate::render::vulkan::RenderTarget::new(
            self.device.clone(),
            &self.physical.memory_properties,
            extent,
            HDR_COLOR_FORMAT,
            vk::SampleCountFlags::TYPE_1,
        )?;
        self.msaa_target = if self.msaa_samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(crate::render::vulkan::RenderTarget::new(
                self.device.clone(),
                &self.physical.memory_properties,
                extent,
                HDR_COLOR_FORMAT,
                self.msaa_samples,
            )?)
        };

        let hdr_attachments = match &self.msaa_target {
            Some(msaa) => vec![
                msaa.view(),
                self.depth_buffer.view(),
                self.hdr_target.view(),
            ],
            None => vec![self.hdr_target.view(), self.depth_buffer.view()],
        };
        self.hdr_framebuffer = Framebuffer::new(
            self.device.clone(),
            &self.hdr_pass,
            &hdr_attachments,
            extent,
        )?;
        self.bloom_framebuffer = Framebuffer::new(
            self.device.clone(),
            &self.bloom_pass,
            &[self.bloom_target.view()],
            extent,
        )?;
        self.composite_framebuffers = self
            .swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(self.device.clone(), &self.composite_pass, &[view], extent)
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        // The post-process inputs moved to new images.
        self.descriptor_pool.write_combined_image_sampler(
            self.bloom_set,
            0,
            self.hdr_target.view(),
            self.sampler.handle(),
        );
        self.descriptor_pool.write_combined_image_sampler(
            self.composite_set,
            0,
            self.hdr_target.view(),
            self.sampler.handle(),
        );
        self.descriptor_pool.write_combined_image_sampler(
            self.composite_set,
            1,
            self.bloom_target.view(),
            self.sampler.handle(),
        );

        log::debug!("Swapchain recreated: {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Block until the GPU has finished all submitted work
    ///
    /// Called before shutdown so teardown never races in-flight frames.
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.device.wait_idle()
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let extent = self.swapchain.extent();
        let mut recorder =
            CommandRecorder::begin(&self.device.device, self.command_buffers[slot])?;

        let color_clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        };
        let depth_clear = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };
        let black_clear = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        };

        // One clear value per attachment; the resolve target's is ignored
        // because it is loaded with DONT_CARE.
        let hdr_clears: Vec<vk::ClearValue> = if self.msaa_target.is_some() {
            vec![color_clear, depth_clear, black_clear]
        } else {
            vec![color_clear, depth_clear]
        };

        // Stage 1: scene geometry into the HDR target.
        {
            let mut pass = recorder.begin_render_pass(
                &self.hdr_pass,
                &self.hdr_framebuffer,
                extent,
                &hdr_clears,
            );
            pass.bind_pipeline(&self.pipelines.scene);
            pass.set_viewport_scissor(extent);
            pass.bind_descriptor_sets(self.layouts.scene.handle(), &[self.scene_sets[slot]]);

            if let Some(scene) = &self.scene {
                pass.bind_vertex_buffer(scene.vertex_buffer.buffer.handle());
                pass.bind_index_buffer(
                    scene.index_buffer.buffer.handle(),
                    scene.index_buffer.index_type,
                );

                for (node_index, node) in scene.loaded.nodes.iter().enumerate() {
                    if node.primitives.is_empty() {
                        continue;
                    }
                    let model: [[f32; 4]; 4] = scene.loaded.world_matrix(node_index).into();
                    for prim in &node.primitives {
                        let base_color = prim
                            .material
                            .and_then(|m| scene.loaded.materials.get(m))
                            .map(|m| m.base_color)
                            .unwrap_or([1.0, 1.0, 1.0, 1.0]);
                        pass.push_constants(
                            self.layouts.scene.handle(),
                            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                            &ScenePush { model, base_color },
                        );
                        pass.draw_indexed(prim.index_count, prim.first_index, 0);
                    }
                }
            }
        }

        // Stage 2: bright-pass extraction from the HDR target.
        {
            let mut pass = recorder.begin_render_pass(
                &self.bloom_pass,
                &self.bloom_framebuffer,
                extent,
                &[black_clear],
            );
            pass.bind_pipeline(&self.pipelines.bloom);
            pass.set_viewport_scissor(extent);
            pass.bind_descriptor_sets(self.layouts.bloom.handle(), &[self.bloom_set]);
            pass.draw(3);
        }

        // Stage 3: tone-map to the swapchain image, then overlay the UI in
        // the second subpass.
        {
            let mut pass = recorder.begin_render_pass(
                &self.composite_pass,
                &self.composite_framebuffers[image_index as usize],
                extent,
                &[black_clear],
            );
            pass.bind_pipeline(&self.pipelines.composite);
            pass.set_viewport_scissor(extent);
            pass.bind_descriptor_sets(self.layouts.composite.handle(), &[self.composite_set]);
            pass.draw(3);

            pass.next_subpass();
            if self.ui_buffers[slot].index_count > 0 {
                pass.bind_pipeline(&self.pipelines.ui);
                pass.set_viewport_scissor(extent);
                pass.push_constants(
                    self.layouts.ui.handle(),
                    vk::ShaderStageFlags::VERTEX,
                    &[extent.width as f32, extent.height as f32],
                );
                pass.bind_vertex_buffer(self.ui_buffers[slot].vertex.handle());
                pass.bind_index_buffer(self.ui_buffers[slot].index.handle(), vk::IndexType::UINT32);
                pass.draw_indexed(self.ui_buffers[slot].index_count, 0, 0);
            }
        }

        recorder.end()?;
        Ok(())
    }

    fn upload_ui(&mut self, slot: usize, ui: Option<&UiDrawData>) -> VulkanResult<()> {
        let buffers = &mut self.ui_buffers[slot];
        match ui {
            Some(data) if !data.indices.is_empty() => {
                if data.vertices.len() > UI_MAX_VERTICES || data.indices.len() > UI_MAX_INDICES {
                    return Err(VulkanError::InvalidOperation {
                        reason: format!(
                            "UI batch too large: {} vertices / {} indices (max {} / {})",
                            data.vertices.len(),
                            data.indices.len(),
                            UI_MAX_VERTICES,
                            UI_MAX_INDICES
                        ),
                    });
                }
                buffers.vertex.write(&data.vertices)?;
                buffers.index.write(&data.indices)?;
                buffers.index_count = data.indices.len() as u32;
            }
            _ => buffers.index_count = 0,
        }
        Ok(())
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        // Runs before the field drops, so sync objects, pipelines, and
        // framebuffers are never destroyed while the GPU still uses them.
        if let Err(e) = self.wait_idle() {
            log::error!("Failed to wait for device idle during teardown: {e}");
        }
    }
}

/// One frame's view of the renderer, driven by the pacer
struct RendererFrame<'a> {
    renderer: &'a mut VulkanRenderer,
    camera: CameraMatrices,
    ui: Option<&'a UiDrawData>,
}

impl FrameDriver for RendererFrame<'_> {
    fn wait_for_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.frame_sync[slot].in_flight.wait()
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<Option<u32>> {
        let semaphore = self.renderer.frame_sync[slot].image_available.handle();
        match self.renderer.swapchain.acquire_next_image(semaphore)? {
            // A suboptimal image is still presentable; render this frame and
            // let the present result drive recreation.
            Some((index, _suboptimal)) => Ok(Some(index)),
            None => Ok(None),
        }
    }

    fn reset_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.renderer.frame_sync[slot].in_flight.reset()
    }

    fn record_and_submit(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        self.renderer.uniform_buffers[slot].write_value(&self.camera);
        self.renderer.upload_ui(slot, self.ui)?;
        self.renderer.record_commands(slot, image_index)?;

        let sync = &self.renderer.frame_sync[slot];
        let wait_semaphores = [sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.renderer.command_buffers[slot]];
        let signal_semaphores = [sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.renderer
                .device
                .device
                .queue_submit(
                    self.renderer.device.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight.handle(),
                )
                .map_err(VulkanError::Api)
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<bool> {
        let semaphore = self.renderer.frame_sync[slot].render_finished.handle();
        self.renderer.swapchain.present(
            self.renderer.device.present_queue,
            image_index,
            semaphore,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_sample_count_is_kept() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        assert_eq!(pick_sample_count(4, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(pick_sample_count(8, supported), vk::SampleCountFlags::TYPE_8);
    }

    #[test]
    fn unsupported_request_halves_to_the_next_supported_count() {
        let supported = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2;
        assert_eq!(pick_sample_count(8, supported), vk::SampleCountFlags::TYPE_2);
    }

    #[test]
    fn single_sampling_is_always_available() {
        assert_eq!(
            pick_sample_count(4, vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
        assert_eq!(
            pick_sample_count(1, vk::SampleCountFlags::TYPE_8),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn non_power_of_two_requests_round_down() {
        let supported = vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(pick_sample_count(6, supported), vk::SampleCountFlags::TYPE_4);
    }
}
