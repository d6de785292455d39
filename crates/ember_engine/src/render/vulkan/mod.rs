//! Vulkan backend
//!
//! GPU objects are RAII wrappers created in strict dependency order
//! (instance → device → swapchain → render passes → framebuffers →
//! pipelines → sync) and destroyed in exact reverse order via `Drop`.

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod renderer;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod vertex_layout;

pub use buffer::{Buffer, IndexBuffer, StagingBuffer, UniformBuffer, VertexBuffer};
pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, Sampler};
pub use device::{LogicalDevice, PhysicalDeviceInfo, QueueFamilyIndices};
pub use framebuffer::{DepthBuffer, Framebuffer, RenderTarget};
pub use instance::VulkanInstance;
pub use pipeline::{FixedFunctionState, GraphicsPipeline, PipelineLayout, ShaderModule};
pub use render_pass::{AttachmentDesc, DependencyDesc, RenderPass, RenderPassDesc, SubpassDesc};
pub use renderer::{pick_sample_count, CameraMatrices, UiDrawData, VulkanRenderer};
pub use surface::Surface;
pub use swapchain::{Swapchain, SwapchainParams};
pub use sync::{Fence, FrameDriver, FramePacer, FrameStatus, FrameSync, Semaphore};
pub use texture::Texture;

use ash::vk;
use thiserror::Error;

/// Vulkan backend errors
///
/// These are fatal: a failed instance, device, swapchain, render pass, or
/// pipeline creation indicates an unsupported host environment and aborts
/// startup. Transient presentation conditions are not errors; they surface
/// as [`FrameStatus::SwapchainStale`].
#[derive(Error, Debug)]
pub enum VulkanError {
    /// Vulkan API call returned an error code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A required instance or device extension is missing
    #[error("Missing required extension: {name}")]
    MissingExtension {
        /// Extension name as reported to the driver
        name: String,
    },

    /// A requested validation layer is not installed on the host
    #[error("Validation layer unavailable: {name}")]
    ValidationLayerUnavailable {
        /// Layer name
        name: String,
    },

    /// No enumerated physical device scored above zero
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Vulkan object creation or loading failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// No suitable memory type found for an allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
