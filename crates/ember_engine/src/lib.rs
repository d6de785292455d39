//! # Ember Engine
//!
//! A real-time 3D rendering engine built directly on Vulkan, featuring a
//! multi-pass HDR pipeline (HDR capture, bloom extraction, composite with a
//! UI overlay subpass) with explicit frame synchronization.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ember_engine::core::config::RendererConfig;
//! use ember_engine::render::window::Window;
//! use ember_engine::render::vulkan::VulkanRenderer;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     ember_engine::foundation::logging::init();
//!
//!     let config = RendererConfig::default();
//!     let mut window = Window::new(&config.application_name, 1280, 720)?;
//!     let mut renderer = VulkanRenderer::new(&mut window, &config)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.draw_frame(None, None)?;
//!     }
//!     renderer.wait_idle()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod core;
pub mod foundation;
pub mod assets;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::core::config::{Config, ConfigError, RendererConfig, ShaderConfig};
    pub use crate::foundation::math::{Mat4, Vec2, Vec3, Vec4};
    pub use crate::assets::scene::{LoadedScene, SceneDocument};
    pub use crate::render::window::Window;
    pub use crate::render::vulkan::{FrameStatus, VulkanError, VulkanRenderer, VulkanResult};
}
