//! Rendering subsystem
//!
//! `window` wraps the GLFW windowing collaborator; `vulkan` holds the GPU
//! object graph (instance through frame loop).

pub mod mesh;
pub mod window;
pub mod vulkan;

pub use mesh::Vertex;
