//! Mesh vertex formats shared between the asset layer and the GPU backend.

/// Standard scene vertex: position, normal, texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub tex_coord: [f32; 2],
}

// Safe: Vertex is a #[repr(C)] struct of f32 arrays with no padding.
unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

/// UI overlay vertex: screen position, texture coordinate, color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UiVertex {
    /// Position in framebuffer pixel coordinates
    pub position: [f32; 2],
    /// Font/icon atlas coordinate
    pub tex_coord: [f32; 2],
    /// Per-vertex RGBA color
    pub color: [f32; 4],
}

// Safe: UiVertex is a #[repr(C)] struct of f32 arrays with no padding.
unsafe impl bytemuck::Pod for UiVertex {}
unsafe impl bytemuck::Zeroable for UiVertex {}
