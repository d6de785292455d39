//! Vertex input descriptions for the engine's vertex formats

use ash::vk;
use std::mem::offset_of;

use crate::render::mesh::{UiVertex, Vertex};

/// Binding description for [`Vertex`] at binding 0
pub fn vertex_binding() -> Vec<vk::VertexInputBindingDescription> {
    vec![vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }]
}

/// Attribute descriptions for [`Vertex`]: position, normal, texcoord
pub fn vertex_attributes() -> Vec<vk::VertexInputAttributeDescription> {
    vec![
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, normal) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, tex_coord) as u32,
        },
    ]
}

/// Binding description for [`UiVertex`] at binding 0
pub fn ui_vertex_binding() -> Vec<vk::VertexInputBindingDescription> {
    vec![vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<UiVertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }]
}

/// Attribute descriptions for [`UiVertex`]: position, texcoord, color
pub fn ui_vertex_attributes() -> Vec<vk::VertexInputAttributeDescription> {
    vec![
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(UiVertex, position) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(UiVertex, tex_coord) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32B32A32_SFLOAT,
            offset: offset_of!(UiVertex, color) as u32,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_matches_attribute_layout() {
        let binding = vertex_binding();
        assert_eq!(binding[0].stride, 32);
        let attrs = vertex_attributes();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
    }

    #[test]
    fn ui_vertex_stride_matches_attribute_layout() {
        let binding = ui_vertex_binding();
        assert_eq!(binding[0].stride, 32);
        let attrs = ui_vertex_attributes();
        assert_eq!(attrs[2].offset, 16);
    }
}
