//! Render pass construction from a data-level graph description
//!
//! Passes are described as plain data (`RenderPassDesc`) and validated before
//! any driver call: every attachment reference must index into the attachment
//! list and every non-external dependency endpoint must name a real subpass.
//! Presets cover the engine's fixed stages: forward, HDR scene, bloom
//! extraction, and the two-subpass composite+UI pass.

use ash::vk;
use std::rc::Rc;

use crate::render::vulkan::{LogicalDevice, VulkanError, VulkanResult};

/// Color format used for HDR intermediate targets
pub const HDR_COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// One attachment slot in a render pass
#[derive(Debug, Clone, Copy)]
pub struct AttachmentDesc {
    /// Pixel format of the attachment image
    pub format: vk::Format,
    /// Sample count (MSAA)
    pub samples: vk::SampleCountFlags,
    /// Load behavior at subpass start
    pub load_op: vk::AttachmentLoadOp,
    /// Store behavior at subpass end
    pub store_op: vk::AttachmentStoreOp,
    /// Layout the image is in when the pass begins
    pub initial_layout: vk::ImageLayout,
    /// Layout the image is transitioned to when the pass ends
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    /// Cleared color attachment transitioning to the given final layout
    pub fn color(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout,
        }
    }

    /// Cleared depth attachment whose contents are discarded after the pass
    pub fn depth(format: vk::Format) -> Self {
        Self {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

/// One subpass, referring to attachments by index into the pass's list
#[derive(Debug, Clone, Default)]
pub struct SubpassDesc {
    /// Attachment indices written as color outputs
    pub color_attachments: Vec<u32>,
    /// Attachment index used for depth/stencil, if any
    pub depth_attachment: Option<u32>,
    /// Attachment indices read as input attachments
    pub input_attachments: Vec<u32>,
    /// MSAA resolve targets; empty, or one per color attachment
    pub resolve_attachments: Vec<u32>,
}

/// Execution/memory dependency between two subpasses (or EXTERNAL)
#[derive(Debug, Clone, Copy)]
pub struct DependencyDesc {
    /// Source subpass index or `vk::SUBPASS_EXTERNAL`
    pub src_subpass: u32,
    /// Destination subpass index or `vk::SUBPASS_EXTERNAL`
    pub dst_subpass: u32,
    /// Stages that must complete in the source
    pub src_stage_mask: vk::PipelineStageFlags,
    /// Stages that wait in the destination
    pub dst_stage_mask: vk::PipelineStageFlags,
    /// Memory access made available by the source
    pub src_access_mask: vk::AccessFlags,
    /// Memory access made visible to the destination
    pub dst_access_mask: vk::AccessFlags,
}

/// Complete data-level description of a render pass
#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    /// Attachment slots, referenced by index from subpasses
    pub attachments: Vec<AttachmentDesc>,
    /// Subpasses in execution order
    pub subpasses: Vec<SubpassDesc>,
    /// Subpass dependencies
    pub dependencies: Vec<DependencyDesc>,
}

impl RenderPassDesc {
    /// Check the index invariants before handing the description to the driver
    pub fn validate(&self) -> VulkanResult<()> {
        if self.subpasses.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "render pass has no subpasses".to_string(),
            });
        }

        let attachment_count = self.attachments.len() as u32;
        for (i, subpass) in self.subpasses.iter().enumerate() {
            let all_refs = subpass
                .color_attachments
                .iter()
                .chain(subpass.input_attachments.iter())
                .chain(subpass.resolve_attachments.iter())
                .chain(subpass.depth_attachment.iter());
            for &index in all_refs {
                if index >= attachment_count {
                    return Err(VulkanError::InvalidOperation {
                        reason: format!(
                            "subpass {} references attachment {} but only {} exist",
                            i, index, attachment_count
                        ),
                    });
                }
            }
            if !subpass.resolve_attachments.is_empty()
                && subpass.resolve_attachments.len() != subpass.color_attachments.len()
            {
                return Err(VulkanError::InvalidOperation {
                    reason: format!(
                        "subpass {} has {} resolve attachments for {} color attachments",
                        i,
                        subpass.resolve_attachments.len(),
                        subpass.color_attachments.len()
                    ),
                });
            }
        }

        let subpass_count = self.subpasses.len() as u32;
        for (i, dep) in self.dependencies.iter().enumerate() {
            for endpoint in [dep.src_subpass, dep.dst_subpass] {
                if endpoint != vk::SUBPASS_EXTERNAL && endpoint >= subpass_count {
                    return Err(VulkanError::InvalidOperation {
                        reason: format!(
                            "dependency {} references subpass {} but only {} exist",
                            i, endpoint, subpass_count
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Single-subpass forward pass: one color attachment, one depth attachment
    pub fn forward(color_format: vk::Format, depth_format: vk::Format) -> Self {
        Self {
            attachments: vec![
                AttachmentDesc::color(color_format, vk::ImageLayout::PRESENT_SRC_KHR),
                AttachmentDesc::depth(depth_format),
            ],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![0],
                depth_attachment: Some(1),
                ..Default::default()
            }],
            dependencies: vec![DependencyDesc {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                src_access_mask: vk::AccessFlags::empty(),
                dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            }],
        }
    }

    /// HDR scene pass rendering into a sampled float target
    ///
    /// With multisampling the pass renders into a transient MSAA color
    /// attachment and resolves into the sampled single-sample target; the
    /// depth attachment always matches the color sample count.
    pub fn hdr(depth_format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        let dependency = DependencyDesc {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        };
        // The next pass samples the target; the implicit subpass→EXTERNAL
        // dependency ends at BOTTOM_OF_PIPE with no access mask and would
        // not make the color writes visible to fragment-shader reads.
        let to_sampled = Self::color_writes_to_sampled_reads();

        if samples == vk::SampleCountFlags::TYPE_1 {
            return Self {
                attachments: vec![
                    AttachmentDesc::color(
                        HDR_COLOR_FORMAT,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    ),
                    AttachmentDesc::depth(depth_format),
                ],
                subpasses: vec![SubpassDesc {
                    color_attachments: vec![0],
                    depth_attachment: Some(1),
                    ..Default::default()
                }],
                dependencies: vec![dependency, to_sampled],
            };
        }

        let msaa_color = AttachmentDesc {
            samples,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ..AttachmentDesc::color(HDR_COLOR_FORMAT, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        };
        let msaa_depth = AttachmentDesc {
            samples,
            ..AttachmentDesc::depth(depth_format)
        };
        let resolve = AttachmentDesc {
            load_op: vk::AttachmentLoadOp::DONT_CARE,
            ..AttachmentDesc::color(HDR_COLOR_FORMAT, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        };

        Self {
            attachments: vec![msaa_color, msaa_depth, resolve],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![0],
                depth_attachment: Some(1),
                resolve_attachments: vec![2],
                ..Default::default()
            }],
            dependencies: vec![dependency, to_sampled],
        }
    }

    /// Bloom extraction pass writing a sampled HDR target
    pub fn bloom() -> Self {
        Self {
            attachments: vec![AttachmentDesc::color(
                HDR_COLOR_FORMAT,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![0],
                ..Default::default()
            }],
            dependencies: vec![
                DependencyDesc {
                    src_subpass: vk::SUBPASS_EXTERNAL,
                    dst_subpass: 0,
                    src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
                    dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    src_access_mask: vk::AccessFlags::SHADER_READ,
                    dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                },
                Self::color_writes_to_sampled_reads(),
            ],
        }
    }

    /// Dependency making a pass's color writes visible to the fragment-shader
    /// reads of whatever samples the target next
    fn color_writes_to_sampled_reads() -> DependencyDesc {
        DependencyDesc {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access_mask: vk::AccessFlags::SHADER_READ,
        }
    }

    /// Final pass over the swapchain image: subpass 0 composites the scene
    /// and bloom, subpass 1 draws the UI overlay on top
    ///
    /// Both subpasses are screen-space draws, so the pass carries no depth
    /// attachment.
    pub fn composite(swapchain_format: vk::Format) -> Self {
        Self {
            attachments: vec![AttachmentDesc::color(
                swapchain_format,
                vk::ImageLayout::PRESENT_SRC_KHR,
            )],
            subpasses: vec![
                SubpassDesc {
                    color_attachments: vec![0],
                    ..Default::default()
                },
                SubpassDesc {
                    color_attachments: vec![0],
                    ..Default::default()
                },
            ],
            dependencies: vec![
                DependencyDesc {
                    src_subpass: vk::SUBPASS_EXTERNAL,
                    dst_subpass: 0,
                    src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    src_access_mask: vk::AccessFlags::empty(),
                    dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                },
                // UI must see the composited color before blending over it.
                DependencyDesc {
                    src_subpass: 0,
                    dst_subpass: 1,
                    src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                },
            ],
        }
    }
}

/// Compiled render pass with RAII cleanup
pub struct RenderPass {
    device: Rc<LogicalDevice>,
    render_pass: vk::RenderPass,
    subpass_count: u32,
}

impl RenderPass {
    /// Validate a description and compile it into a driver render pass
    pub fn new(device: Rc<LogicalDevice>, desc: &RenderPassDesc) -> VulkanResult<Self> {
        desc.validate()?;

        let attachments: Vec<vk::AttachmentDescription> = desc
            .attachments
            .iter()
            .map(|a| vk::AttachmentDescription {
                format: a.format,
                samples: a.samples,
                load_op: a.load_op,
                store_op: a.store_op,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: a.initial_layout,
                final_layout: a.final_layout,
                ..Default::default()
            })
            .collect();

        // Reference arrays must stay alive until create_render_pass returns.
        struct SubpassRefs {
            color: Vec<vk::AttachmentReference>,
            input: Vec<vk::AttachmentReference>,
            resolve: Vec<vk::AttachmentReference>,
            depth: Option<vk::AttachmentReference>,
        }

        let all_refs: Vec<SubpassRefs> = desc
            .subpasses
            .iter()
            .map(|subpass| SubpassRefs {
                color: subpass
                    .color_attachments
                    .iter()
                    .map(|&index| vk::AttachmentReference {
                        attachment: index,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    })
                    .collect(),
                input: subpass
                    .input_attachments
                    .iter()
                    .map(|&index| vk::AttachmentReference {
                        attachment: index,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    })
                    .collect(),
                resolve: subpass
                    .resolve_attachments
                    .iter()
                    .map(|&index| vk::AttachmentReference {
                        attachment: index,
                        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    })
                    .collect(),
                depth: subpass.depth_attachment.map(|index| vk::AttachmentReference {
                    attachment: index,
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                }),
            })
            .collect();

        let subpasses: Vec<vk::SubpassDescription> = all_refs
            .iter()
            .map(|refs| {
                let mut builder = vk::SubpassDescription::builder()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&refs.color)
                    .input_attachments(&refs.input);
                if !refs.resolve.is_empty() {
                    builder = builder.resolve_attachments(&refs.resolve);
                }
                if let Some(depth) = &refs.depth {
                    builder = builder.depth_stencil_attachment(depth);
                }
                builder.build()
            })
            .collect();

        let dependencies: Vec<vk::SubpassDependency> = desc
            .dependencies
            .iter()
            .map(|d| vk::SubpassDependency {
                src_subpass: d.src_subpass,
                dst_subpass: d.dst_subpass,
                src_stage_mask: d.src_stage_mask,
                dst_stage_mask: d.dst_stage_mask,
                src_access_mask: d.src_access_mask,
                dst_access_mask: d.dst_access_mask,
                ..Default::default()
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe {
            device
                .device
                .create_render_pass(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!(
            "Render pass created ({} attachments, {} subpasses)",
            desc.attachments.len(),
            desc.subpasses.len()
        );

        Ok(Self {
            device,
            render_pass,
            subpass_count: desc.subpasses.len() as u32,
        })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Number of subpasses in this pass
    pub fn subpass_count(&self) -> u32 {
        self.subpass_count
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_pass_validation() {
        let depth = vk::Format::D32_SFLOAT;
        let color = vk::Format::B8G8R8A8_SRGB;
        assert!(RenderPassDesc::forward(color, depth).validate().is_ok());
        assert!(RenderPassDesc::hdr(depth, vk::SampleCountFlags::TYPE_1)
            .validate()
            .is_ok());
        assert!(RenderPassDesc::hdr(depth, vk::SampleCountFlags::TYPE_4)
            .validate()
            .is_ok());
        assert!(RenderPassDesc::bloom().validate().is_ok());
        assert!(RenderPassDesc::composite(color).validate().is_ok());
    }

    #[test]
    fn composite_has_ui_overlay_subpass() {
        let desc = RenderPassDesc::composite(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(desc.subpasses.len(), 2);
        // Overlay draws over the already composited color, no depth test.
        assert!(desc.subpasses[1].depth_attachment.is_none());
        let chained = desc
            .dependencies
            .iter()
            .find(|d| d.src_subpass == 0 && d.dst_subpass == 1);
        assert!(chained.is_some());
    }

    #[test]
    fn multisampled_hdr_pass_resolves_into_a_sampled_target() {
        let desc = RenderPassDesc::hdr(vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.attachments.len(), 3);
        assert_eq!(desc.subpasses[0].resolve_attachments, vec![2]);
        // The resolve target stays single sampled and readable.
        assert_eq!(desc.attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            desc.attachments[2].final_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
        assert_eq!(desc.attachments[1].samples, vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn sampled_passes_order_color_writes_before_shader_reads() {
        // HDR and bloom targets are sampled by the following pass; each pass
        // must carry a 0→EXTERNAL dependency making its color writes visible
        // to fragment-shader reads, since the implicit exit dependency does
        // not cover SHADER_READ.
        let descs = [
            RenderPassDesc::hdr(vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_1),
            RenderPassDesc::hdr(vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_4),
            RenderPassDesc::bloom(),
        ];
        for desc in &descs {
            let handoff = desc.dependencies.iter().find(|d| {
                d.src_subpass == 0 && d.dst_subpass == vk::SUBPASS_EXTERNAL
            });
            let handoff = handoff.expect("missing write-to-read hand-off dependency");
            assert!(handoff
                .src_stage_mask
                .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
            assert!(handoff
                .src_access_mask
                .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
            assert!(handoff
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
            assert!(handoff.dst_access_mask.contains(vk::AccessFlags::SHADER_READ));
        }
    }

    #[test]
    fn out_of_range_attachment_reference_is_rejected() {
        let desc = RenderPassDesc {
            attachments: vec![AttachmentDesc::color(
                vk::Format::B8G8R8A8_SRGB,
                vk::ImageLayout::PRESENT_SRC_KHR,
            )],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![1],
                ..Default::default()
            }],
            dependencies: vec![],
        };
        assert!(desc.validate().is_err());
    }

    #[test]
    fn out_of_range_dependency_subpass_is_rejected() {
        let mut desc = RenderPassDesc::bloom();
        desc.dependencies.push(DependencyDesc {
            src_subpass: 0,
            dst_subpass: 3,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::empty(),
        });
        assert!(desc.validate().is_err());
    }

    #[test]
    fn mismatched_resolve_count_is_rejected() {
        let desc = RenderPassDesc {
            attachments: vec![
                AttachmentDesc::color(
                    vk::Format::B8G8R8A8_SRGB,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                ),
                AttachmentDesc::color(
                    vk::Format::B8G8R8A8_SRGB,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                ),
            ],
            subpasses: vec![SubpassDesc {
                color_attachments: vec![0],
                resolve_attachments: vec![0, 1],
                ..Default::default()
            }],
            dependencies: vec![],
        };
        assert!(desc.validate().is_err());
    }

    #[test]
    fn empty_subpass_list_is_rejected() {
        let desc = RenderPassDesc::default();
        assert!(desc.validate().is_err());
    }
}
