// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.
//
// Fixed-function state comes from a PipelineBuilder. Each state has a default
// implementation; variants override only the steps they change. Pipelines
// target dynamic rendering, so no render pass or framebuffer is involved.

use ash::vk;
use std::ffi::CStr;
use std::path::PathBuf;
use std::sync::Arc;

use super::shader::ShaderModule;
use super::VulkanDevice;
use crate::error::{EngineError, EngineResult};

const SHADER_ENTRY: &CStr = c"main";

#[derive(Debug, Clone)]
pub struct ShaderStageDesc {
    pub path: PathBuf,
    pub stage: vk::ShaderStageFlags,
}

impl ShaderStageDesc {
    pub fn vertex(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stage: vk::ShaderStageFlags::VERTEX,
        }
    }

    pub fn fragment(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stage: vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineDesc {
    pub shaders: Vec<ShaderStageDesc>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    /// UNDEFINED means "use the swapchain format"
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
}

/// Supplies the pipeline description and every fixed-function state.
pub trait PipelineBuilder {
    fn desc(&self) -> &GraphicsPipelineDesc;

    fn input_assembly(&self) -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
    }

    fn rasterization(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
    }

    fn multisample(&self) -> vk::PipelineMultisampleStateCreateInfo<'static> {
        vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
    }

    fn depth_stencil(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS) // Closer objects win
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
    }

    fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    /// Viewport and scissor are set per draw
    fn dynamic_states(&self) -> Vec<vk::DynamicState> {
        vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
    }
}

/// Triangle pipeline with every default state.
pub struct DefaultPipeline {
    pub desc: GraphicsPipelineDesc,
}

impl DefaultPipeline {
    pub fn new(desc: GraphicsPipelineDesc) -> Self {
        Self { desc }
    }
}

impl PipelineBuilder for DefaultPipeline {
    fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }
}

/// Line-list pipeline for debug geometry: no culling, fixed line width.
pub struct LinePipeline {
    pub desc: GraphicsPipelineDesc,
    pub line_width: f32,
}

impl LinePipeline {
    pub fn new(desc: GraphicsPipelineDesc) -> Self {
        Self { desc, line_width: 1.0 }
    }
}

impl PipelineBuilder for LinePipeline {
    fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    fn input_assembly(&self) -> vk::PipelineInputAssemblyStateCreateInfo<'static> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::LINE_LIST)
            .primitive_restart_enable(false)
    }

    fn rasterization(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            // Widths above 1.0 need the wide_lines feature
            .line_width(self.line_width)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
    }
}

/// Owned pipeline and layout.
pub struct Pipeline {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    /// Build a graphics pipeline from `builder`.
    ///
    /// Shader modules only live for the duration of this call.
    pub fn new(
        device: Arc<VulkanDevice>,
        builder: &dyn PipelineBuilder,
        swapchain_format: vk::Format,
    ) -> EngineResult<Self> {
        let desc = builder.desc();
        if desc.shaders.is_empty() {
            return Err(EngineError::Pipeline("no shader stages".into()));
        }

        let modules = desc
            .shaders
            .iter()
            .map(|s| ShaderModule::from_file(device.clone(), &s.path))
            .collect::<EngineResult<Vec<_>>>()?;

        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .shaders
            .iter()
            .zip(&modules)
            .map(|(s, m)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(s.stage)
                    .module(m.handle)
                    .name(SHADER_ENTRY)
            })
            .collect();

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_bindings)
            .vertex_attribute_descriptions(&desc.vertex_attributes);

        let input_assembly = builder.input_assembly();
        let rasterizer = builder.rasterization();
        let multisampling = builder.multisample();
        let depth_stencil = builder.depth_stencil();

        // Counts only; the actual rectangles are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let color_blend_attachments = [builder.color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = builder.dynamic_states();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&desc.set_layouts)
            .push_constant_ranges(&desc.push_constant_ranges);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }?;

        let color_formats = [resolve_color_format(desc.color_format, swapchain_format)];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(desc.depth_format.unwrap_or(vk::Format::UNDEFINED));

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let created = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        match created {
            Ok(pipelines) => Ok(Self {
                handle: pipelines[0],
                layout,
                device,
            }),
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                Err(e.into())
            }
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            pipeline: self.handle,
            layout: self.layout,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.handle, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Non-owning reference to a pipeline kept alive by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineHandle {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl PipelineHandle {
    pub fn bind(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe { device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline) };
    }

    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) {
        unsafe {
            device.cmd_push_constants(cmd, self.layout, stages, 0, bytemuck::bytes_of(data));
        }
    }
}

fn resolve_color_format(requested: vk::Format, swapchain_format: vk::Format) -> vk::Format {
    if requested == vk::Format::UNDEFINED {
        swapchain_format
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> GraphicsPipelineDesc {
        GraphicsPipelineDesc {
            shaders: vec![
                ShaderStageDesc::vertex("shaders/triangle.vert.spv"),
                ShaderStageDesc::fragment("shaders/triangle.frag.spv"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_default_states() {
        let builder = DefaultPipeline::new(desc());

        assert_eq!(builder.input_assembly().topology, vk::PrimitiveTopology::TRIANGLE_LIST);

        let raster = builder.rasterization();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(raster.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);

        let depth = builder.depth_stencil();
        assert_eq!(depth.depth_test_enable, vk::TRUE);
        assert_eq!(depth.depth_write_enable, vk::TRUE);
        assert_eq!(depth.depth_compare_op, vk::CompareOp::LESS);

        let blend = builder.color_blend_attachment();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);

        assert_eq!(
            builder.dynamic_states(),
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
        assert_eq!(builder.multisample().rasterization_samples, vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_line_pipeline_overrides_topology_and_raster_only() {
        let mut line = LinePipeline::new(desc());
        line.line_width = 2.0;
        let default = DefaultPipeline::new(desc());

        assert_eq!(line.input_assembly().topology, vk::PrimitiveTopology::LINE_LIST);
        let raster = line.rasterization();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(raster.line_width, 2.0);

        // Untouched steps keep the defaults
        assert_eq!(line.depth_stencil().depth_compare_op, default.depth_stencil().depth_compare_op);
        assert_eq!(
            line.color_blend_attachment().dst_color_blend_factor,
            default.color_blend_attachment().dst_color_blend_factor
        );
        assert_eq!(line.dynamic_states(), default.dynamic_states());
    }

    #[test]
    fn test_color_format_falls_back_to_swapchain() {
        assert_eq!(
            resolve_color_format(vk::Format::UNDEFINED, vk::Format::B8G8R8A8_SRGB),
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            resolve_color_format(vk::Format::R16G16B16A16_SFLOAT, vk::Format::B8G8R8A8_SRGB),
            vk::Format::R16G16B16A16_SFLOAT
        );
    }
}
