// Hello-triangle: vertices come from gl_VertexIndex, no buffers

use anyhow::Result;
use ash::vk;

use vulkan_engine::backend::pipeline::ShaderStageDesc;
use vulkan_engine::backend::{GraphicsPipelineDesc, PipelineBuilder, PipelineHandle};
use vulkan_engine::{Application, VulkanContext};

/// Default states with culling off, so winding does not matter.
struct TrianglePipeline {
    desc: GraphicsPipelineDesc,
}

impl PipelineBuilder for TrianglePipeline {
    fn desc(&self) -> &GraphicsPipelineDesc {
        &self.desc
    }

    fn rasterization(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
    }
}

pub struct TriangleApp {
    clear_color: [f32; 4],
    pipeline: Option<PipelineHandle>,
}

impl TriangleApp {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            clear_color,
            pipeline: None,
        }
    }
}

impl Application for TriangleApp {
    fn on_init(&mut self, ctx: &mut VulkanContext) -> Result<()> {
        let pipeline = TrianglePipeline {
            desc: GraphicsPipelineDesc {
                shaders: vec![
                    ShaderStageDesc::vertex("shaders/triangle.vert.spv"),
                    ShaderStageDesc::fragment("shaders/triangle.frag.spv"),
                ],
                ..Default::default()
            },
        };
        self.pipeline = Some(ctx.create_graphics_pipeline(&pipeline)?);

        log::info!("Triangle demo ready");
        Ok(())
    }

    fn on_render(&mut self, ctx: &mut VulkanContext, cmd: vk::CommandBuffer) {
        ctx.begin_rendering(cmd, self.clear_color, None);

        if let Some(pipeline) = self.pipeline {
            pipeline.bind(ctx.raw_device(), cmd);
            unsafe { ctx.raw_device().cmd_draw(cmd, 3, 1, 0, 0) };
        }

        ctx.end_rendering(cmd);
    }
}
