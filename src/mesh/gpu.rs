// GPU-side mesh: vertex, index and indirect draw buffers plus a pipeline

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use gpu_allocator::MemoryLocation;
use std::path::PathBuf;

use super::{MeshData, MeshFileHeader};
use crate::backend::pipeline::ShaderStageDesc;
use crate::backend::{Buffer, DefaultPipeline, GraphicsPipelineDesc, PipelineHandle, VulkanContext};
use crate::error::EngineResult;

/// Matches VkDrawIndexedIndirectCommand.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PushConstants {
    mvp: Mat4,
}

/// Command count followed by one LOD-0 draw per mesh.
pub fn indirect_commands(data: &MeshData) -> Vec<u8> {
    let commands: Vec<DrawIndexedIndirect> = data
        .meshes
        .iter()
        .map(|m| DrawIndexedIndirect {
            index_count: m.lod_indices_count(0),
            instance_count: 1,
            first_index: m.index_offset,
            vertex_offset: m.vertex_offset as i32,
            first_instance: 0,
        })
        .collect();

    let mut bytes = Vec::with_capacity(4 + commands.len() * std::mem::size_of::<DrawIndexedIndirect>());
    bytes.extend_from_slice(&(commands.len() as u32).to_ne_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(&commands));
    bytes
}

pub struct GpuMesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    indirect_buffer: Buffer,
    pipeline: PipelineHandle,
    mesh_count: u32,
}

impl GpuMesh {
    /// Upload `data` through staging buffers and build its pipeline.
    pub fn new(
        ctx: &mut VulkanContext,
        header: &MeshFileHeader,
        data: &MeshData,
        vertex_shader: impl Into<PathBuf>,
        fragment_shader: impl Into<PathBuf>,
        depth_format: Option<vk::Format>,
    ) -> EngineResult<Self> {
        let indirect = indirect_commands(data);

        let vertex_buffer = upload(
            ctx,
            &data.vertex_data,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "mesh vertices",
        )?;
        let index_buffer = upload(
            ctx,
            bytemuck::cast_slice(&data.index_data),
            vk::BufferUsageFlags::INDEX_BUFFER,
            "mesh indices",
        )?;
        let indirect_buffer = upload(
            ctx,
            &indirect,
            vk::BufferUsageFlags::INDIRECT_BUFFER,
            "mesh indirect",
        )?;

        let desc = GraphicsPipelineDesc {
            shaders: vec![
                ShaderStageDesc::vertex(vertex_shader),
                ShaderStageDesc::fragment(fragment_shader),
            ],
            vertex_bindings: data.streams.vk_bindings(),
            vertex_attributes: data.streams.vk_attributes(),
            push_constant_ranges: vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<PushConstants>() as u32,
            }],
            depth_format,
            ..Default::default()
        };
        let pipeline = ctx.create_graphics_pipeline(&DefaultPipeline::new(desc))?;

        log::info!(
            "Uploaded {} meshes ({} indices, {} vertex bytes)",
            header.mesh_count,
            header.index_data_size / 4,
            header.vertex_data_size
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            indirect_buffer,
            pipeline,
            mesh_count: header.mesh_count,
        })
    }

    pub fn draw(&self, ctx: &VulkanContext, cmd: vk::CommandBuffer, mvp: Mat4) {
        let device = ctx.raw_device();
        let stride = std::mem::size_of::<DrawIndexedIndirect>() as u32;
        // Skip the leading command count
        let first = std::mem::size_of::<u32>() as vk::DeviceSize;

        self.pipeline.bind(device, cmd);
        self.pipeline
            .push_constants(device, cmd, vk::ShaderStageFlags::VERTEX, &PushConstants { mvp });

        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.handle], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.handle, 0, vk::IndexType::UINT32);

            if ctx.device().features.multi_draw_indirect == vk::TRUE {
                device.cmd_draw_indexed_indirect(cmd, self.indirect_buffer.handle, first, self.mesh_count, stride);
            } else {
                for i in 0..self.mesh_count {
                    let offset = first + vk::DeviceSize::from(i * stride);
                    device.cmd_draw_indexed_indirect(cmd, self.indirect_buffer.handle, offset, 1, stride);
                }
            }
        }
    }
}

fn upload(ctx: &VulkanContext, bytes: &[u8], usage: vk::BufferUsageFlags, name: &str) -> EngineResult<Buffer> {
    let size = bytes.len().max(4) as vk::DeviceSize;
    let mut staging = ctx.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu, name)?;
    let buffer = ctx.create_buffer(size, usage | vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuOnly, name)?;
    if !bytes.is_empty() {
        ctx.upload_buffer(bytes, &mut staging, &buffer)?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::VertexInput;

    #[test]
    fn test_indirect_commands_one_per_mesh_after_count() {
        let mut data = MeshData {
            streams: VertexInput::default(),
            ..Default::default()
        };
        data.push_mesh(&[0; 48], 4, &[vec![0, 1, 2, 2, 3, 0], vec![0, 1, 2]], 0);
        data.push_mesh(&[0; 36], 3, &[vec![0, 1, 2]], 0);

        let bytes = indirect_commands(&data);
        assert_eq!(bytes.len(), 4 + 2 * 20);
        assert_eq!(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 2);

        let commands: Vec<DrawIndexedIndirect> = bytes[4..]
            .chunks_exact(20)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(
            commands[0],
            DrawIndexedIndirect {
                index_count: 6,
                instance_count: 1,
                first_index: 0,
                vertex_offset: 0,
                first_instance: 0,
            }
        );
        assert_eq!(commands[1].first_index, 9);
        assert_eq!(commands[1].vertex_offset, 4);
        assert_eq!(commands[1].index_count, 3);
    }
}
