// Mesh viewer: loads (or builds and caches) a mesh file, draws it with
// indirect commands over a line grid.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use std::path::{Path, PathBuf};
use winit::event::{MouseButton, MouseScrollDelta};
use winit::keyboard::KeyCode;

use vulkan_engine::backend::pipeline::ShaderStageDesc;
use vulkan_engine::backend::{Buffer, GraphicsPipelineDesc, LinePipeline, PipelineHandle, Texture};
use vulkan_engine::mesh::{GpuMesh, MeshData, VertexAttribute};
use vulkan_engine::{Application, VulkanContext};

use super::camera::FirstPersonCamera;

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
const FOV_Y_DEGREES: f32 = 45.0;
const GRID_HALF_EXTENT: i32 = 10;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LinePushConstants {
    mvp: Mat4,
}

/// Position + normal, interleaved in one stream.
fn demo_mesh_data() -> MeshData {
    let mut data = MeshData::default();
    data.streams.attributes[0] = VertexAttribute::new(0, 0, vk::Format::R32G32B32_SFLOAT, 0);
    data.streams.attributes[1] = VertexAttribute::new(1, 0, vk::Format::R32G32B32_SFLOAT, 12);
    data.streams.input_bindings[0].stride = std::mem::size_of::<MeshVertex>() as u32;
    data
}

/// Axis-aligned box with outward-facing counter-clockwise faces.
fn push_box(data: &mut MeshData, center: Vec3, half_size: Vec3, material_id: u32) {
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for normal in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
        // u x v == normal keeps the quad counter-clockwise seen from outside
        let u = normal.any_orthonormal_vector();
        let v = normal.cross(u);
        let base = vertices.len() as u32;

        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = center + (normal + u * su + v * sv) * half_size;
            vertices.push(MeshVertex {
                position: p.to_array(),
                normal: normal.to_array(),
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    // Coarse LOD drops the bottom face
    let coarse: Vec<u32> = indices
        .chunks_exact(6)
        .enumerate()
        .filter(|(face, _)| *face != 3)
        .flat_map(|(_, quad)| quad.iter().copied())
        .collect();

    data.push_mesh(
        bytemuck::cast_slice(&vertices),
        vertices.len() as u32,
        &[indices, coarse],
        material_id,
    );
}

pub fn build_demo_meshes() -> MeshData {
    let mut data = demo_mesh_data();
    push_box(&mut data, Vec3::new(0.0, 0.5, 0.0), Vec3::splat(0.5), 0);
    push_box(&mut data, Vec3::new(2.0, 0.25, -1.0), Vec3::splat(0.25), 1);
    push_box(&mut data, Vec3::new(-2.0, 1.0, 1.0), Vec3::new(0.25, 1.0, 0.25), 2);
    data
}

/// Line list on the XZ plane, axes highlighted.
pub fn grid_lines(half_extent: i32, spacing: f32) -> Vec<LineVertex> {
    let edge = half_extent as f32 * spacing;
    let mut lines = Vec::with_capacity((half_extent as usize * 2 + 1) * 4);

    for i in -half_extent..=half_extent {
        let offset = i as f32 * spacing;
        let (x_color, z_color) = if i == 0 {
            ([0.9, 0.2, 0.2], [0.2, 0.2, 0.9])
        } else {
            ([0.4; 3], [0.4; 3])
        };

        // Parallel to X
        lines.push(LineVertex { position: [-edge, 0.0, offset], color: x_color });
        lines.push(LineVertex { position: [edge, 0.0, offset], color: x_color });
        // Parallel to Z
        lines.push(LineVertex { position: [offset, 0.0, -edge], color: z_color });
        lines.push(LineVertex { position: [offset, 0.0, edge], color: z_color });
    }
    lines
}

/// Mesh cache path: build and save when missing or invalid, then load.
fn load_or_build_cache(path: &Path) -> Result<(vulkan_engine::mesh::MeshFileHeader, MeshData)> {
    if !MeshData::is_valid_file(path) {
        log::info!("Mesh cache {:?} missing or invalid, rebuilding", path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
        }
        build_demo_meshes()
            .save(path)
            .with_context(|| format!("Failed to write mesh cache {:?}", path))?;
    }

    MeshData::load(path).with_context(|| format!("Failed to load mesh cache {:?}", path))
}

struct Grid {
    vertices: Buffer,
    vertex_count: u32,
    pipeline: PipelineHandle,
}

pub struct MeshApp {
    clear_color: [f32; 4],
    cache_path: PathBuf,
    camera: FirstPersonCamera,
    cursor: Vec2,
    // GPU resources; dropped before the context
    mesh: Option<GpuMesh>,
    grid: Option<Grid>,
    depth: Option<Texture>,
}

impl MeshApp {
    pub fn new(clear_color: [f32; 4], cache_path: PathBuf) -> Self {
        let mut camera = FirstPersonCamera::new(Vec3::new(0.0, 3.0, 6.0), Vec3::new(0.0, 0.5, 0.0), Vec3::Y);
        camera.move_speed = 3.0;

        Self {
            clear_color,
            cache_path,
            camera,
            cursor: Vec2::ZERO,
            mesh: None,
            grid: None,
            depth: None,
        }
    }

    fn update_projection(&mut self, extent: vk::Extent2D) {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        self.camera.set_perspective(FOV_Y_DEGREES.to_radians(), aspect, 0.1, 100.0);
    }

    fn create_grid(ctx: &mut VulkanContext) -> Result<Grid> {
        let lines = grid_lines(GRID_HALF_EXTENT, 1.0);
        let vertices = Buffer::with_data(
            ctx.device().clone(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &lines,
            "grid vertices",
        )?;

        let stride = std::mem::size_of::<LineVertex>() as u32;
        let desc = GraphicsPipelineDesc {
            shaders: vec![
                ShaderStageDesc::vertex("shaders/line.vert.spv"),
                ShaderStageDesc::fragment("shaders/line.frag.spv"),
            ],
            vertex_bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            vertex_attributes: vec![
                vk::VertexInputAttributeDescription {
                    location: 0,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 0,
                },
                vk::VertexInputAttributeDescription {
                    location: 1,
                    binding: 0,
                    format: vk::Format::R32G32B32_SFLOAT,
                    offset: 12,
                },
            ],
            push_constant_ranges: vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<LinePushConstants>() as u32,
            }],
            depth_format: Some(DEPTH_FORMAT),
            ..Default::default()
        };
        let pipeline = ctx.create_graphics_pipeline(&LinePipeline::new(desc))?;

        Ok(Grid {
            vertices,
            vertex_count: lines.len() as u32,
            pipeline,
        })
    }
}

impl Application for MeshApp {
    fn on_init(&mut self, ctx: &mut VulkanContext) -> Result<()> {
        let (header, data) = load_or_build_cache(&self.cache_path)?;
        log::info!(
            "Mesh cache: {} meshes, {} index bytes, {} vertex bytes",
            header.mesh_count,
            header.index_data_size,
            header.vertex_data_size
        );

        self.mesh = Some(GpuMesh::new(
            ctx,
            &header,
            &data,
            "shaders/mesh.vert.spv",
            "shaders/mesh.frag.spv",
            Some(DEPTH_FORMAT),
        )?);
        self.grid = Some(Self::create_grid(ctx)?);
        self.depth = Some(ctx.create_depth_texture(DEPTH_FORMAT)?);
        self.update_projection(ctx.swapchain().extent());

        log::info!("Mesh demo ready (WASD to move, hold right mouse to look)");
        Ok(())
    }

    fn on_update(&mut self, ctx: &mut VulkanContext, delta_seconds: f32) {
        let extent = ctx.swapchain().extent();
        let size = Vec2::new(extent.width.max(1) as f32, extent.height.max(1) as f32);
        self.camera.update(delta_seconds, self.cursor / size);
    }

    fn on_render(&mut self, ctx: &mut VulkanContext, cmd: vk::CommandBuffer) {
        ctx.begin_rendering(cmd, self.clear_color, self.depth.as_ref());

        let mvp = self.camera.view_projection();

        if let Some(ref grid) = self.grid {
            let device = ctx.raw_device();
            grid.pipeline.bind(device, cmd);
            grid.pipeline
                .push_constants(device, cmd, vk::ShaderStageFlags::VERTEX, &LinePushConstants { mvp });
            unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[grid.vertices.handle], &[0]);
                device.cmd_draw(cmd, grid.vertex_count, 1, 0, 0);
            }
        }

        if let Some(ref mesh) = self.mesh {
            mesh.draw(ctx, cmd, mvp);
        }

        ctx.end_rendering(cmd);
    }

    fn on_resize(&mut self, ctx: &mut VulkanContext, extent: vk::Extent2D) -> Result<()> {
        // Old depth image is idle: the swapchain rebuild waited on the device
        self.depth = None;
        self.depth = Some(ctx.create_depth_texture(DEPTH_FORMAT)?);
        self.update_projection(extent);
        Ok(())
    }

    fn on_cleanup(&mut self, _ctx: &mut VulkanContext) {
        self.depth = None;
        self.grid = None;
        self.mesh = None;
    }

    fn on_key(&mut self, key: KeyCode, pressed: bool) {
        let keys = &mut self.camera.keys;
        match key {
            KeyCode::KeyW | KeyCode::ArrowUp => keys.forward = pressed,
            KeyCode::KeyS | KeyCode::ArrowDown => keys.back = pressed,
            KeyCode::KeyA | KeyCode::ArrowLeft => keys.left = pressed,
            KeyCode::KeyD | KeyCode::ArrowRight => keys.right = pressed,
            _ => {}
        }
    }

    fn on_mouse_button(&mut self, button: MouseButton, pressed: bool) {
        if button == MouseButton::Right {
            self.camera.looking = pressed;
        }
    }

    fn on_cursor_moved(&mut self, x: f64, y: f64) {
        self.cursor = Vec2::new(x as f32, y as f32);
    }

    fn on_scroll(&mut self, delta: MouseScrollDelta) {
        let steps = match delta {
            MouseScrollDelta::LineDelta(_, y) => y,
            MouseScrollDelta::PixelDelta(p) => (p.y / 40.0) as f32,
        };
        self.camera.move_speed = (self.camera.move_speed * 1.1f32.powf(steps)).clamp(0.1, 50.0);
    }
}
