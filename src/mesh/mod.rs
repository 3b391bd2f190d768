// Mesh cache - binary on-disk mesh format
//
// Layout, in native byte order:
//   MeshFileHeader
//   VertexInput           (fixed size, describes the vertex streams)
//   Mesh * mesh_count     (fixed-size descriptors)
//   index data            (u32 indices, index_data_size bytes)
//   vertex data           (vertex_data_size bytes)
//
// Offsets inside a Mesh are relative to the shared index/vertex blocks.

pub mod gpu;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

pub use gpu::GpuMesh;

pub const MESH_FILE_MAGIC: u32 = 0x1234_5678;
pub const MAX_LODS: usize = 7;
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
pub const MAX_VERTEX_BUFFERS: usize = 16;

#[derive(Error, Debug)]
pub enum MeshCacheError {
    #[error("Mesh cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad mesh cache magic value {0:#010x}")]
    BadMagic(u32),

    #[error("Mesh cache truncated while reading {0}")]
    Truncated(&'static str),

    #[error("Index data size {0} is not a multiple of 4")]
    MisalignedIndexData(u32),

    #[error("Mesh cache {0} does not fit in 32 bits")]
    TooLarge(&'static str),
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct MeshFileHeader {
    /// Integrity check, always MESH_FILE_MAGIC
    pub magic: u32,
    /// Number of mesh descriptors following the header
    pub mesh_count: u32,
    pub index_data_size: u32,
    pub vertex_data_size: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    /// Raw vk::Format value
    pub format: i32,
    _pad: u32,
    pub offset: u64,
}

impl VertexAttribute {
    pub fn new(location: u32, binding: u32, format: vk::Format, offset: u64) -> Self {
        Self {
            location,
            binding,
            format: format.as_raw(),
            _pad: 0,
            offset,
        }
    }

    pub fn vk_format(&self) -> vk::Format {
        vk::Format::from_raw(self.format)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct VertexInputBinding {
    pub stride: u32,
}

/// Vertex stream layout. Unused slots are zeroed; the first attribute with an
/// undefined format (or binding with zero stride) ends the list.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct VertexInput {
    pub attributes: [VertexAttribute; MAX_VERTEX_ATTRIBUTES],
    pub input_bindings: [VertexInputBinding; MAX_VERTEX_BUFFERS],
}

impl Default for VertexInput {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl VertexInput {
    pub fn attribute_count(&self) -> u32 {
        self.attributes
            .iter()
            .take_while(|a| a.vk_format() != vk::Format::UNDEFINED)
            .count() as u32
    }

    pub fn binding_count(&self) -> u32 {
        self.input_bindings.iter().take_while(|b| b.stride != 0).count() as u32
    }

    /// Sum of the attribute format sizes.
    pub fn vertex_size(&self) -> u32 {
        self.attributes
            .iter()
            .take_while(|a| a.vk_format() != vk::Format::UNDEFINED)
            .map(|a| vertex_format_size(a.vk_format()))
            .sum()
    }

    pub fn vk_bindings(&self) -> Vec<vk::VertexInputBindingDescription> {
        self.input_bindings[..self.binding_count() as usize]
            .iter()
            .enumerate()
            .map(|(i, b)| vk::VertexInputBindingDescription {
                binding: i as u32,
                stride: b.stride,
                input_rate: vk::VertexInputRate::VERTEX,
            })
            .collect()
    }

    /// Locations follow attribute order.
    pub fn vk_attributes(&self) -> Vec<vk::VertexInputAttributeDescription> {
        self.attributes[..self.attribute_count() as usize]
            .iter()
            .enumerate()
            .map(|(i, a)| vk::VertexInputAttributeDescription {
                location: i as u32,
                binding: a.binding,
                format: a.vk_format(),
                offset: a.offset as u32,
            })
            .collect()
    }
}

/// Size in bytes of one vertex attribute of `format`; 0 if unsupported.
pub fn vertex_format_size(format: vk::Format) -> u32 {
    match format {
        vk::Format::R8_UNORM | vk::Format::R8_SNORM | vk::Format::R8_UINT => 1,
        vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT | vk::Format::R16_UINT => 2,
        vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R16G16_UNORM
        | vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::A2B10G10R10_SNORM_PACK32
        | vk::Format::A2B10G10R10_UNORM_PACK32 => 4,
        vk::Format::R32G32_SFLOAT | vk::Format::R32G32_UINT | vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32_SFLOAT | vk::Format::R32G32B32_UINT => 12,
        vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT => 16,
        _ => 0,
    }
}

/// One mesh inside the cache.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct Mesh {
    pub lod_count: u32,
    /// Indices in all previous meshes
    pub index_offset: u32,
    /// Vertices in all previous meshes
    pub vertex_offset: u32,
    /// Vertices of every LOD together
    pub vertex_count: u32,
    /// Start of each LOD's indices relative to `index_offset`. The entry after
    /// the last LOD marks the end.
    pub lod_offset: [u32; MAX_LODS + 1],
    pub material_id: u32,
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            lod_count: 1,
            ..Self::zeroed()
        }
    }
}

impl Mesh {
    pub fn lod_indices_count(&self, lod: u32) -> u32 {
        if lod >= self.lod_count {
            return 0;
        }
        let lod = lod as usize;
        match (self.lod_offset.get(lod), self.lod_offset.get(lod + 1)) {
            (Some(start), Some(end)) => end.saturating_sub(*start),
            _ => 0,
        }
    }
}

/// In-memory form of a mesh cache file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub streams: VertexInput,
    pub index_data: Vec<u32>,
    pub vertex_data: Vec<u8>,
    pub meshes: Vec<Mesh>,
}

impl MeshData {
    pub fn header(&self) -> Result<MeshFileHeader, MeshCacheError> {
        let size = |n: usize, what| u32::try_from(n).map_err(|_| MeshCacheError::TooLarge(what));
        Ok(MeshFileHeader {
            magic: MESH_FILE_MAGIC,
            mesh_count: size(self.meshes.len(), "mesh count")?,
            index_data_size: size(self.index_data.len() * std::mem::size_of::<u32>(), "index data")?,
            vertex_data_size: size(self.vertex_data.len(), "vertex data")?,
        })
    }

    /// Append a mesh with one index list per LOD (LOD 0 first).
    ///
    /// `vertices` must hold `vertex_count` vertices laid out as `streams`
    /// describes.
    pub fn push_mesh(&mut self, vertices: &[u8], vertex_count: u32, lods: &[Vec<u32>], material_id: u32) -> Mesh {
        let lods = &lods[..lods.len().min(MAX_LODS)];

        let mut mesh = Mesh {
            lod_count: lods.len() as u32,
            index_offset: self.index_data.len() as u32,
            vertex_offset: self.meshes.iter().map(|m| m.vertex_count).sum(),
            vertex_count,
            material_id,
            ..Mesh::default()
        };

        let mut num_indices = 0u32;
        for (l, indices) in lods.iter().enumerate() {
            mesh.lod_offset[l] = num_indices;
            self.index_data.extend_from_slice(indices);
            num_indices += indices.len() as u32;
        }
        mesh.lod_offset[lods.len()] = num_indices;

        self.vertex_data.extend_from_slice(vertices);
        self.meshes.push(mesh);
        mesh
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), MeshCacheError> {
        let header = self.header()?;

        writer.write_all(bytemuck::bytes_of(&header))?;
        writer.write_all(bytemuck::bytes_of(&self.streams))?;
        writer.write_all(bytemuck::cast_slice(&self.meshes))?;
        writer.write_all(bytemuck::cast_slice(&self.index_data))?;
        writer.write_all(&self.vertex_data)?;
        Ok(())
    }

    /// Read a cache written by `write_to`, returning its header too.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<(MeshFileHeader, Self), MeshCacheError> {
        let mut header = MeshFileHeader::zeroed();
        read_exact(reader, bytemuck::bytes_of_mut(&mut header), "header")?;

        if header.magic != MESH_FILE_MAGIC {
            return Err(MeshCacheError::BadMagic(header.magic));
        }
        if header.index_data_size % 4 != 0 {
            return Err(MeshCacheError::MisalignedIndexData(header.index_data_size));
        }

        let mut streams = VertexInput::zeroed();
        read_exact(reader, bytemuck::bytes_of_mut(&mut streams), "vertex streams")?;

        // Grown one record at a time so a corrupt count cannot force a huge allocation
        let mut meshes = Vec::new();
        for _ in 0..header.mesh_count {
            let mut mesh = Mesh::zeroed();
            read_exact(reader, bytemuck::bytes_of_mut(&mut mesh), "mesh descriptors")?;
            meshes.push(mesh);
        }

        let index_bytes = read_block(reader, header.index_data_size, "index data")?;
        let index_data = index_bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let vertex_data = read_block(reader, header.vertex_data_size, "vertex data")?;

        Ok((
            header,
            Self {
                streams,
                index_data,
                vertex_data,
                meshes,
            },
        ))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MeshCacheError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        log::info!("Saved mesh cache {:?} ({} meshes)", path, self.meshes.len());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<(MeshFileHeader, Self), MeshCacheError> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path).inspect_err(|e| {
            log::error!("Cannot open {:?}: {}", path, e);
        })?);
        let loaded = Self::read_from(&mut reader)?;
        log::info!("Loaded mesh cache {:?} ({} meshes)", path, loaded.0.mesh_count);
        Ok(loaded)
    }

    /// True if `path` exists and starts with a header carrying the magic value.
    pub fn is_valid_file(path: impl AsRef<Path>) -> bool {
        let Ok(mut file) = File::open(path) else {
            return false;
        };
        let mut header = MeshFileHeader::zeroed();
        file.read_exact(bytemuck::bytes_of_mut(&mut header)).is_ok() && header.magic == MESH_FILE_MAGIC
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), MeshCacheError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => MeshCacheError::Truncated(what),
        _ => MeshCacheError::Io(e),
    })
}

fn read_block<R: Read>(reader: &mut R, size: u32, what: &'static str) -> Result<Vec<u8>, MeshCacheError> {
    let mut block = Vec::new();
    reader.take(u64::from(size)).read_to_end(&mut block)?;
    if block.len() != size as usize {
        return Err(MeshCacheError::Truncated(what));
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn position_normal_streams() -> VertexInput {
        let mut streams = VertexInput::default();
        streams.attributes[0] = VertexAttribute::new(0, 0, vk::Format::R32G32B32_SFLOAT, 0);
        streams.attributes[1] = VertexAttribute::new(1, 0, vk::Format::R32G32B32_SFLOAT, 12);
        streams.input_bindings[0] = VertexInputBinding { stride: 24 };
        streams
    }

    fn sample() -> MeshData {
        let mut data = MeshData {
            streams: position_normal_streams(),
            ..Default::default()
        };
        let quad: Vec<u8> = (0..4 * 24).map(|i| i as u8).collect();
        data.push_mesh(&quad, 4, &[vec![0, 1, 2, 2, 3, 0], vec![0, 1, 2]], 7);
        let tri: Vec<u8> = (0..3 * 24).map(|i| (255 - i) as u8).collect();
        data.push_mesh(&tri, 3, &[vec![0, 1, 2]], 1);
        data
    }

    #[test]
    fn test_record_sizes_match_file_layout() {
        assert_eq!(std::mem::size_of::<MeshFileHeader>(), 16);
        assert_eq!(std::mem::size_of::<VertexAttribute>(), 24);
        assert_eq!(std::mem::size_of::<VertexInput>(), 16 * 24 + 16 * 4);
        assert_eq!(std::mem::size_of::<Mesh>(), 4 * (4 + MAX_LODS + 1 + 1));
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let data = sample();
        let mut bytes = Vec::new();
        data.write_to(&mut bytes).unwrap();

        let (header, loaded) = MeshData::read_from(&mut Cursor::new(&bytes)).unwrap();

        assert_eq!(header, data.header().unwrap());
        assert_eq!(header.mesh_count, 2);
        assert_eq!(header.index_data_size, 10 * 4);
        assert_eq!(header.vertex_data_size, 7 * 24);
        assert_eq!(loaded.meshes, data.meshes);
        assert_eq!(loaded.index_data, data.index_data);
        assert_eq!(loaded.vertex_data, data.vertex_data);
        assert_eq!(loaded.streams, data.streams);
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join(format!("vulkan-engine-mesh-{}.cache", std::process::id()));
        let data = sample();

        data.save(&path).unwrap();
        assert!(MeshData::is_valid_file(&path));
        let (_, loaded) = MeshData::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, data);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes[0..4].copy_from_slice(&0xdead_beefu32.to_ne_bytes());

        match MeshData::read_from(&mut Cursor::new(&bytes)) {
            Err(MeshCacheError::BadMagic(0xdead_beef)) => {}
            other => panic!("unexpected: {:?}", other.map(|(h, _)| h)),
        }
    }

    #[test]
    fn test_truncated_file_names_missing_part() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);

        match MeshData::read_from(&mut Cursor::new(&bytes)) {
            Err(MeshCacheError::Truncated(what)) => assert_eq!(what, "vertex data"),
            other => panic!("unexpected: {:?}", other.map(|(h, _)| h)),
        }

        let header_only = &bytes[..8];
        assert!(matches!(
            MeshData::read_from(&mut Cursor::new(header_only)),
            Err(MeshCacheError::Truncated("header"))
        ));
    }

    #[test]
    fn test_missing_file_is_not_valid() {
        assert!(!MeshData::is_valid_file(
            std::env::temp_dir().join("vulkan-engine-no-such-mesh.cache")
        ));
    }

    #[test]
    fn test_push_mesh_offsets() {
        let data = sample();
        let first = data.meshes[0];
        let second = data.meshes[1];

        assert_eq!(first.lod_count, 2);
        assert_eq!(first.lod_offset[..3], [0, 6, 9]);
        assert_eq!(first.lod_indices_count(0), 6);
        assert_eq!(first.lod_indices_count(1), 3);
        assert_eq!(first.lod_indices_count(2), 0);
        assert_eq!(first.material_id, 7);

        assert_eq!(second.index_offset, 9);
        assert_eq!(second.vertex_offset, 4);
        assert_eq!(second.lod_indices_count(0), 3);
    }

    #[test]
    fn test_vertex_input_counts_and_size() {
        let streams = position_normal_streams();
        assert_eq!(streams.attribute_count(), 2);
        assert_eq!(streams.binding_count(), 1);
        assert_eq!(streams.vertex_size(), 24);

        let attrs = streams.vk_attributes();
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(streams.vk_bindings()[0].stride, 24);

        assert_eq!(VertexInput::default().attribute_count(), 0);
    }

    #[test]
    fn test_vertex_format_sizes() {
        assert_eq!(vertex_format_size(vk::Format::R32G32B32_SFLOAT), 12);
        assert_eq!(vertex_format_size(vk::Format::R16G16_SFLOAT), 4);
        assert_eq!(vertex_format_size(vk::Format::A2B10G10R10_SNORM_PACK32), 4);
        assert_eq!(vertex_format_size(vk::Format::UNDEFINED), 0);
    }
}
