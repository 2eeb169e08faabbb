// =============================================================================
// MESH - Vertex layout, built-in quad, OBJ loading and the geometry cache
// =============================================================================
//
// Parsed OBJ geometry is written next to the model as `<model>.cache` and
// reused on later runs. The cache has no contract beyond "if it reads back
// cleanly, trust it": anything else is discarded and rebuilt from the OBJ.

use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::path::{Path, PathBuf};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, pos) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, color) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, tex_coord) as u32),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

const CACHE_MAGIC: [u8; 4] = *b"VOLC";
const CACHE_VERSION: u32 = 1;
const CACHE_HEADER_LEN: usize = 16;

impl Mesh {
    /// Textured quad filling clip space.
    pub fn quad() -> Self {
        Self {
            vertices: vec![
                Vertex::new([-1.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0]),
                Vertex::new([1.0, -1.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
                Vertex::new([1.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
                Vertex::new([-1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [0.0, 1.0]),
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Load an OBJ model, going through `<model>.cache` when possible.
    pub fn load(path: &Path) -> Result<Self> {
        let cache = cache_path(path);

        match Self::read_cache(&cache) {
            Ok(mesh) => {
                log::info!(
                    "Loaded {} vertices / {} indices from {:?}",
                    mesh.vertices.len(),
                    mesh.indices.len(),
                    cache
                );
                return Ok(mesh);
            }
            Err(e) if cache.exists() => log::warn!("Ignoring geometry cache {:?}: {:#}", cache, e),
            Err(_) => log::debug!("No geometry cache at {:?}", cache),
        }

        let mesh = Self::load_obj(path)?;
        if let Err(e) = mesh.write_cache(&cache) {
            log::warn!("Failed to write geometry cache {:?}: {:#}", cache, e);
        }
        Ok(mesh)
    }

    fn load_obj(path: &Path) -> Result<Self> {
        let (models, _) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
        )
        .with_context(|| format!("Failed to load model {:?}", path))?;

        let mut mesh = Mesh {
            vertices: Vec::new(),
            indices: Vec::new(),
        };

        for model in &models {
            let m = &model.mesh;
            let base = mesh.vertices.len() as u32;
            let count = m.positions.len() / 3;

            for i in 0..count {
                let tex_coord = match m.texcoords.get(2 * i..2 * i + 2) {
                    Some(uv) => [uv[0], 1.0 - uv[1]],
                    None => [0.0, 0.0],
                };
                let color = match m.vertex_color.get(3 * i..3 * i + 3) {
                    Some(c) => [c[0], c[1], c[2]],
                    None => [1.0, 1.0, 1.0],
                };
                mesh.vertices.push(Vertex::new(
                    [m.positions[3 * i], m.positions[3 * i + 1], m.positions[3 * i + 2]],
                    color,
                    tex_coord,
                ));
            }
            mesh.indices.extend(m.indices.iter().map(|i| base + i));
        }

        if mesh.indices.is_empty() {
            bail!("Model {:?} contains no triangles", path);
        }

        log::info!(
            "Parsed {:?}: {} vertices, {} indices",
            path,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Serialize as header + raw vertex bytes + raw index bytes.
    pub fn write_cache(&self, path: &Path) -> Result<()> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&self.indices);

        let mut out = Vec::with_capacity(CACHE_HEADER_LEN + vertex_bytes.len() + index_bytes.len());
        out.extend_from_slice(&CACHE_MAGIC);
        out.extend_from_slice(&CACHE_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.vertices.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.indices.len() as u32).to_le_bytes());
        out.extend_from_slice(vertex_bytes);
        out.extend_from_slice(index_bytes);

        std::fs::write(path, out).with_context(|| format!("Failed to write {:?}", path))
    }

    pub fn read_cache(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        if bytes.len() < CACHE_HEADER_LEN {
            bail!("truncated header");
        }

        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        if bytes[0..4] != CACHE_MAGIC {
            bail!("bad magic");
        }
        if word(4) != CACHE_VERSION {
            bail!("unsupported version {}", word(4));
        }
        let vertex_count = word(8) as usize;
        let index_count = word(12) as usize;

        let vertex_len = vertex_count * std::mem::size_of::<Vertex>();
        let index_len = index_count * std::mem::size_of::<u32>();
        if bytes.len() != CACHE_HEADER_LEN + vertex_len + index_len {
            bail!(
                "expected {} bytes of geometry, found {}",
                vertex_len + index_len,
                bytes.len() - CACHE_HEADER_LEN
            );
        }

        let body = &bytes[CACHE_HEADER_LEN..];
        let mut vertices = vec![Vertex::zeroed(); vertex_count];
        bytemuck::cast_slice_mut::<Vertex, u8>(&mut vertices).copy_from_slice(&body[..vertex_len]);
        let mut indices = vec![0u32; index_count];
        bytemuck::cast_slice_mut::<u32, u8>(&mut indices).copy_from_slice(&body[vertex_len..]);

        if indices.iter().any(|&i| i as usize >= vertex_count) {
            bail!("index out of range");
        }

        Ok(Self { vertices, indices })
    }
}

/// `<model>.cache` beside the model file.
pub fn cache_path(model: &Path) -> PathBuf {
    let mut name = model.as_os_str().to_owned();
    name.push(".cache");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("volcano-mesh-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const TRIANGLE_OBJ: &str = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 0.0 1.0
f 1/1 2/2 3/3
";

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
    }

    #[test]
    fn quad_has_two_triangles() {
        let quad = Mesh::quad();
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.index_count(), 6);
        assert!(quad.indices.iter().all(|&i| i < 4));
    }

    #[test]
    fn cache_reads_back_what_was_written() {
        let dir = scratch_dir("roundtrip");
        let path = dir.join("quad.obj.cache");
        let quad = Mesh::quad();
        quad.write_cache(&path).unwrap();
        assert_eq!(Mesh::read_cache(&path).unwrap(), quad);
    }

    #[test]
    fn corrupt_caches_are_rejected() {
        let dir = scratch_dir("corrupt");
        let path = dir.join("m.cache");
        Mesh::quad().write_cache(&path).unwrap();
        let good = std::fs::read(&path).unwrap();

        std::fs::write(&path, &good[..good.len() - 3]).unwrap();
        assert!(Mesh::read_cache(&path).is_err());

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        std::fs::write(&path, &bad_magic).unwrap();
        assert!(Mesh::read_cache(&path).is_err());

        let mut bad_version = good;
        bad_version[4] = 99;
        std::fs::write(&path, &bad_version).unwrap();
        assert!(Mesh::read_cache(&path).is_err());
    }

    #[test]
    fn obj_load_writes_cache_and_bad_cache_is_regenerated() {
        let dir = scratch_dir("obj");
        let model = dir.join("tri.obj");
        std::fs::write(&model, TRIANGLE_OBJ).unwrap();

        let mesh = Mesh::load(&model).unwrap();
        assert_eq!(mesh.indices.len(), 3);
        assert_eq!(mesh.vertices[1].pos, [1.0, 0.0, 0.0]);
        assert_eq!(mesh.vertices[2].tex_coord, [0.0, 0.0]);

        let cache = cache_path(&model);
        assert_eq!(Mesh::read_cache(&cache).unwrap(), mesh);

        std::fs::write(&cache, b"garbage").unwrap();
        assert_eq!(Mesh::load(&model).unwrap(), mesh);
        assert_eq!(Mesh::read_cache(&cache).unwrap(), mesh);
    }

    #[test]
    fn missing_model_is_an_error() {
        let dir = scratch_dir("missing");
        assert!(Mesh::load(&dir.join("nope.obj")).is_err());
    }
}
