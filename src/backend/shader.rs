// Shader module loading and hot reload
//
// SPIR-V is read from the resource directory at pipeline build time rather
// than embedded, so a rebuild after a shader change picks up the new binaries.

use anyhow::{Context, Result};
use ash::vk;
use notify::{EventKind, RecursiveMode, Watcher};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::VulkanDevice;

/// SPIR-V directory below the resource root.
pub const SPIRV_DIR: &str = "shaders/spir-v";

pub fn spirv_dir(resource_path: &Path) -> PathBuf {
    resource_path.join(SPIRV_DIR)
}

/// Read SPIR-V words from `bytes`, checking length and magic number.
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V")
}

pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read shader {:?}", path))?;
    parse_spirv(&bytes).with_context(|| format!("Failed to parse shader {:?}", path))
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// Vertex and fragment modules for the scene pipeline. Destroyed once the
/// pipeline has been built.
pub struct ShaderPair<'a> {
    pub vert: vk::ShaderModule,
    pub frag: vk::ShaderModule,
    device: &'a VulkanDevice,
}

/// Compiled scene shaders.
pub const SCENE_SHADERS: (&str, &str) = ("vert.spv", "frag.spv");
/// Compiled overlay shaders.
pub const OVERLAY_SHADERS: (&str, &str) = ("overlay_vert.spv", "overlay_frag.spv");

impl<'a> ShaderPair<'a> {
    /// Load a `(vertex, fragment)` pair of SPIR-V files from the shader directory.
    pub fn load(device: &'a VulkanDevice, resource_path: &Path, (vert_file, frag_file): (&str, &str)) -> Result<Self> {
        let dir = spirv_dir(resource_path);
        let vert_code = load_spirv(&dir.join(vert_file))?;
        let frag_code = load_spirv(&dir.join(frag_file))?;

        let vert = create_shader_module(device, &vert_code)?;
        let frag = match create_shader_module(device, &frag_code) {
            Ok(frag) => frag,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vert, None) };
                return Err(e);
            }
        };
        Ok(Self { vert, frag, device })
    }
}

impl Drop for ShaderPair<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.vert, None);
            self.device.device.destroy_shader_module(self.frag, None);
        }
    }
}

/// Watches the SPIR-V directory and latches a flag on any change.
pub struct ShaderWatcher {
    changed: Arc<AtomicBool>,
    _watcher: notify::RecommendedWatcher,
}

impl ShaderWatcher {
    pub fn new(dir: &Path) -> Result<Self> {
        let changed = Arc::new(AtomicBool::new(false));
        let flag = changed.clone();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            match event {
                Ok(event) if is_content_change(&event.kind) => {
                    log::debug!("Shader change: {:?}", event.paths);
                    flag.store(true, Ordering::Release);
                }
                Ok(_) => {}
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;
        log::info!("Watching {:?} for shader changes", dir);

        Ok(Self {
            changed,
            _watcher: watcher,
        })
    }

    /// True once per batch of changes.
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}
