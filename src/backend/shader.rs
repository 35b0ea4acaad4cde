// Shader stages and module creation
//
// Vulkan consumes SPIR-V words. Bytecode arrives as bytes from the asset
// storage and is only borrowed for the duration of pipeline construction.

use ash::vk;
use std::io::Cursor;

use super::error::{RenderError, Result};

/// Entry point every stage must export
pub const ENTRY_POINT: &std::ffi::CStr = c"main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
    Geometry,
}

impl ShaderKind {
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Geometry => vk::ShaderStageFlags::GEOMETRY,
        }
    }

    /// Infer the stage from a compiled file name such as `Base.vert.spv`
    pub fn from_file_name(name: &str) -> Option<Self> {
        if name.contains(".vert") {
            Some(Self::Vertex)
        } else if name.contains(".frag") {
            Some(Self::Fragment)
        } else if name.contains(".geom") {
            Some(Self::Geometry)
        } else {
            None
        }
    }
}

/// A stage kind plus borrowed bytecode
#[derive(Debug, Clone, Copy)]
pub struct ShaderInfo<'a> {
    pub kind: ShaderKind,
    pub bytecode: &'a [u8],
}

/// Re-pack SPIR-V bytes into aligned words
pub fn spirv_words(bytecode: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytecode))
        .map_err(|e| RenderError::InvalidShader(e.to_string()))
}

/// Words for a shader module; unreadable bytecode fails the pipeline build
fn module_code(bytecode: &[u8]) -> Result<Vec<u32>> {
    spirv_words(bytecode).map_err(|e| {
        log::error!(target: "vulkan", "Rejected shader bytecode: {}", e);
        RenderError::pipeline("shader module")(vk::Result::ERROR_INVALID_SHADER_NV)
    })
}

/// # Safety
/// `device` must be a valid logical device.
pub unsafe fn create_shader_module(device: &ash::Device, bytecode: &[u8]) -> Result<vk::ShaderModule> {
    let words = module_code(bytecode)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    device
        .create_shader_module(&create_info, None)
        .map_err(RenderError::pipeline("shader module"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn stage_flags_match_kind() {
        assert_eq!(ShaderKind::Vertex.stage_flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderKind::Fragment.stage_flags(), vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(ShaderKind::Geometry.stage_flags(), vk::ShaderStageFlags::GEOMETRY);
    }

    #[test]
    fn kind_from_file_name() {
        assert_eq!(ShaderKind::from_file_name("Base.vert.spv"), Some(ShaderKind::Vertex));
        assert_eq!(ShaderKind::from_file_name("Base.frag.spv"), Some(ShaderKind::Fragment));
        assert_eq!(ShaderKind::from_file_name("Lines.geom.spv"), Some(ShaderKind::Geometry));
        assert_eq!(ShaderKind::from_file_name("Base.comp.spv"), None);
    }

    #[test]
    fn words_from_aligned_bytes() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());

        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn truncated_bytecode_is_rejected() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00];
        assert!(matches!(spirv_words(&bytes), Err(RenderError::InvalidShader(_))));
    }

    #[test]
    fn truncated_module_fails_pipeline_build() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00];
        match module_code(&bytes) {
            Err(RenderError::PipelineCreationFailed { step, result }) => {
                assert_eq!(step, "shader module");
                assert_eq!(result, vk::Result::ERROR_INVALID_SHADER_NV);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
