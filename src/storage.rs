// =============================================================================
// STORAGE - Asset lookup by content id
// =============================================================================
//
// Every resource is addressed by a 64-bit id derived from its kind and file
// name, so callers never deal with paths. Bytecode is read from disk the first
// time it is asked for and cached afterwards.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh64::xxh64;

use crate::backend::ShaderKind;

const RESOURCE_ID_SEED: u64 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Image,
    Font,
    Shader,
}

impl ResourceKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Image => "image:",
            Self::Font => "font:",
            Self::Shader => "shader:",
        }
    }
}

/// XXH64 of `"<kind>:<name>"`; the prefix keeps kinds from colliding
pub fn resource_id(kind: ResourceKind, name: &str) -> u64 {
    let mut full_name = String::with_capacity(kind.prefix().len() + name.len());
    full_name.push_str(kind.prefix());
    full_name.push_str(name);
    xxh64(full_name.as_bytes(), RESOURCE_ID_SEED)
}

#[derive(Debug, Clone)]
pub struct ShaderProgram {
    pub kind: Option<ShaderKind>,
    pub bytecode: Vec<u8>,
}

#[derive(Debug)]
struct Resource {
    name: String,
    path: PathBuf,
    shader: Option<ShaderProgram>,
}

#[derive(Debug, Default)]
pub struct Storage {
    resources: HashMap<u64, Resource>,
}

impl Storage {
    /// Scan `paths` recursively and register every compiled shader found.
    /// Fails if nothing at all could be registered.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                log::warn!(target: "storage", "{:?} doesn't exist", path);
                continue;
            }
            collect_files(path, &mut files)
                .with_context(|| format!("Failed to scan asset directory {:?}", path))?;
        }

        let mut storage = Self::default();
        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !is_shader(&path) {
                continue;
            }

            let id = resource_id(ResourceKind::Shader, name);
            if storage.resources.contains_key(&id) {
                log::debug!(target: "storage", "Skipping duplicate {:?}", path);
                continue;
            }

            log::debug!(target: "storage", "{} - '{}'", id, name);
            storage.resources.insert(
                id,
                Resource {
                    name: name.to_string(),
                    path,
                    shader: None,
                },
            );
        }

        if storage.resources.is_empty() {
            bail!("No resources found in {} asset path(s)", paths.len());
        }

        log::info!(target: "storage", "Registered {} resources", storage.resources.len());
        Ok(storage)
    }

    /// Shader bytecode for `id`, read from disk on first use
    pub fn get_shader(&mut self, id: u64) -> Option<&ShaderProgram> {
        let resource = self.resources.get_mut(&id)?;

        if resource.shader.is_none() {
            match fs::read(&resource.path) {
                Ok(bytecode) => {
                    log::debug!(
                        target: "storage",
                        "Loaded '{}' ({} bytes)",
                        resource.name,
                        bytecode.len()
                    );
                    resource.shader = Some(ShaderProgram {
                        kind: ShaderKind::from_file_name(&resource.name),
                        bytecode,
                    });
                }
                Err(e) => {
                    log::warn!(target: "storage", "Couldn't read {:?}: {}", resource.path, e);
                    return None;
                }
            }
        }

        resource.shader.as_ref()
    }
}

fn is_shader(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "spv")
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if path.is_file() {
        files.push(path.to_path_buf());
        return Ok(());
    }

    let mut entries = fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    // Deterministic "first one wins" for duplicate names
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            collect_files(&entry, files)?;
        } else if entry.is_file() {
            files.push(entry);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("triangle-renderer-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn ids_depend_on_kind_and_name() {
        let shader = resource_id(ResourceKind::Shader, "Base.vert.spv");
        assert_eq!(shader, xxh64(b"shader:Base.vert.spv", 123));
        assert_ne!(shader, resource_id(ResourceKind::Image, "Base.vert.spv"));
        assert_ne!(shader, resource_id(ResourceKind::Shader, "Base.frag.spv"));
        assert_eq!(shader, resource_id(ResourceKind::Shader, "Base.vert.spv"));
    }

    #[test]
    fn open_registers_shaders_recursively() {
        let dir = scratch_dir("recursive");
        fs::create_dir_all(dir.join("shaders")).unwrap();
        fs::write(dir.join("shaders/Base.vert.spv"), [1u8, 2, 3, 4]).unwrap();
        fs::write(dir.join("Base.frag.spv"), [5u8, 6, 7, 8]).unwrap();
        fs::write(dir.join("readme.txt"), b"not a shader").unwrap();

        let storage = Storage::open(&[&dir]).unwrap();
        assert_eq!(storage.resources.len(), 2);
        assert!(storage.resources.contains_key(&resource_id(ResourceKind::Shader, "Base.vert.spv")));
        assert!(storage.resources.contains_key(&resource_id(ResourceKind::Shader, "Base.frag.spv")));
        assert!(!storage.resources.contains_key(&resource_id(ResourceKind::Shader, "readme.txt")));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn shader_is_loaded_lazily_with_its_stage() {
        let dir = scratch_dir("lazy");
        let path = dir.join("Base.frag.spv");
        fs::write(&path, [9u8, 9, 9, 9]).unwrap();

        let mut storage = Storage::open(&[&dir]).unwrap();
        let id = resource_id(ResourceKind::Shader, "Base.frag.spv");

        let shader = storage.get_shader(id).unwrap();
        assert_eq!(shader.kind, Some(ShaderKind::Fragment));
        assert_eq!(shader.bytecode, vec![9, 9, 9, 9]);

        // Cached: the file is no longer needed
        fs::remove_file(&path).unwrap();
        assert!(storage.get_shader(id).is_some());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_id_returns_none() {
        let dir = scratch_dir("unknown");
        fs::write(dir.join("Base.vert.spv"), [0u8; 4]).unwrap();

        let mut storage = Storage::open(&[&dir]).unwrap();
        assert!(storage.get_shader(42).is_none());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_fails_without_resources() {
        let dir = scratch_dir("empty");
        let missing = dir.join("does-not-exist");

        assert!(Storage::open(&[&dir, &missing]).is_err());

        let _ = fs::remove_dir_all(&dir);
    }
}
