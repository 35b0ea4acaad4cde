// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
// Config is read before the logger exists, so problems are collected as
// warnings and reported by the caller once logging is up.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub app: AppConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub assets: AssetsConfig,

    #[serde(skip)]
    warnings: Vec<String>,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub centered: bool,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 1920,
            height: 1080,
            centered: true,
            resizable: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine_name: "No Engine".to_string(),
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// Upper bound for fence waits and image acquisition
    pub frame_timeout_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 3,
            frame_timeout_ms: 1000,
        }
    }
}

impl GraphicsConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
        }
    }
}

/// Where compiled shaders live and which ones make up the pipeline
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub paths: Vec<PathBuf>,
    pub vertex_shader: String,
    pub fragment_shader: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from("assets")],
            vertex_shader: "Base.vert.spv".to_string(),
            fragment_shader: "Base.frag.spv".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            let mut config = Config::default();
            config
                .warnings
                .push(format!("Failed to load config.toml: {:#}. Using defaults.", e));
            config
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let mut config = Config::default();
            config
                .warnings
                .push(format!("Config file not found at {:?}, using defaults", path));
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.validate();
        Ok(config)
    }

    fn validate(&mut self) {
        if self.graphics.max_frames_in_flight == 0 {
            self.warnings
                .push("max_frames_in_flight = 0 is invalid, using 1".to_string());
            self.graphics.max_frames_in_flight = 1;
        }

        if self.debug.log_level.parse::<log::LevelFilter>().is_err() {
            self.warnings
                .push(format!("Unknown log level '{}', using info", self.debug.log_level));
            self.debug.log_level = "info".to_string();
        }
    }

    /// Problems found while loading, oldest first. Drains the list.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Level for env_logger when RUST_LOG is not set
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
