// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::{ContextDesc, GpuPreference};

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub gpu: GpuConfig,
    pub debug: DebugConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    #[default]
    Windowed,
    Borderless,
    Maximized,
}

/// Window settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub mode: WindowMode,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Engine".to_string(),
            width: 1280,
            height: 720,
            mode: WindowMode::Windowed,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphicsConfig {
    pub frames_in_flight: usize,
    /// Preferred present mode; FIFO is used when unavailable
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// "major.minor"
    pub api_version: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            present_mode: "mailbox".to_string(),
            clear_color: [0.1, 0.1, 0.15, 1.0],
            api_version: "1.3".to_string(),
        }
    }
}

/// GPU selection
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GpuConfig {
    /// Fail when there is no discrete GPU instead of falling back
    pub require_discrete: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self { require_discrete: true }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
    /// Log to this file instead of stderr when set
    pub log_file: Option<PathBuf>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            show_fps: true,
            log_file: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DemoScene {
    #[default]
    Triangle,
    Mesh,
}

/// Which demo to run
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DemoConfig {
    pub scene: DemoScene,
    pub mesh_cache: PathBuf,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            scene: DemoScene::Triangle,
            mesh_cache: PathBuf::from("data/demo.mesh"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::FIFO
            }
        }
    }

    /// Requested API version; dynamic rendering needs at least 1.3.
    pub fn api_version(&self) -> u32 {
        let mut parts = self.graphics.api_version.split('.').map(|p| p.trim().parse::<u32>());
        match (parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor))) if (major, minor) >= (1, 3) => vk::make_api_version(0, major, minor, 0),
            _ => {
                log::warn!(
                    "Unsupported api_version '{}', using 1.3",
                    self.graphics.api_version
                );
                vk::API_VERSION_1_3
            }
        }
    }

    pub fn gpu_preference(&self) -> GpuPreference {
        if self.gpu.require_discrete {
            GpuPreference::DiscreteOnly
        } else {
            GpuPreference::PreferDiscrete
        }
    }

    /// Context requirements derived from these settings.
    pub fn context_desc(&self) -> ContextDesc {
        let desc = ContextDesc {
            app_name: self.window.title.clone(),
            api_version: self.api_version(),
            frames_in_flight: self.graphics.frames_in_flight.max(1),
            gpu_preference: self.gpu_preference(),
            present_mode: self.present_mode(),
            ..Default::default()
        };

        if self.debug.validation_layers {
            desc.with_validation()
        } else {
            desc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.frames_in_flight, 2);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.api_version(), vk::API_VERSION_1_3);
        assert_eq!(config.gpu_preference(), GpuPreference::DiscreteOnly);
        assert_eq!(config.demo.scene, DemoScene::Triangle);
    }

    #[test]
    fn test_partial_sections_override_fields() {
        let config = Config::parse(
            r#"
            [window]
            title = "Mesh viewer"
            mode = "borderless"

            [graphics]
            frames_in_flight = 3
            present_mode = "FIFO"

            [gpu]
            require_discrete = false

            [debug]
            validation_layers = false
            log_file = "engine.log"

            [demo]
            scene = "mesh"
            mesh_cache = "assets/bistro.mesh"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Mesh viewer");
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.mode, WindowMode::Borderless);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.gpu_preference(), GpuPreference::PreferDiscrete);
        assert_eq!(config.debug.log_file, Some(PathBuf::from("engine.log")));
        assert_eq!(config.demo.scene, DemoScene::Mesh);

        let desc = config.context_desc();
        assert_eq!(desc.frames_in_flight, 3);
        assert!(desc.instance_layers.is_empty());
        assert_eq!(desc.app_name, "Mesh viewer");
    }

    #[test]
    fn test_unknown_values_fall_back() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "vsync-ish"
            api_version = "1.1"
            "#,
        )
        .unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.api_version(), vk::API_VERSION_1_3);
    }

    #[test]
    fn test_validation_adds_layer() {
        let config = Config::parse("[debug]\nvalidation_layers = true").unwrap();
        let desc = config.context_desc();
        assert_eq!(desc.instance_layers, vec![c"VK_LAYER_KHRONOS_validation"]);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
    }
}
