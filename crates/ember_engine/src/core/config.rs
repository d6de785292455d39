//! Engine configuration
//!
//! All tunables that used to be compile-time constants (max frames in flight,
//! validation toggles, shader locations) live in explicit config structs that
//! are passed to the renderer at startup. Configs are serializable and can be
//! loaded from TOML or RON files.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration trait for loadable/savable config structs
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from a `.toml` or `.ron` file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to a `.toml` or `.ron` file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Shader bytecode locations for one pipeline stage pair
///
/// The engine consumes pre-compiled SPIR-V; source compilation is handled by
/// an external toolchain step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Validate that both shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader_path, &self.fragment_shader_path] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Parse(format!("shader not found: {path}")));
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new("shaders/vert.spv", "shaders/frag.spv")
    }
}

/// Shader set for the multi-pass pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineShaders {
    /// HDR scene pass shaders
    pub scene: ShaderConfig,
    /// Bloom brightness-extraction pass shaders (fullscreen)
    pub bloom: ShaderConfig,
    /// Composite pass shaders (fullscreen tonemap + bloom add)
    pub composite: ShaderConfig,
    /// UI overlay subpass shaders
    pub ui: ShaderConfig,
}

impl Default for PipelineShaders {
    fn default() -> Self {
        Self {
            scene: ShaderConfig::new("shaders/scene.vert.spv", "shaders/scene.frag.spv"),
            bloom: ShaderConfig::new("shaders/fullscreen.vert.spv", "shaders/bloom.frag.spv"),
            composite: ShaderConfig::new(
                "shaders/fullscreen.vert.spv",
                "shaders/composite.frag.spv",
            ),
            ui: ShaderConfig::new("shaders/ui.vert.spv", "shaders/ui.frag.spv"),
        }
    }
}

/// Renderer configuration
///
/// Immutable after startup; the renderer takes a reference at creation and
/// copies what it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Shader configuration for all passes
    pub shaders: PipelineShaders,
    /// Maximum frames in flight (bounds CPU-ahead-of-GPU distance)
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (defaults to debug builds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_validation: Option<bool>,
    /// Clear color for the HDR scene pass
    pub clear_color: [f32; 4],
    /// MSAA sample count for the scene pass (1, 2, 4, or 8), clamped to
    /// device support
    pub msaa_samples: u32,
}

impl RendererConfig {
    /// Resolve the validation toggle, falling back to debug-build default
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Check the config for values the renderer cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frames_in_flight == 0 {
            return Err(ConfigError::Parse(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }
        if !matches!(self.msaa_samples, 1 | 2 | 4 | 8) {
            return Err(ConfigError::Parse(format!(
                "msaa_samples must be 1, 2, 4, or 8 (got {})",
                self.msaa_samples
            )));
        }
        for shader in [
            &self.shaders.scene,
            &self.shaders.bloom,
            &self.shaders.composite,
            &self.shaders.ui,
        ] {
            shader.validate()?;
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Ember Engine".to_string(),
            application_version: (0, 1, 0),
            shaders: PipelineShaders::default(),
            max_frames_in_flight: 2,
            enable_validation: None,
            clear_color: [0.01, 0.01, 0.02, 1.0],
            msaa_samples: 1,
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_bounds_frames_in_flight() {
        let config = RendererConfig::default();
        assert!(config.max_frames_in_flight >= 1);
        assert!(config.max_frames_in_flight <= 3);
    }

    #[test]
    fn config_round_trips_through_ron() {
        let config = RendererConfig {
            max_frames_in_flight: 3,
            msaa_samples: 4,
            ..RendererConfig::default()
        };
        let text = ron::ser::to_string_pretty(&config, Default::default()).unwrap();
        let back: RendererConfig = ron::from_str(&text).unwrap();
        assert_eq!(back.max_frames_in_flight, 3);
        assert_eq!(back.msaa_samples, 4);
        assert_eq!(back.application_name, config.application_name);
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let zero_frames = RendererConfig {
            max_frames_in_flight: 0,
            ..RendererConfig::default()
        };
        assert!(zero_frames.validate().is_err());

        let bad_msaa = RendererConfig {
            msaa_samples: 3,
            ..RendererConfig::default()
        };
        assert!(bad_msaa.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = RendererConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: RendererConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.max_frames_in_flight, config.max_frames_in_flight);
    }
}
