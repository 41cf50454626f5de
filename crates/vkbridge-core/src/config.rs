use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top-level vkbridge configuration, loaded from vkbridge.toml.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub shader: ShaderConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Registered native backend to select on first device creation
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Native capability tier requested from the backend
    #[serde(default)]
    pub feature_level: FeatureLevel,
    /// Size of the reserved push-constant buffer in bytes
    #[serde(default = "default_push_constant_size")]
    pub push_constant_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Directory generated shader source is written to (None = no dump)
    pub dump_dir: Option<String>,
    /// Leave unresolved bindings unbound for ALLOW_DERIVATIVES pipelines
    #[serde(default = "default_true")]
    pub tolerant_derivatives: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Sleep between polls of fences and idle queries, in microseconds
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
}

/// Native backend capability tier. Gates shader stages, shader profiles
/// and unordered-access support.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureLevel {
    #[serde(rename = "9_1")]
    L9_1,
    #[serde(rename = "9_2")]
    L9_2,
    #[serde(rename = "9_3")]
    L9_3,
    #[serde(rename = "10_0")]
    L10_0,
    #[serde(rename = "10_1")]
    L10_1,
    #[default]
    #[serde(rename = "11_0")]
    L11_0,
    #[serde(rename = "11_1")]
    L11_1,
}

impl FeatureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureLevel::L9_1 => "9_1",
            FeatureLevel::L9_2 => "9_2",
            FeatureLevel::L9_3 => "9_3",
            FeatureLevel::L10_0 => "10_0",
            FeatureLevel::L10_1 => "10_1",
            FeatureLevel::L11_0 => "11_0",
            FeatureLevel::L11_1 => "11_1",
        }
    }

    /// Unordered-access views are available in compute and pixel stages.
    pub fn supports_uav(&self) -> bool {
        *self >= FeatureLevel::L11_0
    }

    /// Hull and domain shader stages are available.
    pub fn supports_tessellation(&self) -> bool {
        *self >= FeatureLevel::L11_0
    }

    /// Geometry and compute shader stages are available.
    pub fn supports_geometry(&self) -> bool {
        *self >= FeatureLevel::L10_0
    }

    /// Number of unordered-access slots shared by the pixel and compute stages.
    pub fn uav_slot_count(&self) -> u32 {
        match self {
            FeatureLevel::L11_1 => 64,
            FeatureLevel::L11_0 => 8,
            _ => 0,
        }
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches("level_").replace('.', "_").as_str() {
            "9_1" => Ok(FeatureLevel::L9_1),
            "9_2" => Ok(FeatureLevel::L9_2),
            "9_3" => Ok(FeatureLevel::L9_3),
            "10_0" => Ok(FeatureLevel::L10_0),
            "10_1" => Ok(FeatureLevel::L10_1),
            "11_0" => Ok(FeatureLevel::L11_0),
            "11_1" => Ok(FeatureLevel::L11_1),
            other => Err(CoreError::ConfigError(format!("unknown feature level: {}", other))),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            feature_level: FeatureLevel::default(),
            push_constant_size: default_push_constant_size(),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            dump_dir: None,
            tolerant_derivatives: true,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: default_poll_interval_us(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text and validate it.
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(CoreError::Io(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("ignoring invalid config {}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Load the configuration found at the platform default path.
    pub fn from_environment() -> Self {
        Self::load_or_default(&vkbridge_common::platform::default_config_path())
    }

    fn validate(&self) -> Result<(), CoreError> {
        let size = self.device.push_constant_size;
        if size < 128 || size % 16 != 0 || size > 4096 {
            return Err(CoreError::ConfigError(format!(
                "push_constant_size must be a multiple of 16 in 128..=4096, got {}",
                size
            )));
        }
        Ok(())
    }
}

fn default_backend() -> String {
    "null".to_string()
}

fn default_push_constant_size() -> u32 {
    256
}

fn default_poll_interval_us() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = BridgeConfig::parse("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.device.backend, "null");
        assert_eq!(config.device.feature_level, FeatureLevel::L11_0);
        assert_eq!(config.queue.poll_interval_us, 50);
        assert!(config.shader.tolerant_derivatives);
    }

    #[test]
    fn parses_feature_level_names() {
        let config = BridgeConfig::parse(
            r#"
[device]
feature_level = "10_1"
push_constant_size = 128

[shader]
dump_dir = "/tmp/shaders"
"#,
        )
        .unwrap();
        assert_eq!(config.device.feature_level, FeatureLevel::L10_1);
        assert_eq!(config.device.push_constant_size, 128);
        assert_eq!(config.shader.dump_dir.as_deref(), Some("/tmp/shaders"));
    }

    #[test]
    fn rejects_unaligned_push_constant_size() {
        let err = BridgeConfig::parse("[device]\npush_constant_size = 100\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigError(_)));
    }

    #[test]
    fn feature_level_from_str_accepts_dotted_form() {
        assert_eq!("11.1".parse::<FeatureLevel>().unwrap(), FeatureLevel::L11_1);
        assert_eq!("level_9_3".parse::<FeatureLevel>().unwrap(), FeatureLevel::L9_3);
        assert!("12_0".parse::<FeatureLevel>().is_err());
    }

    #[test]
    fn uav_support_starts_at_11_0() {
        assert!(!FeatureLevel::L10_1.supports_uav());
        assert_eq!(FeatureLevel::L10_1.uav_slot_count(), 0);
        assert_eq!(FeatureLevel::L11_0.uav_slot_count(), 8);
        assert_eq!(FeatureLevel::L11_1.uav_slot_count(), 64);
    }
}
