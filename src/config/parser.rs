//! Config parser: converts raw YAML/JSON/TOML text into [`EngineConfig`].

use super::EngineConfig;
use crate::error::ConfigError;

/// Supported config input formats.
#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
    /// TOML format (`.toml`).
    Toml,
}

impl ConfigFormat {
    /// Guess the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "json" => Some(ConfigFormat::Json),
            "toml" => Some(ConfigFormat::Toml),
            _ => None,
        }
    }
}

/// Parse and validate engine configuration.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = match format {
        ConfigFormat::Yaml => serde_saphyr::from_str(content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?,
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?,
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?
        }
    };
    config.validate()?;
    Ok(config)
}
