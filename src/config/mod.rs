use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub relay: RelayConfig,
    pub api: ApiConfig,
    pub behavior: BehaviorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Path to the ffmpeg binary. Discovered on PATH when unset.
    pub ffmpeg_path: Option<String>,
    /// Path to the whisper.cpp CLI binary. Discovered on PATH when unset.
    pub whisper_path: Option<String>,
    /// Model name, recorded on each job for provenance.
    pub model: String,
    /// Path to the whisper model file (ggml format).
    pub model_path: Option<String>,
    pub language: String,
    /// Hard bound on each external tool invocation, in seconds.
    /// The child is killed on expiry. 0 disables the bound.
    pub timeout_seconds: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            whisper_path: None,
            model: "base.en".to_string(),
            model_path: None,
            language: "en".to_string(),
            timeout_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// First port tried when starting the capture relay.
    pub base_port: u16,
    /// How many consecutive ports to try before giving up.
    pub scan_window: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_port: 8765,
            scan_window: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 3838 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Keep the raw per-stream files when a job fails, so it can be retried
    /// without re-recording. Raw files of completed jobs are always deleted.
    pub keep_raw_on_failure: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            keep_raw_on_failure: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.relay.base_port, 8765);
        assert_eq!(config.relay.scan_window, 20);
        assert_eq!(config.api.port, 3838);
        assert_eq!(config.tools.timeout_seconds, 3600);
        assert_eq!(config.tools.language, "en");
        assert!(config.behavior.keep_raw_on_failure);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [relay]
            base_port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.relay.base_port, 9000);
        // Untouched sections come from defaults
        assert_eq!(config.relay.scan_window, 20);
        assert_eq!(config.tools.model, "base.en");
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.tools.whisper_path = Some("/opt/whisper/whisper-cli".to_string());
        config.tools.timeout_seconds = 120;

        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(
            parsed.tools.whisper_path.as_deref(),
            Some("/opt/whisper/whisper-cli")
        );
        assert_eq!(parsed.tools.timeout_seconds, 120);
    }
}
