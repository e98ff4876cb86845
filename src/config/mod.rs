// Configuration management for Cadenza
// Handles loading/saving settings, with sensible defaults when config is missing

use anyhow::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub presence: PresenceConfig,
    pub share: ShareConfig,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Discord application id used when connecting the presence handle.
    pub app_id: String,
    /// Enrichment API base; `<base><video id>` returns thumbnail + channel.
    pub api_url: String,
    /// Target of the fixed "Source code" button.
    pub source_url: String,
    /// Timeout for the enrichment lookup, in milliseconds.
    pub api_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Listen-along server base URL, trailing slash included.
    pub server_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub poll_interval_ms: u64,
    /// Full presence resync happens every this many poll ticks.
    pub presence_resync_ticks: u64,
    pub volume_step: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            presence: PresenceConfig {
                app_id: "1033827079994753064".to_string(),
                api_url: "https://cadenza-api.thefightagainstmalware.workers.dev/".to_string(),
                source_url: "https://github.com/cadenza-player/cadenza".to_string(),
                api_timeout_ms: 1000,
            },
            share: ShareConfig {
                server_url: "https://cadenza-share-server.onrender.com/".to_string(),
            },
            playback: PlaybackConfig {
                poll_interval_ms: 10,
                presence_resync_ticks: 1500,
                volume_step: 0.01,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        Ok(())
    }

    /// Directory for logs and other run artifacts, next to the config file.
    pub fn state_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.toml"))
    }

    fn base_dir() -> Result<PathBuf> {
        let dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("cadenza");

        Ok(dir)
    }
}
