//! Configuration management for Streamgate
//!
//! Handles config file loading/saving with environment overrides.
//! Config is stored at ~/.config/streamgate/config.toml

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_allowed_domains() -> Vec<String> {
    vec![
        "real-debrid.com".to_string(),
        "download.real-debrid.com".to_string(),
        "rdb.so".to_string(),
    ]
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_rate_limit_ceiling() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

/// Seconds after resolution at which a playing stream is proactively
/// re-resolved, ahead of the upstream link's unadvertised expiry
fn default_refresh_ahead_secs() -> u64 {
    10_800
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Debrid service API token
    pub debrid_token: Option<String>,
    /// Domains the proxy will relay for (exact or subdomain match)
    #[serde(default = "default_allowed_domains")]
    pub allowed_proxy_domains: Vec<String>,
    /// Fixed rate-limit window for /resolve, in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    /// Requests allowed per window per client
    #[serde(default = "default_rate_limit_ceiling")]
    pub rate_limit_ceiling: u32,
    /// Attempt hardware-accelerated encoding before software
    #[serde(default = "default_true")]
    pub hwaccel_enabled: bool,
    /// Proactive link-refresh lead time, seconds after resolution
    #[serde(default = "default_refresh_ahead_secs")]
    pub refresh_ahead_secs: u64,
    /// Subtitle overlay rendering preferences
    #[serde(default)]
    pub subtitle_style: SubtitleStyle,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debrid_token: None,
            allowed_proxy_domains: default_allowed_domains(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_ceiling: default_rate_limit_ceiling(),
            hwaccel_enabled: true,
            refresh_ahead_secs: default_refresh_ahead_secs(),
            subtitle_style: SubtitleStyle::default(),
        }
    }
}

/// User-configurable subtitle overlay styling, passed to the renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleStyle {
    /// Font size in percent of the default
    pub size_percent: u32,
    /// Vertical offset from the bottom edge, percent of viewport height
    pub offset_percent: u32,
    /// CSS color for cue text
    pub color: String,
    /// CSS color for the text outline
    pub outline_color: String,
    /// Background opacity, 0.0 to 1.0
    pub opacity: f64,
    /// Cue timing delay in milliseconds (applied additively at lookup)
    pub delay_ms: i64,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            size_percent: 100,
            offset_percent: 10,
            color: "#ffffff".to_string(),
            outline_color: "#000000".to_string(),
            opacity: 0.75,
            delay_ms: 0,
        }
    }
}

impl Config {
    /// Get config file path (~/.config/streamgate/config.toml)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("streamgate").join("config.toml"))
    }

    /// Load config from the default path with environment overrides applied
    pub fn load() -> Self {
        let mut config = Self::path()
            .and_then(|p| Self::load_from(&p).ok())
            .unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    /// Load config from an explicit path (no overrides)
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path =
            Self::path().ok_or_else(|| anyhow::anyhow!("could not determine config path"))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Environment variables take precedence over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("STREAMGATE_DEBRID_TOKEN") {
            self.debrid_token = Some(token);
        }
        if let Ok(domains) = std::env::var("STREAMGATE_ALLOWED_DOMAINS") {
            self.allowed_proxy_domains = domains
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("STREAMGATE_RATE_LIMIT_WINDOW_SECS") {
            if let Ok(n) = v.parse() {
                self.rate_limit_window_secs = n;
            }
        }
        if let Ok(v) = std::env::var("STREAMGATE_RATE_LIMIT_CEILING") {
            if let Ok(n) = v.parse() {
                self.rate_limit_ceiling = n;
            }
        }
        if let Ok(v) = std::env::var("STREAMGATE_HWACCEL") {
            self.hwaccel_enabled = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("STREAMGATE_REFRESH_AHEAD_SECS") {
            if let Ok(n) = v.parse() {
                self.refresh_ahead_secs = n;
            }
        }
    }

    /// Configured token, if any (env overrides are applied at load time)
    pub fn debrid_token(&self) -> Option<&str> {
        self.debrid_token.as_deref()
    }
}
