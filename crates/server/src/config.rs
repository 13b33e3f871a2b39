//! Server configuration management

use crate::devices::IdentityScheme;
use anyhow::{Context, Result, anyhow};
use protocol::DeviceClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub enumeration: EnumerationSettings,
    #[serde(default)]
    pub operations: OperationSettings,
    #[serde(default)]
    pub camera: CameraSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub log_level: String,
}

/// Which backend talks to the OS, and how many worker threads run OS calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "PlatformSettings::default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Linux,
    Simulated,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            workers: Self::default_workers(),
        }
    }
}

impl PlatformSettings {
    fn default_workers() -> usize {
        4
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerationSettings {
    /// How long a snapshot may be served to pollers before re-enumerating
    #[serde(default = "EnumerationSettings::default_ttl")]
    pub snapshot_ttl_ms: u64,
    /// Background refresh interval (0 = disabled)
    #[serde(default = "EnumerationSettings::default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Identity scheme per device class; unlisted classes use `native`
    #[serde(default)]
    pub identity: BTreeMap<DeviceClass, IdentityScheme>,
}

impl Default for EnumerationSettings {
    fn default() -> Self {
        Self {
            snapshot_ttl_ms: Self::default_ttl(),
            poll_interval_secs: Self::default_poll_interval(),
            identity: BTreeMap::new(),
        }
    }
}

impl EnumerationSettings {
    fn default_ttl() -> u64 {
        1000
    }

    fn default_poll_interval() -> u64 {
        5
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_ttl_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSettings {
    /// How long a caller waits for a mutation before getting a timeout
    /// response; the operation itself keeps running
    #[serde(default = "OperationSettings::default_timeout")]
    pub timeout_secs: u64,
    /// Completed operations kept for `/operations`
    #[serde(default = "OperationSettings::default_history_limit")]
    pub history_limit: usize,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout(),
            history_limit: Self::default_history_limit(),
        }
    }
}

impl OperationSettings {
    fn default_timeout() -> u64 {
        15
    }

    fn default_history_limit() -> usize {
        64
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(default)]
    pub default_index: u32,
    #[serde(default = "CameraSettings::default_width")]
    pub width: u32,
    #[serde(default = "CameraSettings::default_height")]
    pub height: u32,
    #[serde(default = "CameraSettings::default_fps")]
    pub fps: u32,
    /// Directory recordings are written to; `~` is expanded
    #[serde(default = "CameraSettings::default_output_dir")]
    pub output_dir: PathBuf,
    /// Length of a timed (covert) recording
    #[serde(default = "CameraSettings::default_timed_recording")]
    pub timed_recording_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            default_index: 0,
            width: Self::default_width(),
            height: Self::default_height(),
            fps: Self::default_fps(),
            output_dir: Self::default_output_dir(),
            timed_recording_ms: Self::default_timed_recording(),
        }
    }
}

impl CameraSettings {
    fn default_width() -> u32 {
        640
    }

    fn default_height() -> u32 {
        480
    }

    fn default_fps() -> u32 {
        30
    }

    fn default_output_dir() -> PathBuf {
        if let Some(video_dir) = dirs::video_dir() {
            video_dir.join("devctl")
        } else {
            PathBuf::from("/var/lib/devctl/recordings")
        }
    }

    fn default_timed_recording() -> u64 {
        1000
    }

    /// Output directory with `~` expanded
    pub fn resolved_output_dir(&self) -> PathBuf {
        let raw = self.output_dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(&raw).as_ref())
    }

    pub fn timed_recording(&self) -> Duration {
        Duration::from_millis(self.timed_recording_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_addr: "127.0.0.1:5000".to_string(),
                log_level: "info".to_string(),
            },
            platform: PlatformSettings::default(),
            enumeration: EnumerationSettings::default(),
            operations: OperationSettings::default(),
            camera: CameraSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/devctl/server.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("devctl").join("server.toml")
        } else {
            PathBuf::from(".config/devctl/server.toml")
        }
    }

    /// Identity scheme configured for a class
    pub fn identity_scheme(&self, class: DeviceClass) -> IdentityScheme {
        self.enumeration
            .identity
            .get(&class)
            .copied()
            .unwrap_or_default()
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.server
            .bind_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("Invalid bind_addr '{}': {}", self.server.bind_addr, e))?;

        if self.platform.workers == 0 {
            return Err(anyhow!("platform.workers must be at least 1"));
        }

        if self.operations.timeout_secs == 0 {
            return Err(anyhow!("operations.timeout_secs must be greater than 0"));
        }

        if self.camera.fps == 0 || self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width, height and fps must be greater than 0"));
        }

        Ok(())
    }
}
