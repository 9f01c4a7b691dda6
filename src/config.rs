//! Service configuration
//!
//! Loaded from `config.json` in the platform configuration directory (or an
//! explicit path). A missing file yields the defaults; `CHANGEMAP_ENDPOINT` and
//! `CHANGEMAP_TOKEN` override the file.

use crate::types::{ChangeError, ChangeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENDPOINT_ENV: &str = "CHANGEMAP_ENDPOINT";
pub const TOKEN_ENV: &str = "CHANGEMAP_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the compute service API
    pub endpoint: String,
    /// Bearer token for the compute service
    pub token: Option<String>,
    /// Transport timeout per request (seconds)
    pub timeout_secs: u64,

    /// Drive folder receiving file exports
    pub drive_folder: String,
    /// Pixel ceiling passed with every export
    pub max_pixels: f64,

    /// Zoom level of result maps
    pub zoom: u8,
    /// Scale of direct download links (meters)
    pub download_scale: f64,
    /// Maximum shift allowed when co-registering image pairs (meters)
    pub registration_max_offset: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".to_string(),
            token: None,
            timeout_secs: 300, // kernel evaluations can be slow

            drive_folder: "EarthEngineImages".to_string(),
            max_pixels: 1e9,

            zoom: 10,
            download_scale: 10.0,
            registration_max_offset: 60.0,
        }
    }
}

impl ServiceConfig {
    /// Default location: `<config dir>/changemap/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("changemap").join("config.json"))
    }

    /// Load from the default location, then apply environment overrides
    pub fn load() -> ChangeResult<Self> {
        let config = match Self::default_path() {
            Some(path) => Self::load_from(&path)?,
            None => {
                log::warn!("No platform configuration directory, using defaults");
                Self::default()
            }
        };
        Ok(config.with_env_overrides())
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> ChangeResult<Self> {
        if !path.exists() {
            log::debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        log::info!("Reading configuration: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> ChangeResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            self.endpoint = endpoint;
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            self.token = Some(token);
        }
        self
    }

    pub fn validate(&self) -> ChangeResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ChangeError::Config("endpoint must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ChangeError::Config("timeout_secs must be positive".to_string()));
        }
        if !(self.max_pixels > 0.0) {
            return Err(ChangeError::Config("max_pixels must be positive".to_string()));
        }
        if !(self.download_scale > 0.0) {
            return Err(ChangeError::Config("download_scale must be positive".to_string()));
        }
        Ok(())
    }
}
