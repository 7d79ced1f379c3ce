//! Service configuration
//!
//! Resolution order, highest priority first:
//! 1. `SCOPEVIEW_*` environment variables
//! 2. TOML file named by `SCOPEVIEW_CONFIG` (default `scopeview.toml`
//!    in the working directory, if present)
//! 3. Built-in defaults

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP bind address
    pub bind_address: String,
    pub port: u16,

    /// Root directory for frames, uploads, and export bundles
    pub storage_root: PathBuf,

    /// SQLite database file
    pub database_path: PathBuf,

    /// Base URL of the vision-language model server
    pub model_server_url: String,
    pub model_name: String,

    /// Target sampling rate in frames per second
    pub target_fps: f64,

    /// Frames per inference batch
    pub batch_size: usize,

    /// Per-frame inference timeout (seconds)
    pub inference_timeout_secs: u64,

    /// ffprobe metadata timeout (seconds)
    pub probe_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5810,
            storage_root: PathBuf::from("./scopeview-data"),
            database_path: PathBuf::from("./scopeview-data/scopeview.db"),
            model_server_url: "http://127.0.0.1:8000".to_string(),
            model_name: "medgemma-4b-it".to_string(),
            target_fps: 1.0,
            batch_size: 10,
            inference_timeout_secs: 120,
            probe_timeout_secs: 10,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from file and environment
    pub fn load() -> sv_common::Result<Self> {
        let config_path = std::env::var("SCOPEVIEW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("scopeview.toml"));

        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env();
        config.validate()?;

        Ok(config)
    }

    fn from_file(path: &Path) -> sv_common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            sv_common::Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Environment variables override file values
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SCOPEVIEW_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Ok(v) = std::env::var("SCOPEVIEW_PORT") {
            if let Ok(port) = v.parse() {
                self.port = port;
            }
        }
        if let Ok(v) = std::env::var("SCOPEVIEW_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SCOPEVIEW_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SCOPEVIEW_MODEL_SERVER_URL") {
            self.model_server_url = v;
        }
        if let Ok(v) = std::env::var("SCOPEVIEW_MODEL_NAME") {
            self.model_name = v;
        }
        if let Ok(v) = std::env::var("SCOPEVIEW_TARGET_FPS") {
            if let Ok(fps) = v.parse() {
                self.target_fps = fps;
            }
        }
        if let Ok(v) = std::env::var("SCOPEVIEW_BATCH_SIZE") {
            if let Ok(size) = v.parse() {
                self.batch_size = size;
            }
        }
        if let Ok(v) = std::env::var("SCOPEVIEW_INFERENCE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.inference_timeout_secs = secs;
            }
        }
    }

    fn validate(&self) -> sv_common::Result<()> {
        if self.target_fps <= 0.0 {
            return Err(sv_common::Error::Config(
                "target_fps must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(sv_common::Error::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.target_fps, 1.0);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.inference_timeout_secs, 120);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: ServiceConfig = toml::from_str("port = 6000\ntarget_fps = 2.0\n").unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.target_fps, 2.0);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_validation_rejects_zero_fps() {
        let config = ServiceConfig {
            target_fps: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
