//! Server configuration: listener ports, storage layout, retention and
//! sealing knobs. Loaded from a YAML file; every field has a default so
//! a missing file yields a runnable dev configuration.

use crate::error::{Result, SiemError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listener and queue settings
    pub ingestion: IngestionConfig,
    /// Data directory and retention
    pub storage: StorageConfig,
    /// Block sealing tuning
    pub forensics: ForensicsConfig,
    /// Response action settings
    pub notifications: NotificationConfig,
}

/// Listener ports and pipeline sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Syslog UDP+TCP port
    pub syslog_port: u16,
    /// HTTP Event Collector port
    pub hec_port: u16,
    /// Static HEC token accepted via `Splunk` header or `?token=`
    pub hec_token: String,
    /// NetFlow v5 UDP port
    pub netflow_port: u16,
    /// Bounded queue capacity; producers drop on full
    pub queue_capacity: usize,
    /// Events per storage flush
    pub batch_size: usize,
    /// Partial-batch flush tick, seconds
    pub flush_interval_secs: u64,
    /// Files tailed line-by-line into the pipeline
    pub tail_files: Vec<PathBuf>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            syslog_port: 5514,
            hec_port: 8088,
            hec_token: String::new(),
            netflow_port: 2055,
            queue_capacity: 10_000,
            batch_size: 100,
            flush_interval_secs: 1,
            tail_files: Vec::new(),
        }
    }
}

/// Where state lives and how long events are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for all persistent state
    pub base_dir: PathBuf,
    /// Days of raw events to keep; <= 0 disables the retention sweep
    pub retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            retention_days: 30,
        }
    }
}

fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palisade")
}

/// Forensic sealer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForensicsConfig {
    /// Events per sealed block
    pub block_size: usize,
    /// Periodic seal tick, seconds
    pub sealing_period_secs: u64,
}

impl Default for ForensicsConfig {
    fn default() -> Self {
        Self {
            block_size: 100,
            sealing_period_secs: 300,
        }
    }
}

/// Settings handed to the notify response action. Passed through the
/// action constructor, never installed process-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Minimum alert severity worth notifying about
    pub min_severity: crate::model::Severity,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            min_severity: crate::model::Severity::High,
        }
    }
}

impl Config {
    /// Load from a YAML file. A missing file returns the defaults;
    /// an unreadable or unparseable file is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| SiemError::Config(format!("read {}: {e}", path.display())))?;
        let cfg: Config = serde_yaml::from_str(&text)
            .map_err(|e| SiemError::Config(format!("parse {}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ingestion.queue_capacity == 0 {
            return Err(SiemError::Config("queue_capacity must be > 0".into()));
        }
        if self.ingestion.batch_size == 0 {
            return Err(SiemError::Config("batch_size must be > 0".into()));
        }
        if self.forensics.block_size == 0 {
            return Err(SiemError::Config("forensics block_size must be > 0".into()));
        }
        if self.storage.base_dir.as_os_str().is_empty() {
            return Err(SiemError::Config("storage base_dir must be set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.ingestion.queue_capacity, 10_000);
        assert_eq!(cfg.ingestion.batch_size, 100);
        assert_eq!(cfg.forensics.block_size, 100);
        assert_eq!(cfg.forensics.sealing_period_secs, 300);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/palisade.yaml")).unwrap();
        assert_eq!(cfg.storage.retention_days, 30);
    }

    #[test]
    fn partial_yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(
            &path,
            "ingestion:\n  syslog_port: 10514\nstorage:\n  retention_days: 7\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.ingestion.syslog_port, 10514);
        assert_eq!(cfg.storage.retention_days, 7);
        assert_eq!(cfg.ingestion.hec_port, 8088);
    }

    #[test]
    fn garbage_yaml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, ": not yaml {{{{").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut cfg = Config::default();
        cfg.ingestion.queue_capacity = 0;
        assert!(cfg.validate().is_err());
    }
}
