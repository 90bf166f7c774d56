use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,

    // Feature configs
    pub scheduling: Option<SchedulingConfig>,
    pub commercials: Option<CommercialsConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulingConfig {
    /// How far ahead the periodic extend generates, in hours.
    pub horizon_hours: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CommercialsConfig {
    pub base_url: Option<String>,
    pub inventory_size: Option<u32>,
    pub nominal_duration_ms: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub extend_interval_minutes: Option<u64>,
    pub cleanup_interval_minutes: Option<u64>,
    pub spin_retention_hours: Option<u64>,
    /// Attempts per listener when extending hits a storage error.
    pub max_attempts: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
