mod file_config;

pub use file_config::{BackgroundJobsConfig, CommercialsConfig, FileConfig, SchedulingConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

pub const DEFAULT_HORIZON_HOURS: u64 = 4;
pub const DEFAULT_COMMERCIALS_BASE_URL: &str = "https://commercials.example.com";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub horizon_hours: Option<u64>,
    pub commercials_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub scheduling: SchedulingSettings,
    pub commercials: CommercialSettings,
    pub background_jobs: BackgroundJobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let scheduling_file = file.scheduling.unwrap_or_default();
        let scheduling = SchedulingSettings {
            horizon_hours: scheduling_file
                .horizon_hours
                .or(cli.horizon_hours)
                .unwrap_or(DEFAULT_HORIZON_HOURS),
        };
        if scheduling.horizon_hours == 0 {
            bail!("scheduling.horizon_hours must be at least 1");
        }

        let commercials_file = file.commercials.unwrap_or_default();
        let commercial_defaults = CommercialSettings::default();
        let commercials = CommercialSettings {
            base_url: commercials_file
                .base_url
                .or_else(|| cli.commercials_base_url.clone())
                .unwrap_or(commercial_defaults.base_url),
            inventory_size: commercials_file
                .inventory_size
                .unwrap_or(commercial_defaults.inventory_size),
            nominal_duration_ms: commercials_file
                .nominal_duration_ms
                .unwrap_or(commercial_defaults.nominal_duration_ms),
        };
        if commercials.inventory_size == 0 {
            bail!("commercials.inventory_size must be at least 1");
        }
        if commercials.nominal_duration_ms <= 0 {
            bail!("commercials.nominal_duration_ms must be positive");
        }

        let jobs_file = file.background_jobs.unwrap_or_default();
        let jobs_defaults = BackgroundJobsSettings::default();
        let background_jobs = BackgroundJobsSettings {
            extend_interval_minutes: jobs_file
                .extend_interval_minutes
                .unwrap_or(jobs_defaults.extend_interval_minutes),
            cleanup_interval_minutes: jobs_file
                .cleanup_interval_minutes
                .unwrap_or(jobs_defaults.cleanup_interval_minutes),
            spin_retention_hours: jobs_file
                .spin_retention_hours
                .unwrap_or(jobs_defaults.spin_retention_hours),
            max_attempts: jobs_file
                .max_attempts
                .unwrap_or(jobs_defaults.max_attempts)
                .max(1),
        };
        if background_jobs.extend_interval_minutes == 0 {
            bail!("background_jobs.extend_interval_minutes must be at least 1");
        }
        if background_jobs.cleanup_interval_minutes == 0 {
            bail!("background_jobs.cleanup_interval_minutes must be at least 1");
        }

        Ok(Self {
            db_dir,
            scheduling,
            commercials,
            background_jobs,
        })
    }

    pub fn station_db_path(&self) -> PathBuf {
        self.db_dir.join("station.db")
    }
}

#[derive(Debug, Clone)]
pub struct SchedulingSettings {
    pub horizon_hours: u64,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            horizon_hours: DEFAULT_HORIZON_HOURS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommercialSettings {
    pub base_url: String,
    /// Number of pre-produced commercial blocks, numbered from 1.
    pub inventory_size: u32,
    pub nominal_duration_ms: i64,
}

impl Default for CommercialSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_COMMERCIALS_BASE_URL.to_string(),
            inventory_size: 27,
            nominal_duration_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundJobsSettings {
    pub extend_interval_minutes: u64,
    pub cleanup_interval_minutes: u64,
    pub spin_retention_hours: u64,
    pub max_attempts: u32,
}

impl Default for BackgroundJobsSettings {
    fn default() -> Self {
        Self {
            extend_interval_minutes: 15,
            cleanup_interval_minutes: 60,
            spin_retention_hours: 2,
            max_attempts: 2,
        }
    }
}
