use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use station_scheduler::background_jobs::jobs::{ExtendSchedulesJob, SpinCleanupJob};
use station_scheduler::background_jobs::{JobContext, JobRunStatus, JobScheduler};
use station_scheduler::config;
use station_scheduler::scheduling::PlaylistGenerator;
use station_scheduler::station_store::{
    AudioBlockKind, NewAudioBlock, PlaylistWindow, SqliteStationStore, StationStore,
};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

fn parse_window(s: &str) -> Result<PlaylistWindow, String> {
    PlaylistWindow::parse(s).ok_or_else(|| format!("Unknown window '{}'", s))
}

fn parse_kind(s: &str) -> Result<AudioBlockKind, String> {
    AudioBlockKind::parse(s).ok_or_else(|| format!("Unknown audio block kind '{}'", s))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the station database (station.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// How many hours ahead schedules are generated.
    #[clap(long)]
    pub horizon_hours: Option<u64>,

    /// Base URL the commercial block files are served from.
    #[clap(long)]
    pub commercials_base_url: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background jobs until interrupted.
    Run,
    /// Extend schedules up to the horizon once and print a report.
    Extend {
        /// Only extend these listeners. Defaults to every listener.
        #[clap(long)]
        user: Vec<String>,
    },
    /// Print a window of a listener's timeline as JSON.
    Show {
        user: String,
        /// One of: current, extended, full.
        #[clap(long, default_value = "extended", value_parser = parse_window)]
        window: PlaylistWindow,
    },
    /// Delete spins older than the retention period once.
    Cleanup,
    /// Create a listener.
    AddListener {
        id: String,
        #[clap(long)]
        name: Option<String>,
    },
    /// Create an audio block and, for songs, optionally add it to a listener's station.
    AddBlock {
        #[clap(long, default_value = "song", value_parser = parse_kind)]
        kind: AudioBlockKind,
        #[clap(long)]
        title: String,
        #[clap(long)]
        artist: String,
        #[clap(long)]
        duration_ms: i64,
        #[clap(long)]
        popularity: Option<i32>,
        #[clap(long)]
        audio_url: Option<String>,
        /// Listener whose station should rotate this song.
        #[clap(long)]
        station: Option<String>,
        #[clap(long, default_value_t = 0.0)]
        affinity: f64,
    },
    /// Insert an audio block at a timeline position.
    Insert {
        user: String,
        audio_block_id: String,
        position: i64,
    },
    /// Move a spin to another timeline position.
    Move {
        user: String,
        spin_id: i64,
        position: i64,
    },
    /// Remove a spin from the timeline.
    Delete { user: String, spin_id: i64 },
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            horizon_hours: args.horizon_hours,
            commercials_base_url: args.commercials_base_url.clone(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    if !app_config.station_db_path().exists() {
        info!(
            "Creating new station database at {:?}",
            app_config.station_db_path()
        );
    }
    let store = Arc::new(SqliteStationStore::new(app_config.station_db_path())?);
    let generator = Arc::new(PlaylistGenerator::new(
        store.clone(),
        &app_config.scheduling,
        app_config.commercials.clone(),
        StdRng::from_os_rng(),
    ));

    let jobs_settings = &app_config.background_jobs;
    let extend_job = ExtendSchedulesJob::new(
        Duration::from_secs(jobs_settings.extend_interval_minutes * 60),
        jobs_settings.max_attempts,
    );
    let cleanup_job = SpinCleanupJob::new(
        Duration::from_secs(jobs_settings.cleanup_interval_minutes * 60),
        jobs_settings.spin_retention_hours,
    );

    match cli_args.command {
        Command::Run => {
            info!("Configuration loaded:");
            info!("  db_dir: {:?}", app_config.db_dir);
            info!("  horizon_hours: {}", app_config.scheduling.horizon_hours);
            info!("  commercials: {}", app_config.commercials.base_url);

            let shutdown_token = CancellationToken::new();
            let job_context = JobContext::new(shutdown_token.child_token(), generator);
            let mut scheduler = JobScheduler::new(shutdown_token.clone(), job_context);
            scheduler.register_job(Arc::new(extend_job));
            scheduler.register_job(Arc::new(cleanup_job));
            info!(
                "Job scheduler initialized with {} job(s)",
                scheduler.job_count()
            );
            let history = scheduler.history();

            let scheduler_task = tokio::spawn(async move { scheduler.run().await });

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            if let Err(e) = scheduler_task.await {
                error!("Scheduler task failed: {}", e);
            }

            let runs = history.runs();
            let failed: Vec<_> = runs
                .iter()
                .filter(|run| run.status == JobRunStatus::Failed)
                .collect();
            info!("{} recent job runs, {} failed", runs.len(), failed.len());
            for run in failed {
                warn!(
                    "  {} started {} ({}): {}",
                    run.job_id,
                    run.started_at,
                    run.triggered_by,
                    run.error_message.as_deref().unwrap_or("no error message")
                );
            }
        }
        Command::Extend { user } => {
            let ctx = JobContext::new(CancellationToken::new(), generator);
            let only = if user.is_empty() { None } else { Some(user) };
            let report = tokio::task::spawn_blocking(move || {
                extend_job.run_batch(&ctx, only.as_deref(), Utc::now())
            })
            .await??;

            println!(
                "Extended {} of {} listeners: {} spins ({} commercials, {} fallback picks)",
                report.succeeded,
                report.attempted(),
                report.spins_created,
                report.commercials_created,
                report.fallback_picks
            );
            for failure in &report.failed {
                println!(
                    "  {} failed [{}]: {}",
                    failure.user_id, failure.kind, failure.message
                );
            }
        }
        Command::Show { user, window } => {
            let spins = generator.playlist(&user, window, Utc::now())?;
            print_json(&spins)?;
        }
        Command::Cleanup => {
            let ctx = JobContext::new(CancellationToken::new(), generator);
            let deleted = cleanup_job.cleanup(&ctx, Utc::now())?;
            println!(
                "Deleted {} spins older than {}",
                deleted,
                Utc::now() - ChronoDuration::hours(jobs_settings.spin_retention_hours as i64)
            );
        }
        Command::AddListener { id, name } => {
            let listener = store.create_listener(&id, name.as_deref())?;
            print_json(&listener)?;
        }
        Command::AddBlock {
            kind,
            title,
            artist,
            duration_ms,
            popularity,
            audio_url,
            station,
            affinity,
        } => {
            let mut new_block = NewAudioBlock::new(kind, &title, &artist, duration_ms);
            new_block.popularity = popularity;
            new_block.audio_url = audio_url;
            let block = store.insert_audio_block(&new_block)?;
            if let Some(user_id) = station {
                store.add_station_song(&user_id, &block.id, affinity)?;
            }
            print_json(&block)?;
        }
        Command::Insert {
            user,
            audio_block_id,
            position,
        } => {
            let spins = generator.insert_spin(&user, &audio_block_id, position, Utc::now())?;
            print_json(&spins)?;
        }
        Command::Move {
            user,
            spin_id,
            position,
        } => {
            let spins = generator.move_spin(&user, spin_id, position, Utc::now())?;
            print_json(&spins)?;
        }
        Command::Delete { user, spin_id } => {
            let spins = generator.delete_spin(&user, spin_id, Utc::now())?;
            print_json(&spins)?;
        }
    }

    Ok(())
}
