//! Station Scheduler Library
//!
//! Per-listener rolling radio schedules: storage, the generation and reflow
//! engine, and the background jobs that keep timelines ahead of the clock.

pub mod background_jobs;
pub mod config;
pub mod scheduling;
pub mod sqlite_persistence;
pub mod station_store;

// Re-export commonly used types for convenience
pub use scheduling::{PlaylistGenerator, ScheduleError, ScheduleResult};
pub use station_store::{SqliteStationStore, StationStore};
