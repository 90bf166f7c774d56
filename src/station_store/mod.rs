mod models;
mod schema;
mod sqlite_station_store;

pub use models::*;
pub use schema::STATION_VERSIONED_SCHEMAS;
pub use sqlite_station_store::SqliteStationStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait StationStore: Send + Sync {
    // Listeners
    fn create_listener(&self, id: &str, display_name: Option<&str>) -> Result<Listener>;
    fn listener_exists(&self, id: &str) -> Result<bool>;
    fn list_listener_ids(&self) -> Result<Vec<String>>;

    // Audio catalog
    fn insert_audio_block(&self, block: &NewAudioBlock) -> Result<AudioBlock>;
    fn get_audio_block(&self, id: &str) -> Result<Option<AudioBlock>>;
    /// Updates the duration. Unset cue points follow the new duration.
    fn update_audio_block_duration(&self, id: &str, duration_ms: i64) -> Result<bool>;
    /// Returns the block stored under `url`, creating it from `defaults` when missing.
    fn find_or_create_audio_block_by_url(
        &self,
        url: &str,
        defaults: &NewAudioBlock,
    ) -> Result<AudioBlock>;
    /// Get audio block events since a given sequence number (exclusive).
    fn get_audio_block_events_since(&self, since_seq: i64) -> Result<Vec<AudioBlockEvent>>;

    // Song pools
    fn add_station_song(&self, user_id: &str, song_id: &str, user_affinity: f64) -> Result<i64>;
    /// Station songs whose song has a playable audio URL.
    fn get_active_station_songs(&self, user_id: &str) -> Result<Vec<StationSong>>;

    // Spins
    fn get_spin(&self, spin_id: i64) -> Result<Option<ScheduledSpin>>;
    /// Spins of a window ordered by playlist position ascending.
    fn get_playlist(
        &self,
        user_id: &str,
        window: PlaylistWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSpin>>;
    /// Spins with `playlist_position >= min_position`, ordered by position.
    fn get_spins_from_position(&self, user_id: &str, min_position: i64)
        -> Result<Vec<ScheduledSpin>>;
    /// Song spins whose airtime lies in `[from, to]`.
    fn get_song_spins_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSpin>>;
    /// Most recently scheduled song spins, highest position first.
    fn get_recent_song_spins(&self, user_id: &str, limit: usize) -> Result<Vec<ScheduledSpin>>;
    fn create_spin(&self, spin: &NewSpin) -> Result<Spin>;
    /// Persists new airtimes and positions for `updated`, inserts `created` and
    /// deletes `removed` in a single transaction.
    fn commit_reflow(&self, updated: &[Spin], created: &[NewSpin], removed: &[i64]) -> Result<()>;
    fn delete_spin(&self, spin_id: i64) -> Result<bool>;
    /// Deletes the listener's spins that aired before `cutoff`. Returns the count.
    fn delete_spins_before(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<usize>;
}
