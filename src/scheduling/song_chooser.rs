use super::error::{ScheduleError, ScheduleResult};
use crate::station_store::{AudioBlock, StationSong, StationStore};
use chrono::{DateTime, Duration, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, warn};

/// A listener needs at least this many active station songs to get a schedule.
pub const MIN_STATION_SONGS: usize = 100;
pub const ARTIST_REST_MINUTES: i64 = 70;
pub const SONG_REST_MINUTES: i64 = 180;
/// Share of the pool, by popularity, counted as "more popular".
const POPULAR_SHARE: f64 = 0.3;
const RECENT_SONGS_INSPECTED: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopularityLevel {
    High,
    Low,
}

/// Result of a song pick.
#[derive(Debug, Clone)]
pub struct SongPick {
    pub song: AudioBlock,
    /// Every song was resting, the pick ignores the rest windows.
    pub fallback: bool,
}

/// Picks songs from a listener's pool, honoring artist and song rest windows and
/// alternating between more and less popular songs.
pub struct SongChooser {
    user_id: String,
    /// Sorted by descending popularity.
    pool: Vec<StationSong>,
    popularity_lower_bound: i32,
}

impl SongChooser {
    pub fn new(user_id: &str, station_songs: Vec<StationSong>) -> ScheduleResult<Self> {
        if station_songs.len() < MIN_STATION_SONGS {
            return Err(ScheduleError::NotEnoughStationSongs {
                user_id: user_id.to_string(),
                found: station_songs.len(),
            });
        }

        let mut pool = station_songs;
        pool.sort_by_key(|s| std::cmp::Reverse(s.song.popularity_or_zero()));

        let boundary_index = ((POPULAR_SHARE * pool.len() as f64).floor() as usize).max(1) - 1;
        let popularity_lower_bound = pool[boundary_index].song.popularity_or_zero();
        debug!(
            "Song pool for {}: {} songs, popularity lower bound {}",
            user_id,
            pool.len(),
            popularity_lower_bound
        );

        Ok(Self {
            user_id: user_id.to_string(),
            pool,
            popularity_lower_bound,
        })
    }

    pub fn popularity_lower_bound(&self) -> i32 {
        self.popularity_lower_bound
    }

    /// Picks a song to air at `airtime`.
    pub fn choose_song<R: Rng + ?Sized>(
        &self,
        store: &dyn StationStore,
        airtime: DateTime<Utc>,
        rng: &mut R,
    ) -> ScheduleResult<SongPick> {
        let artists_to_rest: HashSet<String> = store
            .get_song_spins_between(
                &self.user_id,
                airtime - Duration::minutes(ARTIST_REST_MINUTES),
                airtime,
            )?
            .into_iter()
            .map(|s| s.audio_block.artist)
            .collect();
        let songs_to_rest: HashSet<String> = store
            .get_song_spins_between(
                &self.user_id,
                airtime - Duration::minutes(SONG_REST_MINUTES),
                airtime,
            )?
            .into_iter()
            .map(|s| s.spin.audio_block_id)
            .collect();

        let candidates: Vec<&AudioBlock> = self
            .pool
            .iter()
            .map(|s| &s.song)
            .filter(|song| {
                !songs_to_rest.contains(&song.id) && !artists_to_rest.contains(&song.artist)
            })
            .collect();

        let (high, low): (Vec<&AudioBlock>, Vec<&AudioBlock>) = candidates
            .into_iter()
            .partition(|song| song.popularity_or_zero() >= self.popularity_lower_bound);

        let (preferred, other) = match self.preferred_popularity_level(store)? {
            PopularityLevel::High => (high, low),
            PopularityLevel::Low => (low, high),
        };

        match preferred.choose(rng).or_else(|| other.choose(rng)) {
            Some(song) => Ok(SongPick {
                song: (*song).clone(),
                fallback: false,
            }),
            None => self.fallback_pick(rng),
        }
    }

    /// Only the most recently scheduled song counts: a less popular one asks for a
    /// popular pick next, anything else for a less popular one.
    pub fn preferred_popularity_level(
        &self,
        store: &dyn StationStore,
    ) -> ScheduleResult<PopularityLevel> {
        let recent = store.get_recent_song_spins(&self.user_id, RECENT_SONGS_INSPECTED)?;
        let level = match recent.first() {
            Some(last) if last.audio_block.popularity_or_zero() < self.popularity_lower_bound => {
                PopularityLevel::High
            }
            _ => PopularityLevel::Low,
        };
        Ok(level)
    }

    fn fallback_pick<R: Rng + ?Sized>(&self, rng: &mut R) -> ScheduleResult<SongPick> {
        warn!(
            "No rested-out candidates for listener {}, picking from the whole pool",
            self.user_id
        );
        let station_song = self.pool.choose(rng).ok_or_else(|| {
            ScheduleError::NotEnoughStationSongs {
                user_id: self.user_id.clone(),
                found: 0,
            }
        })?;
        Ok(SongPick {
            song: station_song.song.clone(),
            fallback: true,
        })
    }
}
