#![allow(dead_code)]

use super::constants::RNG_SEED;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use station_scheduler::config::{CommercialSettings, SchedulingSettings};
use station_scheduler::scheduling::timing::airtime_block;
use station_scheduler::scheduling::PlaylistGenerator;
use station_scheduler::station_store::{
    AudioBlock, AudioBlockKind, NewAudioBlock, PlaylistWindow, ScheduledSpin, SqliteStationStore,
    StationStore,
};
use std::sync::Arc;

pub struct TestStation {
    pub store: Arc<SqliteStationStore>,
    pub generator: Arc<PlaylistGenerator>,
}

impl TestStation {
    pub fn new() -> Self {
        Self::with_commercials(CommercialSettings::default())
    }

    pub fn with_commercials(commercials: CommercialSettings) -> Self {
        let store = Arc::new(SqliteStationStore::in_memory().unwrap());
        let generator = Arc::new(PlaylistGenerator::new(
            store.clone(),
            &SchedulingSettings { horizon_hours: 4 },
            commercials,
            StdRng::seed_from_u64(RNG_SEED),
        ));
        Self { store, generator }
    }

    pub fn add_listener(&self, user_id: &str) {
        self.store.create_listener(user_id, None).unwrap();
    }

    pub fn add_block(&self, kind: AudioBlockKind, title: &str, duration_ms: i64) -> AudioBlock {
        self.store
            .insert_audio_block(&NewAudioBlock::new(kind, title, title, duration_ms))
            .unwrap()
    }

    /// Creates a listener whose station rotates `songs` songs, each by its own artist.
    pub fn add_listener_with_songs(&self, user_id: &str, songs: usize, duration_ms: i64) {
        self.add_listener(user_id);
        for i in 0..songs {
            let mut block = NewAudioBlock::new(
                AudioBlockKind::Song,
                &format!("{} song {}", user_id, i),
                &format!("{} artist {}", user_id, i),
                duration_ms,
            );
            block.audio_url = Some(format!(
                "https://media.example.com/{}/{}.mp3",
                user_id, i
            ));
            block.popularity = Some((i * 7 % 100) as i32);
            let song = self.store.insert_audio_block(&block).unwrap();
            self.store
                .add_station_song(user_id, &song.id, (i % 10) as f64 / 10.0)
                .unwrap();
        }
    }

    pub fn timeline(&self, user_id: &str) -> Vec<ScheduledSpin> {
        self.store
            .get_playlist(user_id, PlaylistWindow::Full, Utc::now())
            .unwrap()
    }
}

pub fn positions(spins: &[ScheduledSpin]) -> Vec<i64> {
    spins.iter().map(|s| s.spin.playlist_position).collect()
}

pub fn assert_consecutive_positions(spins: &[ScheduledSpin]) {
    for pair in spins.windows(2) {
        assert_eq!(
            pair[1].spin.playlist_position,
            pair[0].spin.playlist_position + 1,
            "positions must be consecutive: {:?}",
            positions(spins)
        );
    }
}

/// Whether the spin starts and ends in different airtime blocks.
pub fn straddles_boundary(spin: &ScheduledSpin) -> bool {
    airtime_block(spin.spin.airtime) != airtime_block(spin.end_of_message())
}
