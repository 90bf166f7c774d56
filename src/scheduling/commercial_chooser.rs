use super::error::ScheduleResult;
use crate::config::CommercialSettings;
use crate::station_store::{AudioBlock, AudioBlockKind, NewAudioBlock, StationStore};
use rand::Rng;

pub const COMMERCIAL_TITLE: &str = "Commercial";
pub const COMMERCIAL_ARTIST: &str = "------";

/// Picks commercial blocks from a fixed rotation of pre-produced files.
pub struct CommercialChooser {
    settings: CommercialSettings,
}

impl CommercialChooser {
    pub fn new(settings: CommercialSettings) -> Self {
        Self { settings }
    }

    /// Canonical URL of the commercial block at `index` (1-based).
    pub fn audio_url_for_index(&self, index: u32) -> String {
        format!(
            "{}/{:04}_commercial_block.mp3",
            self.settings.base_url.trim_end_matches('/'),
            index
        )
    }

    /// Draws a random block from the rotation, creating its catalog entry on first use.
    pub fn choose_commercial<R: Rng + ?Sized>(
        &self,
        store: &dyn StationStore,
        rng: &mut R,
    ) -> ScheduleResult<AudioBlock> {
        let index = rng.random_range(1..=self.settings.inventory_size.max(1));
        let url = self.audio_url_for_index(index);
        let defaults = NewAudioBlock::new(
            AudioBlockKind::Commercial,
            COMMERCIAL_TITLE,
            COMMERCIAL_ARTIST,
            self.settings.nominal_duration_ms,
        );
        Ok(store.find_or_create_audio_block_by_url(&url, &defaults)?)
    }
}
