//! Airtime computation for spins appended to a timeline.
//!
//! Everything here is a pure function of the timeline tail, the audio block being
//! placed and the current time.

use crate::station_store::{AudioBlock, AudioBlockKind, ScheduledSpin};
use chrono::{DateTime, Duration, Utc};

/// Width of an airtime block. Commercials are placed whenever the timeline ends in a new block.
pub const AIRTIME_BLOCK_MS: i64 = 30 * 60 * 1000;

/// How far behind "now" an empty timeline starts.
pub const EMPTY_TIMELINE_LEAD_MS: i64 = 10_000;

/// Index of the 30-minute bucket `airtime` falls in.
pub fn airtime_block(airtime: DateTime<Utc>) -> i64 {
    airtime.timestamp_millis().div_euclid(AIRTIME_BLOCK_MS)
}

/// When the spin's message ends.
pub fn spin_end(spin: &ScheduledSpin) -> DateTime<Utc> {
    spin.end_of_message()
}

/// Where an empty timeline starts.
pub fn timeline_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::milliseconds(EMPTY_TIMELINE_LEAD_MS)
}

/// Message time the voicetrack still has left once `prior` (the item it overlaps) has ended.
pub fn ms_left_in_voicetrack(voicetrack: &ScheduledSpin, prior: Option<&ScheduledSpin>) -> i64 {
    let voicetrack_eom = voicetrack.audio_block.end_of_message_ms();
    match prior {
        None => voicetrack_eom,
        Some(prior) => {
            let overlap = (spin_end(prior) - voicetrack.spin.airtime).num_milliseconds();
            voicetrack_eom - overlap
        }
    }
}

/// Start time for `block` appended after `tail`.
pub fn airtime_for_spin(
    tail: &[ScheduledSpin],
    block: &AudioBlock,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(previous) = tail.last() else {
        return timeline_start(now);
    };

    match (previous.kind(), block.kind) {
        (_, AudioBlockKind::Voicetrack) => airtime_for_voicetrack(previous, block),
        (AudioBlockKind::Voicetrack, AudioBlockKind::Song) => {
            let prior = tail.len().checked_sub(2).map(|i| &tail[i]);
            airtime_for_song_after_voicetrack(previous, prior, block)
        }
        _ => spin_end(previous),
    }
}

fn airtime_for_voicetrack(previous: &ScheduledSpin, voicetrack: &AudioBlock) -> DateTime<Utc> {
    if previous.kind() != AudioBlockKind::Song {
        return spin_end(previous);
    }

    let previous_block = &previous.audio_block;
    if previous_block.outro_length_ms() <= voicetrack.duration_ms {
        // Rides the whole outro.
        previous.spin.airtime + Duration::milliseconds(previous_block.beginning_of_outro_ms())
    } else {
        previous.spin.airtime + Duration::milliseconds(voicetrack.duration_ms / 2)
    }
}

fn airtime_for_song_after_voicetrack(
    voicetrack: &ScheduledSpin,
    prior: Option<&ScheduledSpin>,
    song: &AudioBlock,
) -> DateTime<Utc> {
    let intro_ms = song.end_of_intro_ms();
    if ms_left_in_voicetrack(voicetrack, prior) <= intro_ms {
        // The voicetrack tail bleeds into the intro.
        prior.map(spin_end).unwrap_or_else(|| spin_end(voicetrack))
    } else {
        spin_end(voicetrack) - Duration::milliseconds(intro_ms)
    }
}
