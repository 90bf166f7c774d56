//! Inserting, moving and deleting spins on an existing timeline.

mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::*;
use station_scheduler::scheduling::ScheduleError;
use station_scheduler::station_store::{AudioBlockKind, ScheduledSpin, StationStore};
use std::collections::HashMap;

const SONG_MS: i64 = 50_000;
const SONG_EOM: i64 = 49_000;

/// 28 fifty-second songs starting at 12:00:10, all inside one airtime block.
fn edit_station() -> TestStation {
    let station = TestStation::new();
    station.add_listener_with_songs(LISTENER_ID, 100, SONG_MS);
    let now = block_start_now();
    station
        .generator
        .extend(LISTENER_ID, now, now + Duration::minutes(22))
        .unwrap();
    station
}

fn by_position(spins: &[ScheduledSpin]) -> HashMap<i64, ScheduledSpin> {
    spins
        .iter()
        .map(|s| (s.spin.playlist_position, s.clone()))
        .collect()
}

fn spin_at(spins: &[ScheduledSpin], position: i64) -> &ScheduledSpin {
    spins
        .iter()
        .find(|s| s.spin.playlist_position == position)
        .unwrap()
}

#[test]
fn test_edit_fixture_shape() {
    let station = edit_station();
    let timeline = station.timeline(LISTENER_ID);

    assert_eq!(positions(&timeline), (1..=28).collect::<Vec<_>>());
    assert!(timeline.iter().all(|s| s.kind() == AudioBlockKind::Song));
    assert_eq!(
        timeline[1].spin.airtime - timeline[0].spin.airtime,
        Duration::milliseconds(SONG_EOM)
    );
}

#[test]
fn test_move_later_spin_earlier_reflows_downstream() {
    let station = edit_station();
    let now = block_start_now();
    let before = station.timeline(LISTENER_ID);
    let old = by_position(&before);

    let moved = spin_at(&before, 27).clone();
    station
        .store
        .update_audio_block_duration(&moved.audio_block.id, 80_000)
        .unwrap();

    station
        .generator
        .move_spin(LISTENER_ID, moved.spin.id, 6, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_eq!(after.len(), before.len());
    assert_consecutive_positions(&after);
    assert_eq!(after[0].spin.playlist_position, 1);

    for position in 1..=5 {
        assert_eq!(spin_at(&after, position), &old[&position]);
    }

    let at_six = spin_at(&after, 6);
    assert_eq!(at_six.spin.id, moved.spin.id);
    assert_eq!(at_six.spin.airtime, old[&6].spin.airtime);

    // Everything that sat at 6..=26 moved down one slot and starts 79 seconds later.
    for position in 6..=26 {
        let shifted = spin_at(&after, position + 1);
        assert_eq!(shifted.spin.id, old[&position].spin.id);
        assert_eq!(
            shifted.spin.airtime,
            old[&position].spin.airtime + Duration::milliseconds(79_000)
        );
    }

    let last = spin_at(&after, 28);
    assert_eq!(last.spin.id, old[&28].spin.id);
    assert_eq!(
        last.spin.airtime,
        old[&28].spin.airtime + Duration::milliseconds(30_000)
    );
}

#[test]
fn test_move_spin_later() {
    let station = edit_station();
    let now = block_start_now();
    let before = station.timeline(LISTENER_ID);
    let old = by_position(&before);

    let moved_id = old[&5].spin.id;
    station
        .generator
        .move_spin(LISTENER_ID, moved_id, 20, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_consecutive_positions(&after);
    assert_eq!(spin_at(&after, 20).spin.id, moved_id);
    for position in 6..=20 {
        assert_eq!(spin_at(&after, position - 1).spin.id, old[&position].spin.id);
    }
    // Equal durations: every slot keeps its airtime.
    for position in 1..=28 {
        assert_eq!(spin_at(&after, position).spin.airtime, old[&position].spin.airtime);
    }
}

#[test]
fn test_move_to_same_position_changes_nothing() {
    let station = edit_station();
    let now = block_start_now();
    let before = station.timeline(LISTENER_ID);

    station
        .generator
        .move_spin(LISTENER_ID, spin_at(&before, 12).spin.id, 12, now)
        .unwrap();

    assert_eq!(station.timeline(LISTENER_ID), before);
}

#[test]
fn test_move_rejects_invalid_positions() {
    let station = edit_station();
    let now = block_start_now();
    let before = station.timeline(LISTENER_ID);

    let past_end = station
        .generator
        .move_spin(LISTENER_ID, spin_at(&before, 10).spin.id, 29, now)
        .unwrap_err();
    assert!(matches!(past_end, ScheduleError::InvalidPosition { position: 29, .. }));

    let onto_anchor = station
        .generator
        .move_spin(LISTENER_ID, spin_at(&before, 10).spin.id, 1, now)
        .unwrap_err();
    assert!(matches!(onto_anchor, ScheduleError::InvalidPosition { .. }));

    let from_anchor = station
        .generator
        .move_spin(LISTENER_ID, spin_at(&before, 1).spin.id, 5, now)
        .unwrap_err();
    assert!(matches!(from_anchor, ScheduleError::InvalidPosition { .. }));

    assert_eq!(station.timeline(LISTENER_ID), before);
}

#[test]
fn test_move_other_listeners_spin_is_not_found() {
    let station = edit_station();
    station.add_listener(OTHER_LISTENER_ID);
    let now = block_start_now();
    let spin_id = spin_at(&station.timeline(LISTENER_ID), 10).spin.id;

    let err = station
        .generator
        .move_spin(OTHER_LISTENER_ID, spin_id, 5, now)
        .unwrap_err();

    assert!(matches!(err, ScheduleError::SpinNotFound(id) if id == spin_id));
}

#[test]
fn test_insert_song_shifts_downstream() {
    let station = edit_station();
    let now = block_start_now();
    let old = by_position(&station.timeline(LISTENER_ID));
    let block = station.add_block(AudioBlockKind::Song, "Request", 60_000);

    station
        .generator
        .insert_spin(LISTENER_ID, &block.id, 10, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_eq!(after.len(), 29);
    assert_consecutive_positions(&after);

    let inserted = spin_at(&after, 10);
    assert_eq!(inserted.audio_block.id, block.id);
    assert_eq!(inserted.spin.airtime, old[&10].spin.airtime);

    for position in 10..=28 {
        let shifted = spin_at(&after, position + 1);
        assert_eq!(shifted.spin.id, old[&position].spin.id);
        assert_eq!(
            shifted.spin.airtime,
            old[&position].spin.airtime + Duration::milliseconds(59_000)
        );
    }
}

#[test]
fn test_insert_voicetrack_overlaps_neighbours() {
    let station = edit_station();
    let now = block_start_now();
    let old = by_position(&station.timeline(LISTENER_ID));
    let voicetrack = station.add_block(AudioBlockKind::Voicetrack, "Station ID", 20_000);

    station
        .generator
        .insert_spin(LISTENER_ID, &voicetrack.id, 10, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_consecutive_positions(&after);

    // The song before has no outro, so the voicetrack starts when its message ends.
    let inserted = spin_at(&after, 10);
    assert_eq!(inserted.kind(), AudioBlockKind::Voicetrack);
    assert_eq!(inserted.spin.airtime, old[&10].spin.airtime);

    // The next song's one second intro plays under the end of the voicetrack.
    let next = spin_at(&after, 11);
    assert_eq!(next.spin.id, old[&10].spin.id);
    assert_eq!(
        next.spin.airtime,
        inserted.spin.airtime + Duration::milliseconds(19_000 - 1_000)
    );
}

#[test]
fn test_insert_at_end_appends() {
    let station = edit_station();
    let now = block_start_now();
    let before = station.timeline(LISTENER_ID);
    let block = station.add_block(AudioBlockKind::Song, "Closer", 30_000);

    station
        .generator
        .insert_spin(LISTENER_ID, &block.id, 29, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_eq!(&after[..28], &before[..]);
    assert_eq!(after[28].audio_block.id, block.id);
    assert_eq!(after[28].spin.airtime, before[27].end_of_message());
}

#[test]
fn test_insert_rejects_invalid_requests() {
    let station = edit_station();
    let now = block_start_now();
    let before = station.timeline(LISTENER_ID);
    let block = station.add_block(AudioBlockKind::Song, "Request", 60_000);

    let on_air = station
        .generator
        .insert_spin(LISTENER_ID, &block.id, 1, now)
        .unwrap_err();
    assert!(matches!(on_air, ScheduleError::InvalidPosition { position: 1, .. }));

    let past_end = station
        .generator
        .insert_spin(LISTENER_ID, &block.id, 30, now)
        .unwrap_err();
    assert!(matches!(past_end, ScheduleError::InvalidPosition { position: 30, .. }));

    let missing_block = station
        .generator
        .insert_spin(LISTENER_ID, "no-such-block", 10, now)
        .unwrap_err();
    assert!(matches!(missing_block, ScheduleError::AudioBlockNotFound(_)));

    let missing_listener = station
        .generator
        .insert_spin("nobody", &block.id, 10, now)
        .unwrap_err();
    assert!(matches!(missing_listener, ScheduleError::ListenerNotFound(_)));

    assert_eq!(station.timeline(LISTENER_ID), before);
}

#[test]
fn test_insert_into_empty_timeline_is_invalid() {
    let station = TestStation::new();
    station.add_listener(LISTENER_ID);
    let block = station.add_block(AudioBlockKind::Song, "Lonely", 60_000);

    let err = station
        .generator
        .insert_spin(LISTENER_ID, &block.id, 2, block_start_now())
        .unwrap_err();

    assert!(matches!(err, ScheduleError::InvalidPosition { .. }));
    assert!(station.timeline(LISTENER_ID).is_empty());
}

#[test]
fn test_delete_closes_the_gap() {
    let station = edit_station();
    let now = block_start_now();
    let old = by_position(&station.timeline(LISTENER_ID));
    let deleted_id = old[&10].spin.id;

    station
        .generator
        .delete_spin(LISTENER_ID, deleted_id, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_eq!(after.len(), 27);
    assert_consecutive_positions(&after);
    assert!(after.iter().all(|s| s.spin.id != deleted_id));
    assert!(station.store.get_spin(deleted_id).unwrap().is_none());

    for position in 11..=28 {
        let shifted = spin_at(&after, position - 1);
        assert_eq!(shifted.spin.id, old[&position].spin.id);
        assert_eq!(
            shifted.spin.airtime,
            old[&position].spin.airtime - Duration::milliseconds(SONG_EOM)
        );
    }
}

#[test]
fn test_delete_first_spin_promotes_next_anchor() {
    let station = edit_station();
    let now = block_start_now();
    let before = station.timeline(LISTENER_ID);

    station
        .generator
        .delete_spin(LISTENER_ID, before[0].spin.id, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_eq!(&after[..], &before[1..]);
    assert_eq!(after[0].spin.playlist_position, 2);
}

#[test]
fn test_delete_last_spin() {
    let station = edit_station();
    let now = block_start_now();
    let before = station.timeline(LISTENER_ID);

    station
        .generator
        .delete_spin(LISTENER_ID, before[27].spin.id, now)
        .unwrap();

    assert_eq!(station.timeline(LISTENER_ID), before[..27].to_vec());
}

#[test]
fn test_delete_unknown_or_foreign_spin_is_not_found() {
    let station = edit_station();
    station.add_listener(OTHER_LISTENER_ID);
    let now = block_start_now();
    let spin_id = station.timeline(LISTENER_ID)[5].spin.id;

    let foreign = station
        .generator
        .delete_spin(OTHER_LISTENER_ID, spin_id, now)
        .unwrap_err();
    assert!(matches!(foreign, ScheduleError::SpinNotFound(_)));
    assert!(foreign.is_not_found());

    let unknown = station
        .generator
        .delete_spin(LISTENER_ID, 987_654, now)
        .unwrap_err();
    assert!(matches!(unknown, ScheduleError::SpinNotFound(987_654)));

    assert_eq!(station.timeline(LISTENER_ID).len(), 28);
}

#[test]
fn test_edit_returns_extended_window() {
    let station = edit_station();
    let now = block_start_now();
    let spin_id = station.timeline(LISTENER_ID)[3].spin.id;

    let window = station
        .generator
        .delete_spin(LISTENER_ID, spin_id, now)
        .unwrap();

    assert_eq!(window, station.timeline(LISTENER_ID));
}

// =============================================================================
// Edits across commercial breaks
// =============================================================================

const LONG_SONG_MS: i64 = 300_000;

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
}

/// Five minute songs from 12:20:10 with a break at each half hour:
///
/// | pos | item | airtime  | message ends |
/// |-----|------|----------|--------------|
/// | 1   | song | 12:20:10 | 12:25:09     |
/// | 2   | song | 12:25:09 | 12:30:08     |
/// | 3   | ad   | 12:30:08 | 12:33:07     |
/// | 4-9 | song | 12:33:07 | 13:03:01     |
/// | 10  | ad   | 13:03:01 | 13:06:00     |
fn break_station() -> TestStation {
    let station = TestStation::new();
    station.add_listener_with_songs(LISTENER_ID, 100, LONG_SONG_MS);
    let now = near_boundary_now();
    station
        .generator
        .extend(LISTENER_ID, now, now + Duration::minutes(43))
        .unwrap();
    station
}

/// Every item that runs into the next airtime block is followed by a commercial,
/// and commercials follow nothing else.
fn assert_breaks_at_crossings(spins: &[ScheduledSpin]) {
    for pair in spins.windows(2) {
        let crosses =
            pair[0].kind() != AudioBlockKind::Commercial && straddles_boundary(&pair[0]);
        assert_eq!(
            crosses,
            pair[1].kind() == AudioBlockKind::Commercial,
            "break misplaced around position {}",
            pair[0].spin.playlist_position
        );
    }
}

fn commercial_positions(spins: &[ScheduledSpin]) -> Vec<i64> {
    spins
        .iter()
        .filter(|s| s.kind() == AudioBlockKind::Commercial)
        .map(|s| s.spin.playlist_position)
        .collect()
}

#[test]
fn test_break_fixture_shape() {
    let timeline = break_station().timeline(LISTENER_ID);

    assert_eq!(positions(&timeline), (1..=10).collect::<Vec<_>>());
    assert_eq!(commercial_positions(&timeline), vec![3, 10]);
    assert_eq!(timeline[0].spin.airtime, at(12, 20, 10));
    assert_eq!(timeline[2].spin.airtime, at(12, 30, 8));
    assert_eq!(timeline[9].spin.airtime, at(13, 3, 1));
    assert_breaks_at_crossings(&timeline);
}

#[test]
fn test_delete_drops_commercial_whose_crossing_disappeared() {
    let station = break_station();
    let now = near_boundary_now();
    let before = station.timeline(LISTENER_ID);
    let last_break = before[9].spin.id;

    station
        .generator
        .delete_spin(LISTENER_ID, before[1].spin.id, now)
        .unwrap();

    // The remaining songs now end at 12:58:02, before the 13:00 boundary.
    let after = station.timeline(LISTENER_ID);
    assert_eq!(after.len(), 8);
    assert_consecutive_positions(&after);
    assert_breaks_at_crossings(&after);
    assert_eq!(commercial_positions(&after), vec![3]);
    assert!(station.store.get_spin(last_break).unwrap().is_none());

    // The first break is kept, now after the song that took over the crossing.
    assert_eq!(after[1].spin.id, before[3].spin.id);
    assert_eq!(after[2].spin.id, before[2].spin.id);
    assert_eq!(after[2].spin.airtime, at(12, 30, 8));
    assert_eq!(after[7].spin.id, before[8].spin.id);
    assert_eq!(after[7].end_of_message(), at(12, 58, 2));
}

#[test]
fn test_insert_pushes_break_later() {
    let station = break_station();
    let now = near_boundary_now();
    let before = station.timeline(LISTENER_ID);
    let request = station.add_block(AudioBlockKind::Song, "Request", 60_000);

    station
        .generator
        .insert_spin(LISTENER_ID, &request.id, 2, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_eq!(after.len(), 11);
    assert_consecutive_positions(&after);
    assert_breaks_at_crossings(&after);
    assert_eq!(commercial_positions(&after), vec![4, 11]);

    assert_eq!(after[1].audio_block.id, request.id);
    assert_eq!(after[1].spin.airtime, before[1].spin.airtime);

    // Both breaks follow their crossings, one slot and 59 seconds later.
    for (old, new) in [(2, 3), (9, 10)] {
        assert_eq!(after[new].spin.id, before[old].spin.id);
        assert_eq!(
            after[new].spin.airtime,
            before[old].spin.airtime + Duration::milliseconds(59_000)
        );
    }
}

#[test]
fn test_move_song_across_boundary_keeps_breaks() {
    let station = break_station();
    let now = near_boundary_now();
    let before = station.timeline(LISTENER_ID);
    let moved = before[8].clone();

    station
        .generator
        .move_spin(LISTENER_ID, moved.spin.id, 2, now)
        .unwrap();

    let after = station.timeline(LISTENER_ID);
    assert_eq!(after.len(), 10);
    assert_consecutive_positions(&after);
    assert_breaks_at_crossings(&after);
    assert_eq!(commercial_positions(&after), vec![3, 10]);

    // The song that ended after 13:00 now takes over the 12:30 crossing.
    assert_eq!(after[1].spin.id, moved.spin.id);
    assert_eq!(after[1].spin.airtime, at(12, 25, 9));
    assert!(straddles_boundary(&after[1]));
    assert_eq!(after[2].spin.id, before[2].spin.id);
    assert_eq!(after[9].spin.id, before[9].spin.id);

    // Same durations, so every slot keeps its airtime.
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(new.spin.airtime, old.spin.airtime);
    }
    assert_eq!(after[3].spin.id, before[1].spin.id);
}
