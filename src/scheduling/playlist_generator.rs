use super::commercial_chooser::CommercialChooser;
use super::error::{ScheduleError, ScheduleResult};
use super::listener_locks::ListenerLocks;
use super::song_chooser::{SongChooser, SongPick};
use super::timing::{airtime_block, airtime_for_spin, spin_end, timeline_start};
use crate::config::{CommercialSettings, SchedulingSettings};
use crate::station_store::{
    AudioBlock, NewSpin, PlaylistWindow, ScheduledSpin, Spin, StationStore,
};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Summary of one `extend` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtendOutcome {
    pub spins_created: usize,
    pub commercials_created: usize,
    /// Song picks that had to ignore the rest windows.
    pub fallback_picks: usize,
    pub tail_end: Option<DateTime<Utc>>,
}

/// Id carried by a spin that has not been written yet. SQLite rowids start at 1.
const UNSAVED_SPIN_ID: i64 = 0;

/// Result of re-deriving positions and airtimes over a window.
#[derive(Debug, Default)]
pub struct Reflow {
    /// The fixed spins followed by every re-placed spin, in position order.
    pub spins: Vec<ScheduledSpin>,
    /// How many leading entries of `spins` were kept as they were.
    pub fixed: usize,
    /// Displaced commercials no boundary crossing asked for.
    pub unused_commercials: Vec<ScheduledSpin>,
    /// Boundary crossings with no commercial left to place.
    pub unfilled_breaks: usize,
}

/// The airtime block a timeline is "in" after `tail`, for commercial placement.
fn block_tracker_after(tail: &ScheduledSpin) -> i64 {
    if tail.audio_block.is_commercial() {
        airtime_block(spin_end(tail))
    } else {
        airtime_block(tail.spin.airtime)
    }
}

fn next_position(timeline: &[ScheduledSpin]) -> i64 {
    timeline
        .last()
        .map(|s| s.spin.playlist_position + 1)
        .unwrap_or(1)
}

fn break_due(timeline: &[ScheduledSpin], tracker: i64) -> bool {
    timeline
        .last()
        .is_some_and(|tail| airtime_block(spin_end(tail)) != tracker)
}

/// Re-derives positions and airtimes for `window`.
///
/// The first `fixed` spins (at least one, the anchor) keep their position and
/// airtime and serve as timing context. Every other non-commercial spin follows
/// in order with consecutive positions. Commercials after the fixed spins are
/// reused, in order, wherever the timeline crosses into a new airtime block; no
/// new ones are created.
pub fn reformat_schedule(window: Vec<ScheduledSpin>, fixed: usize, now: DateTime<Utc>) -> Reflow {
    if window.is_empty() {
        return Reflow::default();
    }
    let fixed = fixed.clamp(1, window.len());
    let mut spins_iter = window.into_iter();
    let mut spins: Vec<ScheduledSpin> = spins_iter.by_ref().take(fixed).collect();

    let (commercials, others): (Vec<ScheduledSpin>, Vec<ScheduledSpin>) =
        spins_iter.partition(|s| s.audio_block.is_commercial());
    let mut commercials = VecDeque::from(commercials);

    let mut tracker = match spins.last() {
        Some(anchor) => block_tracker_after(anchor),
        None => return Reflow::default(),
    };
    let mut unfilled_breaks = 0;

    let mut place_break = |spins: &mut Vec<ScheduledSpin>, tracker: &mut i64| {
        if !break_due(spins, *tracker) {
            return;
        }
        match commercials.pop_front() {
            Some(mut commercial) => {
                commercial.spin.airtime = airtime_for_spin(spins, &commercial.audio_block, now);
                commercial.spin.playlist_position = next_position(spins);
                *tracker = airtime_block(spin_end(&commercial));
                spins.push(commercial);
            }
            None => {
                if let Some(tail) = spins.last() {
                    warn!(
                        "No commercial left to fill the break after position {}",
                        tail.spin.playlist_position
                    );
                    *tracker = airtime_block(spin_end(tail));
                }
                unfilled_breaks += 1;
            }
        }
    };

    for mut spin in others {
        place_break(&mut spins, &mut tracker);
        spin.spin.airtime = airtime_for_spin(&spins, &spin.audio_block, now);
        spin.spin.playlist_position = next_position(&spins);
        spins.push(spin);
    }
    place_break(&mut spins, &mut tracker);

    Reflow {
        spins,
        fixed,
        unused_commercials: commercials.into(),
        unfilled_breaks,
    }
}

/// Number of spins in `window` ahead of `position`. They stay where they are
/// during a reflow.
fn spins_ahead_of(window: &[ScheduledSpin], position: i64) -> usize {
    window
        .iter()
        .take_while(|s| s.spin.playlist_position < position)
        .count()
}

/// Positions must be consecutive for any timeline the engine has written.
fn verify_positions(user_id: &str, spins: &[ScheduledSpin]) -> ScheduleResult<()> {
    for pair in spins.windows(2) {
        let (a, b) = (&pair[0].spin, &pair[1].spin);
        if b.playlist_position != a.playlist_position + 1 {
            return Err(ScheduleError::InvariantViolation(format!(
                "listener {} has spin {} at position {} followed by spin {} at position {}",
                user_id, a.id, a.playlist_position, b.id, b.playlist_position
            )));
        }
    }
    Ok(())
}

/// Builds and edits per-listener timelines.
pub struct PlaylistGenerator {
    store: Arc<dyn StationStore>,
    locks: ListenerLocks,
    commercial_chooser: CommercialChooser,
    horizon: Duration,
    rng: Mutex<StdRng>,
}

impl PlaylistGenerator {
    pub fn new(
        store: Arc<dyn StationStore>,
        scheduling: &SchedulingSettings,
        commercials: CommercialSettings,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            locks: ListenerLocks::new(),
            commercial_chooser: CommercialChooser::new(commercials),
            horizon: Duration::hours(scheduling.horizon_hours as i64),
            rng: Mutex::new(rng),
        }
    }

    pub fn store(&self) -> &Arc<dyn StationStore> {
        &self.store
    }

    /// How far ahead of `now` the periodic extend generates.
    pub fn default_horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.horizon
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_listener(&self, user_id: &str) -> ScheduleResult<()> {
        if self.store.listener_exists(user_id)? {
            Ok(())
        } else {
            Err(ScheduleError::ListenerNotFound(user_id.to_string()))
        }
    }

    fn owned_spin(&self, user_id: &str, spin_id: i64) -> ScheduleResult<ScheduledSpin> {
        self.store
            .get_spin(spin_id)?
            .filter(|s| s.spin.user_id == user_id)
            .ok_or(ScheduleError::SpinNotFound(spin_id))
    }

    fn load_window(&self, user_id: &str, min_position: i64) -> ScheduleResult<Vec<ScheduledSpin>> {
        let window = self.store.get_spins_from_position(user_id, min_position)?;
        verify_positions(user_id, &window)?;
        Ok(window)
    }

    /// Reads a window of the listener's timeline.
    pub fn playlist(
        &self,
        user_id: &str,
        window: PlaylistWindow,
        now: DateTime<Utc>,
    ) -> ScheduleResult<Vec<ScheduledSpin>> {
        self.ensure_listener(user_id)?;
        Ok(self.store.get_playlist(user_id, window, now)?)
    }

    // =========================================================================
    // Forward generation
    // =========================================================================

    /// Extends the listener's timeline until its tail ends at or after `horizon`.
    pub fn extend(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> ScheduleResult<ExtendOutcome> {
        self.locks
            .run_exclusive(user_id, || self.extend_locked(user_id, now, horizon))
    }

    fn extend_locked(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> ScheduleResult<ExtendOutcome> {
        self.ensure_listener(user_id)?;
        let mut timeline = self.store.get_playlist(user_id, PlaylistWindow::Full, now)?;
        verify_positions(user_id, &timeline)?;

        let mut outcome = ExtendOutcome::default();
        let mut song_chooser = None;

        if timeline.is_empty() {
            let pick = self.pick_song(&mut song_chooser, user_id, timeline_start(now))?;
            outcome.fallback_picks += pick.fallback as usize;
            self.append_spin(user_id, &mut timeline, pick.song, now)?;
            outcome.spins_created += 1;
        }

        let mut tracker = match timeline.last() {
            Some(tail) => block_tracker_after(tail),
            None => return Ok(outcome),
        };

        while let Some(tail) = timeline.last() {
            if spin_end(tail) >= horizon {
                break;
            }
            if break_due(&timeline, tracker) {
                let commercial = {
                    let mut rng = self.rng();
                    self.commercial_chooser
                        .choose_commercial(self.store.as_ref(), &mut *rng)?
                };
                let spin = self.append_spin(user_id, &mut timeline, commercial, now)?;
                tracker = airtime_block(spin_end(spin));
                outcome.commercials_created += 1;
            } else {
                let tail_airtime = tail.spin.airtime;
                let pick = self.pick_song(&mut song_chooser, user_id, tail_airtime)?;
                outcome.fallback_picks += pick.fallback as usize;
                self.append_spin(user_id, &mut timeline, pick.song, now)?;
            }
            outcome.spins_created += 1;
        }

        outcome.tail_end = timeline.last().map(spin_end);
        if outcome.spins_created > 0 {
            info!(
                "Extended schedule of {}: {} spins ({} commercials), tail ends {:?}",
                user_id, outcome.spins_created, outcome.commercials_created, outcome.tail_end
            );
        }
        Ok(outcome)
    }

    /// Builds the song chooser on first use so a commercial-only extension never
    /// needs a full pool.
    fn pick_song(
        &self,
        song_chooser: &mut Option<SongChooser>,
        user_id: &str,
        airtime: DateTime<Utc>,
    ) -> ScheduleResult<SongPick> {
        let chooser = match song_chooser.take() {
            Some(chooser) => chooser,
            None => SongChooser::new(user_id, self.store.get_active_station_songs(user_id)?)?,
        };
        let pick = {
            let mut rng = self.rng();
            chooser.choose_song(self.store.as_ref(), airtime, &mut *rng)?
        };
        *song_chooser = Some(chooser);
        Ok(pick)
    }

    fn append_spin<'a>(
        &self,
        user_id: &str,
        timeline: &'a mut Vec<ScheduledSpin>,
        block: AudioBlock,
        now: DateTime<Utc>,
    ) -> ScheduleResult<&'a ScheduledSpin> {
        let new_spin = NewSpin {
            user_id: user_id.to_string(),
            audio_block_id: block.id.clone(),
            airtime: airtime_for_spin(timeline, &block, now),
            playlist_position: next_position(timeline),
        };
        let spin = self.store.create_spin(&new_spin)?;
        debug!(
            "Scheduled {} {} for {} at position {} ({})",
            block.kind.as_str(),
            block.id,
            user_id,
            spin.playlist_position,
            spin.airtime
        );
        timeline.push(ScheduledSpin {
            spin,
            audio_block: block,
        });
        let index = timeline.len() - 1;
        Ok(&timeline[index])
    }

    // =========================================================================
    // Edits
    // =========================================================================

    /// Inserts `audio_block_id` at `position` and reflows everything after it.
    /// Returns the refreshed extended window.
    pub fn insert_spin(
        &self,
        user_id: &str,
        audio_block_id: &str,
        position: i64,
        now: DateTime<Utc>,
    ) -> ScheduleResult<Vec<ScheduledSpin>> {
        self.locks.run_exclusive(user_id, || -> ScheduleResult<_> {
            self.ensure_listener(user_id)?;
            let block = self
                .store
                .get_audio_block(audio_block_id)?
                .ok_or_else(|| ScheduleError::AudioBlockNotFound(audio_block_id.to_string()))?;

            let mut window = self.load_window(user_id, position - 2)?;
            let (Some(first), Some(last)) = (window.first(), window.last()) else {
                return Err(ScheduleError::InvalidPosition {
                    position,
                    reason: "the timeline is empty".to_string(),
                });
            };
            let base = first.spin.playlist_position;
            if position <= base {
                return Err(ScheduleError::InvalidPosition {
                    position,
                    reason: format!("position {} is already on air", base),
                });
            }
            if position > last.spin.playlist_position + 1 {
                return Err(ScheduleError::InvalidPosition {
                    position,
                    reason: format!("the timeline ends at {}", last.spin.playlist_position),
                });
            }

            let fixed = spins_ahead_of(&window, position);
            window.insert(
                fixed,
                ScheduledSpin {
                    spin: Spin {
                        id: UNSAVED_SPIN_ID,
                        user_id: user_id.to_string(),
                        audio_block_id: block.id.clone(),
                        airtime: now,
                        playlist_position: position,
                    },
                    audio_block: block,
                },
            );
            self.apply_reflow(user_id, window, fixed, Vec::new(), now)?;
            info!("Inserted {} for {} at position {}", audio_block_id, user_id, position);
            Ok(self.store.get_playlist(user_id, PlaylistWindow::Extended, now)?)
        })
    }

    /// Moves a spin to `new_position`, keeping the relative order of everything else.
    pub fn move_spin(
        &self,
        user_id: &str,
        spin_id: i64,
        new_position: i64,
        now: DateTime<Utc>,
    ) -> ScheduleResult<Vec<ScheduledSpin>> {
        self.locks.run_exclusive(user_id, || -> ScheduleResult<_> {
            let spin = self.owned_spin(user_id, spin_id)?;
            let old_position = spin.spin.playlist_position;

            let first_moved = old_position.min(new_position);
            let mut window = self.load_window(user_id, first_moved - 2)?;
            let (Some(first), Some(last)) = (window.first(), window.last()) else {
                return Err(ScheduleError::SpinNotFound(spin_id));
            };
            let base = first.spin.playlist_position;
            if old_position <= base || new_position <= base {
                return Err(ScheduleError::InvalidPosition {
                    position: new_position,
                    reason: format!("position {} is already on air", base),
                });
            }
            if new_position > last.spin.playlist_position {
                return Err(ScheduleError::InvalidPosition {
                    position: new_position,
                    reason: format!("the timeline ends at {}", last.spin.playlist_position),
                });
            }
            if new_position == old_position {
                return Ok(self.store.get_playlist(user_id, PlaylistWindow::Extended, now)?);
            }

            let fixed = spins_ahead_of(&window, first_moved);
            let moved = window.remove((old_position - base) as usize);
            window.insert((new_position - base) as usize, moved);
            self.apply_reflow(user_id, window, fixed, Vec::new(), now)?;

            info!(
                "Moved spin {} of {} from {} to {}",
                spin_id, user_id, old_position, new_position
            );
            Ok(self.store.get_playlist(user_id, PlaylistWindow::Extended, now)?)
        })
    }

    /// Deletes a spin and closes the gap it leaves.
    pub fn delete_spin(
        &self,
        user_id: &str,
        spin_id: i64,
        now: DateTime<Utc>,
    ) -> ScheduleResult<Vec<ScheduledSpin>> {
        self.locks.run_exclusive(user_id, || -> ScheduleResult<_> {
            let position = self.owned_spin(user_id, spin_id)?.spin.playlist_position;
            let mut window = self.load_window(user_id, position - 2)?;
            window.retain(|s| s.spin.id != spin_id);
            let fixed = spins_ahead_of(&window, position);

            if window.is_empty() {
                self.store.delete_spin(spin_id)?;
            } else {
                self.apply_reflow(user_id, window, fixed, vec![spin_id], now)?;
            }

            info!("Deleted spin {} of {}", spin_id, user_id);
            Ok(self.store.get_playlist(user_id, PlaylistWindow::Extended, now)?)
        })
    }

    /// Reflows `window` after its first `fixed` spins and persists the result,
    /// together with `removed`, in one transaction. Unsaved spins are created there.
    fn apply_reflow(
        &self,
        user_id: &str,
        window: Vec<ScheduledSpin>,
        fixed: usize,
        mut removed: Vec<i64>,
        now: DateTime<Utc>,
    ) -> ScheduleResult<()> {
        let reflow = reformat_schedule(window, fixed, now);

        let mut updated: Vec<Spin> = Vec::new();
        let mut created: Vec<NewSpin> = Vec::new();
        for scheduled in reflow.spins.into_iter().skip(reflow.fixed) {
            let spin = scheduled.spin;
            if spin.id == UNSAVED_SPIN_ID {
                created.push(NewSpin {
                    user_id: spin.user_id,
                    audio_block_id: spin.audio_block_id,
                    airtime: spin.airtime,
                    playlist_position: spin.playlist_position,
                });
            } else {
                updated.push(spin);
            }
        }
        removed.extend(
            reflow
                .unused_commercials
                .iter()
                .map(|s| s.spin.id)
                .filter(|id| *id != UNSAVED_SPIN_ID),
        );

        debug!(
            "Reflow for {}: {} spins updated, {} created, {} removed, {} unfilled breaks",
            user_id,
            updated.len(),
            created.len(),
            removed.len(),
            reflow.unfilled_breaks
        );
        self.store.commit_reflow(&updated, &created, &removed)?;
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Deletes the listener's spins that aired before `cutoff`.
    pub fn remove_spins_before(
        &self,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> ScheduleResult<usize> {
        self.locks.run_exclusive(user_id, || -> ScheduleResult<_> {
            Ok(self.store.delete_spins_before(user_id, cutoff)?)
        })
    }
}
