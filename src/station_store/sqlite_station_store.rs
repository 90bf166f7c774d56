use super::models::{
    AudioBlock, AudioBlockEvent, AudioBlockEventType, AudioBlockKind, CuePoints, Listener,
    NewAudioBlock, NewSpin, PlaylistWindow, ScheduledSpin, Spin, StationSong,
};
use super::schema::STATION_VERSIONED_SCHEMAS;
use super::StationStore;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const AUDIO_BLOCK_COLUMNS: &str = "id, kind, title, artist, album, duration_ms, popularity, \
     end_of_intro_ms, end_of_message_ms, beginning_of_outro_ms, audio_url, isrc";

const SCHEDULED_SPIN_SELECT: &str = "SELECT s.id AS spin_id, s.user_id, s.audio_block_id, \
     s.airtime_ms, s.playlist_position, a.id, a.kind, a.title, a.artist, a.album, \
     a.duration_ms, a.popularity, a.end_of_intro_ms, a.end_of_message_ms, \
     a.beginning_of_outro_ms, a.audio_url, a.isrc \
     FROM spins s JOIN audio_blocks a ON a.id = s.audio_block_id";

pub struct SqliteStationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStationStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();

        let mut conn = Connection::open(path).context("Failed to open station database")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let latest = STATION_VERSIONED_SCHEMAS
            .last()
            .context("No station schema defined")?;

        if is_new_db {
            info!("Creating new station database at {:?}", path);
            latest.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;

            if db_version < 1 {
                anyhow::bail!(
                    "Station database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let version_index = STATION_VERSIONED_SCHEMAS
                .iter()
                .position(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown station database version {}", db_version))?;
            STATION_VERSIONED_SCHEMAS[version_index]
                .validate(&conn)
                .with_context(|| {
                    format!(
                        "Station database schema validation failed for version {}",
                        db_version
                    )
                })?;

            if (db_version as usize) < latest.version {
                info!(
                    "Migrating station database from version {} to {}",
                    db_version, latest.version
                );
                Self::migrate_if_needed(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A fresh store backed by an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        STATION_VERSIONED_SCHEMAS
            .last()
            .context("No station schema defined")?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut latest_from = from_version;
        for schema in STATION_VERSIONED_SCHEMAS.iter() {
            if schema.version > from_version {
                info!(
                    "Running station database migration from version {} to {}",
                    latest_from, schema.version
                );
                if let Some(migration_fn) = schema.migration {
                    migration_fn(&tx).with_context(|| {
                        format!("Failed to run migration to version {}", schema.version)
                    })?;
                }
                latest_from = schema.version;
            }
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Station database connection mutex poisoned"))
    }

    fn conversion_error(index: usize, message: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
    }

    fn millis_to_datetime(index: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| Self::conversion_error(index, format!("airtime {} out of range", ms)))
    }

    /// Reads an audio block from a row whose block columns start at `offset`,
    /// in `AUDIO_BLOCK_COLUMNS` order.
    fn row_to_audio_block(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<AudioBlock> {
        let kind_str: String = row.get(offset + 1)?;
        let kind = AudioBlockKind::parse(&kind_str).ok_or_else(|| {
            Self::conversion_error(offset + 1, format!("unknown audio block kind {}", kind_str))
        })?;

        Ok(AudioBlock {
            id: row.get(offset)?,
            kind,
            title: row.get(offset + 2)?,
            artist: row.get(offset + 3)?,
            album: row.get(offset + 4)?,
            duration_ms: row.get(offset + 5)?,
            popularity: row.get(offset + 6)?,
            cue_points: CuePoints {
                end_of_intro_ms: row.get(offset + 7)?,
                end_of_message_ms: row.get(offset + 8)?,
                beginning_of_outro_ms: row.get(offset + 9)?,
            },
            audio_url: row.get(offset + 10)?,
            isrc: row.get(offset + 11)?,
        })
    }

    fn row_to_scheduled_spin(row: &rusqlite::Row) -> rusqlite::Result<ScheduledSpin> {
        let airtime_ms: i64 = row.get("airtime_ms")?;
        Ok(ScheduledSpin {
            spin: Spin {
                id: row.get("spin_id")?,
                user_id: row.get("user_id")?,
                audio_block_id: row.get("audio_block_id")?,
                airtime: Self::millis_to_datetime(3, airtime_ms)?,
                playlist_position: row.get("playlist_position")?,
            },
            audio_block: Self::row_to_audio_block(row, 5)?,
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<AudioBlockEvent> {
        let event_type_str: String = row.get("event_type")?;
        let event_type = AudioBlockEventType::parse(&event_type_str).ok_or_else(|| {
            Self::conversion_error(1, format!("unknown event type {}", event_type_str))
        })?;
        Ok(AudioBlockEvent {
            seq: row.get("seq")?,
            event_type,
            audio_block_id: row.get("audio_block_id")?,
            timestamp: row.get("timestamp")?,
        })
    }

    fn query_audio_block(conn: &Connection, id: &str) -> Result<Option<AudioBlock>> {
        let block = conn
            .query_row(
                &format!("SELECT {} FROM audio_blocks WHERE id = ?1", AUDIO_BLOCK_COLUMNS),
                params![id],
                |row| Self::row_to_audio_block(row, 0),
            )
            .optional()?;
        Ok(block)
    }

    fn query_scheduled_spins(
        conn: &Connection,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ScheduledSpin>> {
        let mut stmt = conn.prepare(&format!("{} {}", SCHEDULED_SPIN_SELECT, filter))?;
        let spins = stmt
            .query_map(params, Self::row_to_scheduled_spin)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(spins)
    }

    fn insert_audio_block_with(conn: &Connection, block: &NewAudioBlock) -> Result<AudioBlock> {
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO audio_blocks (id, kind, title, artist, album, duration_ms, popularity,
                end_of_intro_ms, end_of_message_ms, beginning_of_outro_ms, audio_url, isrc,
                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id,
                block.kind.as_str(),
                block.title,
                block.artist,
                block.album,
                block.duration_ms,
                block.popularity,
                block.cue_points.end_of_intro_ms,
                block.cue_points.end_of_message_ms,
                block.cue_points.beginning_of_outro_ms,
                block.audio_url,
                block.isrc,
                Utc::now().timestamp(),
            ],
        )?;
        Self::emit_event(conn, AudioBlockEventType::Created, &id);

        Ok(AudioBlock {
            id,
            kind: block.kind,
            title: block.title.clone(),
            artist: block.artist.clone(),
            album: block.album.clone(),
            duration_ms: block.duration_ms,
            popularity: block.popularity,
            cue_points: block.cue_points,
            audio_url: block.audio_url.clone(),
            isrc: block.isrc.clone(),
        })
    }

    /// Best effort, a failed event never fails the catalog write.
    fn emit_event(conn: &Connection, event_type: AudioBlockEventType, audio_block_id: &str) {
        let result = conn.execute(
            "INSERT INTO audio_block_events (event_type, audio_block_id, timestamp)
             VALUES (?1, ?2, ?3)",
            params![event_type.as_str(), audio_block_id, Utc::now().timestamp()],
        );
        if let Err(e) = result {
            warn!(
                "Failed to record {} event for audio block {}: {}",
                event_type.as_str(),
                audio_block_id,
                e
            );
        }
    }
}

impl StationStore for SqliteStationStore {
    fn create_listener(&self, id: &str, display_name: Option<&str>) -> Result<Listener> {
        let conn = self.conn()?;
        let created_at = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO listeners (id, display_name, created_at) VALUES (?1, ?2, ?3)",
            params![id, display_name, created_at],
        )
        .with_context(|| format!("Failed to create listener {}", id))?;

        Ok(Listener {
            id: id.to_string(),
            display_name: display_name.map(str::to_string),
            created_at,
        })
    }

    fn listener_exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists = conn
            .query_row(
                "SELECT 1 FROM listeners WHERE id = ?1",
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn list_listener_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM listeners ORDER BY created_at, id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn insert_audio_block(&self, block: &NewAudioBlock) -> Result<AudioBlock> {
        let conn = self.conn()?;
        Self::insert_audio_block_with(&conn, block)
    }

    fn get_audio_block(&self, id: &str) -> Result<Option<AudioBlock>> {
        let conn = self.conn()?;
        Self::query_audio_block(&conn, id)
    }

    fn update_audio_block_duration(&self, id: &str, duration_ms: i64) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE audio_blocks SET duration_ms = ?1 WHERE id = ?2",
            params![duration_ms, id],
        )?;
        if updated > 0 {
            Self::emit_event(&conn, AudioBlockEventType::Updated, id);
        }
        Ok(updated > 0)
    }

    fn find_or_create_audio_block_by_url(
        &self,
        url: &str,
        defaults: &NewAudioBlock,
    ) -> Result<AudioBlock> {
        let conn = self.conn()?;
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {} FROM audio_blocks WHERE audio_url = ?1",
                    AUDIO_BLOCK_COLUMNS
                ),
                params![url],
                |row| Self::row_to_audio_block(row, 0),
            )
            .optional()?;
        if let Some(block) = existing {
            return Ok(block);
        }

        debug!("Creating {} audio block for {}", defaults.kind.as_str(), url);
        let mut block = defaults.clone();
        block.audio_url = Some(url.to_string());
        Self::insert_audio_block_with(&conn, &block)
    }

    fn get_audio_block_events_since(&self, since_seq: i64) -> Result<Vec<AudioBlockEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT seq, event_type, audio_block_id, timestamp
             FROM audio_block_events
             WHERE seq > ?1
             ORDER BY seq ASC",
        )?;
        let events = stmt
            .query_map(params![since_seq], Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn add_station_song(&self, user_id: &str, song_id: &str, user_affinity: f64) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO station_songs (user_id, song_id, user_affinity) VALUES (?1, ?2, ?3)",
            params![user_id, song_id, user_affinity],
        )
        .with_context(|| format!("Failed to add song {} to station of {}", song_id, user_id))?;
        Ok(conn.last_insert_rowid())
    }

    fn get_active_station_songs(&self, user_id: &str) -> Result<Vec<StationSong>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ss.id AS station_song_id, ss.user_id, ss.song_id, ss.user_affinity,
                a.id, a.kind, a.title, a.artist, a.album, a.duration_ms, a.popularity,
                a.end_of_intro_ms, a.end_of_message_ms, a.beginning_of_outro_ms,
                a.audio_url, a.isrc
             FROM station_songs ss JOIN audio_blocks a ON a.id = ss.song_id
             WHERE ss.user_id = ?1 AND a.audio_url IS NOT NULL AND a.audio_url != ''
             ORDER BY ss.id",
        )?;
        let songs = stmt
            .query_map(params![user_id], |row| {
                Ok(StationSong {
                    id: row.get("station_song_id")?,
                    user_id: row.get("user_id")?,
                    song_id: row.get("song_id")?,
                    user_affinity: row.get("user_affinity")?,
                    song: Self::row_to_audio_block(row, 4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(songs)
    }

    fn get_spin(&self, spin_id: i64) -> Result<Option<ScheduledSpin>> {
        let conn = self.conn()?;
        let mut spins = Self::query_scheduled_spins(&conn, "WHERE s.id = ?1", params![spin_id])?;
        Ok(spins.pop())
    }

    fn get_playlist(
        &self,
        user_id: &str,
        window: PlaylistWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSpin>> {
        let conn = self.conn()?;
        match window.bounds(now) {
            Some((from, to)) => Self::query_scheduled_spins(
                &conn,
                "WHERE s.user_id = ?1 AND s.airtime_ms BETWEEN ?2 AND ?3
                 ORDER BY s.playlist_position ASC",
                params![user_id, from.timestamp_millis(), to.timestamp_millis()],
            ),
            None => Self::query_scheduled_spins(
                &conn,
                "WHERE s.user_id = ?1 ORDER BY s.playlist_position ASC",
                params![user_id],
            ),
        }
    }

    fn get_spins_from_position(
        &self,
        user_id: &str,
        min_position: i64,
    ) -> Result<Vec<ScheduledSpin>> {
        let conn = self.conn()?;
        Self::query_scheduled_spins(
            &conn,
            "WHERE s.user_id = ?1 AND s.playlist_position >= ?2
             ORDER BY s.playlist_position ASC",
            params![user_id, min_position],
        )
    }

    fn get_song_spins_between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScheduledSpin>> {
        let conn = self.conn()?;
        Self::query_scheduled_spins(
            &conn,
            "WHERE s.user_id = ?1 AND a.kind = 'song' AND s.airtime_ms BETWEEN ?2 AND ?3
             ORDER BY s.playlist_position ASC",
            params![user_id, from.timestamp_millis(), to.timestamp_millis()],
        )
    }

    fn get_recent_song_spins(&self, user_id: &str, limit: usize) -> Result<Vec<ScheduledSpin>> {
        let conn = self.conn()?;
        Self::query_scheduled_spins(
            &conn,
            "WHERE s.user_id = ?1 AND a.kind = 'song'
             ORDER BY s.playlist_position DESC LIMIT ?2",
            params![user_id, limit as i64],
        )
    }

    fn create_spin(&self, spin: &NewSpin) -> Result<Spin> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO spins (user_id, audio_block_id, airtime_ms, playlist_position)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                spin.user_id,
                spin.audio_block_id,
                spin.airtime.timestamp_millis(),
                spin.playlist_position
            ],
        )?;
        Ok(Spin {
            id: conn.last_insert_rowid(),
            user_id: spin.user_id.clone(),
            audio_block_id: spin.audio_block_id.clone(),
            airtime: spin.airtime,
            playlist_position: spin.playlist_position,
        })
    }

    fn commit_reflow(&self, updated: &[Spin], created: &[NewSpin], removed: &[i64]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut update = tx.prepare(
                "UPDATE spins SET audio_block_id = ?1, airtime_ms = ?2, playlist_position = ?3
                 WHERE id = ?4",
            )?;
            for spin in updated {
                let changed = update.execute(params![
                    spin.audio_block_id,
                    spin.airtime.timestamp_millis(),
                    spin.playlist_position,
                    spin.id
                ])?;
                if changed == 0 {
                    anyhow::bail!("Spin {} disappeared during reflow", spin.id);
                }
            }

            let mut insert = tx.prepare(
                "INSERT INTO spins (user_id, audio_block_id, airtime_ms, playlist_position)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for spin in created {
                insert.execute(params![
                    spin.user_id,
                    spin.audio_block_id,
                    spin.airtime.timestamp_millis(),
                    spin.playlist_position
                ])?;
            }

            let mut delete = tx.prepare("DELETE FROM spins WHERE id = ?1")?;
            for spin_id in removed {
                delete.execute(params![spin_id])?;
            }
        }
        tx.commit().context("Failed to commit reflow")?;
        Ok(())
    }

    fn delete_spin(&self, spin_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM spins WHERE id = ?1", params![spin_id])?;
        Ok(deleted > 0)
    }

    fn delete_spins_before(&self, user_id: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM spins WHERE user_id = ?1 AND airtime_ms < ?2",
            params![user_id, cutoff.timestamp_millis()],
        )?;
        Ok(deleted)
    }
}
