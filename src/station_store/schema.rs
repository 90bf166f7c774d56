//! SQLite schema definitions for the station database.
//!
//! Listeners, the audio catalog, per-listener song pools and the spin timeline.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Version 1 - Listeners, catalog, pools and spins
// =============================================================================

const LISTENERS_TABLE_V1: Table = Table {
    name: "listeners",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("display_name", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// Audio blocks table - songs, commercials and voicetracks.
/// Cue point columns hold explicit values only, NULL means derive from duration.
const AUDIO_BLOCKS_TABLE_V1: Table = Table {
    name: "audio_blocks",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!("album", &SqlType::Text),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("popularity", &SqlType::Integer),
        sqlite_column!("end_of_intro_ms", &SqlType::Integer),
        sqlite_column!("end_of_message_ms", &SqlType::Integer),
        sqlite_column!("beginning_of_outro_ms", &SqlType::Integer),
        sqlite_column!("audio_url", &SqlType::Text, is_unique = true),
        sqlite_column!("isrc", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_audio_blocks_kind", "kind")],
    unique_constraints: &[],
};

const STATION_SONGS_TABLE_V1: Table = Table {
    name: "station_songs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "user_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "listeners",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!(
            "song_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "audio_blocks",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!(
            "user_affinity",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0.0")
        ),
    ],
    indices: &[("idx_station_songs_user", "user_id")],
    unique_constraints: &[&["user_id", "song_id"]],
};

/// Spins table - the per-listener timeline. Airtime is stored as epoch millis.
const SPINS_TABLE_V1: Table = Table {
    name: "spins",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "user_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "listeners",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!(
            "audio_block_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "audio_blocks",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Restrict,
            })
        ),
        sqlite_column!("airtime_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("playlist_position", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_spins_user_position", "user_id, playlist_position"),
        ("idx_spins_user_airtime", "user_id, airtime_ms"),
    ],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - Audio block events
// =============================================================================

const AUDIO_BLOCK_EVENTS_TABLE_V2: Table = Table {
    name: "audio_block_events",
    columns: &[
        sqlite_column!("seq", &SqlType::Integer, is_primary_key = true), // AUTOINCREMENT
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("audio_block_id", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_audio_block_events_timestamp", "timestamp")],
    unique_constraints: &[],
};

/// Migration from version 1 to version 2: add audio_block_events table
fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE audio_block_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            audio_block_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX idx_audio_block_events_timestamp ON audio_block_events(timestamp)",
        [],
    )?;
    Ok(())
}

pub const STATION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            LISTENERS_TABLE_V1,
            AUDIO_BLOCKS_TABLE_V1,
            STATION_SONGS_TABLE_V1,
            SPINS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            LISTENERS_TABLE_V1,
            AUDIO_BLOCKS_TABLE_V1,
            STATION_SONGS_TABLE_V1,
            SPINS_TABLE_V1,
            AUDIO_BLOCK_EVENTS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
