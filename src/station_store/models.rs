use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Audio blocks
// =============================================================================

/// What kind of playable audio an [`AudioBlock`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBlockKind {
    Song,
    Commercial,
    Voicetrack,
}

impl AudioBlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioBlockKind::Song => "song",
            AudioBlockKind::Commercial => "commercial",
            AudioBlockKind::Voicetrack => "voicetrack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "song" => Some(AudioBlockKind::Song),
            "commercial" => Some(AudioBlockKind::Commercial),
            "voicetrack" => Some(AudioBlockKind::Voicetrack),
            _ => None,
        }
    }
}

/// Cue points explicitly stored for an audio block.
///
/// `None` (or a stored zero) means "derive from the duration". Derivation happens
/// on every read, so updating the duration re-derives every unset cue point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CuePoints {
    pub end_of_intro_ms: Option<i64>,
    pub end_of_message_ms: Option<i64>,
    pub beginning_of_outro_ms: Option<i64>,
}

fn explicit(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v != 0)
}

impl CuePoints {
    pub fn end_of_message_ms(&self, duration_ms: i64) -> i64 {
        let value = explicit(self.end_of_message_ms).unwrap_or(duration_ms - 1000);
        if value <= 0 {
            duration_ms
        } else {
            value
        }
    }

    pub fn beginning_of_outro_ms(&self, duration_ms: i64) -> i64 {
        explicit(self.beginning_of_outro_ms)
            .unwrap_or_else(|| self.end_of_message_ms(duration_ms))
    }

    pub fn end_of_intro_ms(&self, duration_ms: i64) -> i64 {
        explicit(self.end_of_intro_ms).unwrap_or_else(|| duration_ms.min(1000))
    }
}

/// A catalog entry for playable audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "AudioBlockJson")]
pub struct AudioBlock {
    pub id: String,
    pub kind: AudioBlockKind,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: i64,
    /// 0-100, only meaningful for songs.
    pub popularity: Option<i32>,
    pub cue_points: CuePoints,
    pub audio_url: Option<String>,
    pub isrc: Option<String>,
}

impl AudioBlock {
    pub fn end_of_message_ms(&self) -> i64 {
        self.cue_points.end_of_message_ms(self.duration_ms)
    }

    pub fn beginning_of_outro_ms(&self) -> i64 {
        self.cue_points.beginning_of_outro_ms(self.duration_ms)
    }

    pub fn end_of_intro_ms(&self) -> i64 {
        self.cue_points.end_of_intro_ms(self.duration_ms)
    }

    /// Length of the musical outro, the part a voicetrack may ride over.
    pub fn outro_length_ms(&self) -> i64 {
        self.end_of_message_ms() - self.beginning_of_outro_ms()
    }

    pub fn popularity_or_zero(&self) -> i32 {
        self.popularity.unwrap_or(0)
    }

    pub fn is_commercial(&self) -> bool {
        self.kind == AudioBlockKind::Commercial
    }
}

/// Wire representation of an audio block, cue points already derived.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioBlockJson {
    id: String,
    #[serde(rename = "type")]
    kind: AudioBlockKind,
    title: String,
    artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<String>,
    #[serde(rename = "durationMS")]
    duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    popularity: Option<i32>,
    #[serde(rename = "endOfIntroMS")]
    end_of_intro_ms: i64,
    #[serde(rename = "endOfMessageMS")]
    end_of_message_ms: i64,
    #[serde(rename = "beginningOfOutroMS")]
    beginning_of_outro_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_url: Option<String>,
}

impl From<AudioBlock> for AudioBlockJson {
    fn from(block: AudioBlock) -> Self {
        AudioBlockJson {
            end_of_intro_ms: block.end_of_intro_ms(),
            end_of_message_ms: block.end_of_message_ms(),
            beginning_of_outro_ms: block.beginning_of_outro_ms(),
            id: block.id,
            kind: block.kind,
            title: block.title,
            artist: block.artist,
            album: block.album,
            duration_ms: block.duration_ms,
            popularity: block.popularity,
            audio_url: block.audio_url,
        }
    }
}

/// Data needed to insert an audio block. The id is generated by the store.
#[derive(Debug, Clone)]
pub struct NewAudioBlock {
    pub kind: AudioBlockKind,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_ms: i64,
    pub popularity: Option<i32>,
    pub cue_points: CuePoints,
    pub audio_url: Option<String>,
    pub isrc: Option<String>,
}

impl NewAudioBlock {
    pub fn new(kind: AudioBlockKind, title: &str, artist: &str, duration_ms: i64) -> Self {
        Self {
            kind,
            title: title.to_string(),
            artist: artist.to_string(),
            album: None,
            duration_ms,
            popularity: None,
            cue_points: CuePoints::default(),
            audio_url: None,
            isrc: None,
        }
    }
}

/// Outbound notification about catalog writes, polled by interested consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBlockEventType {
    Created,
    Updated,
}

impl AudioBlockEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioBlockEventType::Created => "audio_block_created",
            AudioBlockEventType::Updated => "audio_block_updated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio_block_created" => Some(AudioBlockEventType::Created),
            "audio_block_updated" => Some(AudioBlockEventType::Updated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioBlockEvent {
    pub seq: i64,
    pub event_type: AudioBlockEventType,
    pub audio_block_id: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

// =============================================================================
// Listeners and their song pools
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Listener {
    pub id: String,
    pub display_name: Option<String>,
    /// Unix timestamp in seconds.
    pub created_at: i64,
}

/// Binds a listener to a candidate song.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSong {
    pub id: i64,
    pub user_id: String,
    pub song_id: String,
    /// 0.0 - 1.0
    pub user_affinity: f64,
    pub song: AudioBlock,
}

// =============================================================================
// Spins
// =============================================================================

/// One scheduled occurrence of an audio block for a listener.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Spin {
    pub id: i64,
    pub user_id: String,
    pub audio_block_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub airtime: DateTime<Utc>,
    pub playlist_position: i64,
}

/// A spin joined with its audio block, the unit the scheduling engine works on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSpin {
    #[serde(flatten)]
    pub spin: Spin,
    pub audio_block: AudioBlock,
}

impl ScheduledSpin {
    pub fn kind(&self) -> AudioBlockKind {
        self.audio_block.kind
    }

    /// When this spin's message ends; the next item starts from here by default.
    pub fn end_of_message(&self) -> DateTime<Utc> {
        self.spin.airtime + Duration::milliseconds(self.audio_block.end_of_message_ms())
    }
}

#[derive(Debug, Clone)]
pub struct NewSpin {
    pub user_id: String,
    pub audio_block_id: String,
    pub airtime: DateTime<Utc>,
    pub playlist_position: i64,
}

/// Named read windows over a listener's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistWindow {
    /// now - 15 min .. now + 15 min
    Current,
    /// now - 15 min .. now + 200 min
    Extended,
    /// Everything.
    Full,
}

impl PlaylistWindow {
    /// Airtime bounds (inclusive) of the window, `None` when unbounded.
    pub fn bounds(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            PlaylistWindow::Current => {
                Some((now - Duration::minutes(15), now + Duration::minutes(15)))
            }
            PlaylistWindow::Extended => {
                Some((now - Duration::minutes(15), now + Duration::minutes(200)))
            }
            PlaylistWindow::Full => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "current" => Some(PlaylistWindow::Current),
            "extended" => Some(PlaylistWindow::Extended),
            "full" => Some(PlaylistWindow::Full),
            _ => None,
        }
    }
}
