//! The schedule engine: airtime rules, inventory selection, and the generator
//! that extends and edits each listener's timeline.

mod commercial_chooser;
mod error;
mod listener_locks;
mod playlist_generator;
mod song_chooser;
pub mod timing;

pub use commercial_chooser::{CommercialChooser, COMMERCIAL_ARTIST, COMMERCIAL_TITLE};
pub use error::{ScheduleError, ScheduleResult};
pub use listener_locks::ListenerLocks;
pub use playlist_generator::{reformat_schedule, ExtendOutcome, PlaylistGenerator, Reflow};
pub use song_chooser::{
    PopularityLevel, SongChooser, SongPick, ARTIST_REST_MINUTES, MIN_STATION_SONGS,
    SONG_REST_MINUTES,
};
