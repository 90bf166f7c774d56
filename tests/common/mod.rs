//! Common test infrastructure
//!
//! Tests build a [`TestStation`]: an in-memory store plus a generator with a
//! seeded rng, so every run produces the same schedule.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestStation, LISTENER_ID};
//!
//! let station = TestStation::new();
//! station.add_listener_with_songs(LISTENER_ID, 120, 180_000);
//! ```

mod constants;
mod fixtures;

pub use constants::*;
pub use fixtures::*;
