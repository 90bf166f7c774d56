#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

pub const LISTENER_ID: &str = "listener-1";
pub const OTHER_LISTENER_ID: &str = "listener-2";

pub const RNG_SEED: u64 = 20240501;

/// 12:00:20, twenty seconds into an airtime block.
pub fn block_start_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 20).unwrap()
}

/// 12:20:20, ten minutes before an airtime block boundary.
pub fn near_boundary_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 20, 20).unwrap()
}
