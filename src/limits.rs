use crate::model::{DAY_MS, Ms};

/// Widest window a single slot query may cover.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * DAY_MS;

pub const MAX_TOUR_DURATION_MINUTES: u32 = 7 * 24 * 60;
pub const MAX_START_TIMES_PER_RULE: usize = 96;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 64;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_PROVIDER_ID_LEN: usize = 255;
/// Per-participant price ceiling (one million in minor units).
pub const MAX_PRICE_CENTS: u64 = 100_000_000;

/// Instants before 1970 or after 2200 are rejected outright.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
