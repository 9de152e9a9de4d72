use crate::model::Minute;

// Institutional booking window: 08:00–18:00, minutes since midnight.
pub const DAY_START: Minute = 8 * 60;
pub const DAY_END: Minute = 18 * 60;

pub const MAX_HALLS: usize = 512;
pub const MAX_BOOKINGS_PER_HALL: usize = 10_000;
pub const MAX_PROFILES: usize = 10_000;
pub const MAX_INBOX_LEN: usize = 1_000;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_USERNAME_LEN: usize = 64;
pub const MAX_EVENT_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_NOTE_LEN: usize = 500;
