//! Hard limits on inputs accepted by the engine and the wire surface.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_GUEST_FIELD_LEN: usize = 256;
pub const MAX_SESSION_ID_LEN: usize = 128;
pub const MAX_DRAFTS: usize = 100_000;

/// Longest stay a single reservation or block may cover.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Widest window a restriction listing may scan.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;
