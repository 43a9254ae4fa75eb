//! Hard caps on input sizes. Anything beyond these is rejected with
//! `EngineError::LimitExceeded` before touching state.

pub const MAX_LOTS: usize = 100_000;
pub const MAX_VEHICLES: usize = 1_000_000;
pub const MAX_ALLOCATIONS_PER_LOT: usize = 100_000;

/// Longest single booking, in days.
pub const MAX_BOOKING_DAYS: i64 = 366;
/// Widest search window, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3_660;

pub const MAX_LOT_NUMBER_LEN: usize = 32;
pub const MAX_PLATE_LEN: usize = 32;
pub const MAX_TEXT_LEN: usize = 256;

/// Largest encoded WAL entry. A length header above this marks a corrupt tail.
pub const MAX_WAL_ENTRY_BYTES: usize = 1 << 20;
