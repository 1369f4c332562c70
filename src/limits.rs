/// Shortest stay, in days.
pub const MIN_DAYS: u32 = 1;
/// Longest stay, in days.
pub const MAX_DAYS: u32 = 3;
/// Stay length assumed when a request omits it.
pub const DEFAULT_DAYS: u32 = 1;
/// Furthest a stay may start from today.
pub const MAX_ADVANCE_DAYS: u64 = 30;
