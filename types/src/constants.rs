/// Maximum display-name length accepted at registration
pub const MAX_NAME_LENGTH: usize = 32;

/// Default number of seats a game must fill before play begins
pub const DEFAULT_ROSTER_SIZE: usize = 2;

/// Default board position a player must reach (or pass) to win
pub const DEFAULT_TARGET_POSITION: u16 = 20;

/// Default stone faces a roll is drawn from
pub const DEFAULT_STONE_FACES: [u8; 6] = [1, 2, 3, 4, 5, 6];

/// Default stake per seat (minor currency units)
pub const DEFAULT_STAKE: u64 = 100;

/// Turn inactivity window before the laggard is force-abandoned (ms)
pub const DEFAULT_TURN_TIMEOUT_MS: u64 = 60_000;

/// Idle window after a terminal status before a session actor is evicted (ms)
pub const DEFAULT_EVICT_AFTER_MS: u64 = 5 * 60_000;

/// Verification attempts before a withdrawal is flagged for manual review
pub const DEFAULT_REVIEW_ATTEMPTS: u32 = 10;

/// Interval between automatic withdrawal reconciliation sweeps (ms)
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 30_000;
