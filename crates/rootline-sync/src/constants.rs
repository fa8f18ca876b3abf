//! Sync configuration constants.
//!
//! Defaults for [`SyncConfig`](crate::SyncConfig); each can be overridden in
//! the RON config file.

use std::time::Duration;

/// Quiet period after the last property edit to a person before it is pushed.
pub const PROP_DEBOUNCE: Duration = Duration::from_millis(400);

/// First retry delay after a failed push. Doubles per consecutive failure.
pub const RETRY_BASE: Duration = Duration::from_secs(2);

/// Upper bound on the retry delay.
pub const RETRY_MAX: Duration = Duration::from_secs(60);

/// Confirmed pushes between full snapshot backups.
pub const BACKUP_EVERY: u32 = 50;

/// Minimum spacing between local saves.
pub const LOCAL_SAVE_THROTTLE: Duration = Duration::from_secs(3);

/// Quiet period before the consistency checker audits a new graph.
pub const CHECK_DEBOUNCE: Duration = Duration::from_secs(1);

/// Most entries sent in one batch.
pub const MAX_BATCH: usize = 100;

/// Capacity of the outbox and activity broadcast channels. Slow subscribers
/// lag rather than block the pump.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
