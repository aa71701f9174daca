//! Controller scheduling defaults.

/// How often every namespace is re-enqueued, in seconds.
pub const NAMESPACE_RESYNC_SECS: u64 = 60;

/// How often every quota profile is re-enqueued, in seconds.
pub const PROFILE_RESYNC_SECS: u64 = 300;

/// Delay before a failed pass is scheduled again, in seconds.
pub const REQUEUE_DELAY_SECS: u64 = 5;

/// Maximum number of passes a controller runs at once.
pub const DEFAULT_WORKERS: usize = 4;
