use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Spotter";

/// Prefix of every client-generated provisional message id
pub const PROVISIONAL_PREFIX: &str = "tmp-";

/// Default health probe interval (seconds)
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

/// Default timeout for a single health probe (seconds)
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Upper bound for the probe interval while backing off (seconds)
pub const DEFAULT_MAX_PROBE_INTERVAL_SECS: u64 = 120;

/// Default timeout for a single persistence attempt (seconds)
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;

/// Maximum characters kept in a conversation's last-message preview
pub const PREVIEW_MAX_CHARS: usize = 80;

/// Auto-dismiss durations for user-facing notifications
pub const NOTIFY_SUCCESS: Duration = Duration::from_secs(3);
pub const NOTIFY_INFO: Duration = Duration::from_secs(3);
pub const NOTIFY_WARNING: Duration = Duration::from_secs(4);
pub const NOTIFY_ERROR: Duration = Duration::from_secs(5);
