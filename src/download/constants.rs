//! Constants for the download module (timeouts, parallelism, retry caps).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large packages).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Maximum Retry-After header value honoured (5 minutes).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Suffix of the staging file a transfer streams into before verification.
pub const PART_SUFFIX: &str = "part";
