//! Retry classification and backoff for repository fetches.
//!
//! A failed transfer is sorted into a [`FailureType`]; the [`RetryPolicy`]
//! turns that plus the attempt number into a [`RetryDecision`]. Servers
//! that send `Retry-After` on 429/503 override the computed backoff.
//!
//! ```
//! use mirror_core::download::{DownloadError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::http_status("https://example.com/repodata/repomd.xml", 503);
//! assert!(matches!(
//!     policy.should_retry(classify_error(&error), 1),
//!     RetryDecision::Retry { attempt: 2, .. }
//! ));
//! ```

use std::time::{Duration, SystemTime};

use rand::Rng;
use tracing::{debug, warn};

use super::DownloadError;
use super::constants::MAX_RETRY_AFTER;

/// Default number of attempts per file, the first one included.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const MAX_JITTER: Duration = Duration::from_millis(500);

/// How a failed fetch should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Network trouble or a 5xx/408 answer; asking again may work.
    Transient,
    /// Missing file, bad location, checksum mismatch or local I/O.
    Permanent,
    /// 401/403: the credential is missing or was refused.
    NeedsAuth,
    /// 429.
    RateLimited,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry { delay: Duration, attempt: u32 },
    /// Give up; `reason` ends up in the debug log.
    DoNotRetry { reason: String },
}

/// Bounded exponential backoff.
///
/// The wait before attempt `n + 1` is `base * multiplier^(n-1)`, capped at
/// `max_delay`, plus up to `min(500ms, base)` of jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, 2.0)
    }
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, multiplier: f32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier,
        }
    }

    /// Default backoff with a different attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after attempt `attempt` (1-based) failed.
    #[must_use]
    pub fn should_retry(&self, failure: FailureType, attempt: u32) -> RetryDecision {
        let reason = match failure {
            FailureType::Permanent => Some("permanent failure".to_string()),
            FailureType::NeedsAuth => Some("credential rejected".to_string()),
            _ if attempt >= self.max_attempts => {
                Some(format!("max attempts ({}) exhausted", self.max_attempts))
            }
            FailureType::Transient | FailureType::RateLimited => None,
        };
        if let Some(reason) = reason {
            return RetryDecision::DoNotRetry { reason };
        }

        let delay = self.backoff(attempt) + self.jitter();
        debug!(attempt, delay_ms = delay.as_millis(), "scheduling retry");
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * f64::from(self.multiplier).powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped_ms as u64)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        let ceiling = MAX_JITTER.min(self.base_delay).as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Sorts a transfer error for [`RetryPolicy::should_retry`].
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => match *status {
            401 | 403 => FailureType::NeedsAuth,
            429 => FailureType::RateLimited,
            408 | 500..=599 => FailureType::Transient,
            _ => FailureType::Permanent,
        },
        DownloadError::Timeout { .. } => FailureType::Transient,
        // Builder and redirect-policy errors repeat identically.
        DownloadError::Network { source, .. } if source.is_builder() || source.is_redirect() => {
            FailureType::Permanent
        }
        DownloadError::Network { .. } => FailureType::Transient,
        DownloadError::Io { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::UnsafePath { .. }
        | DownloadError::Integrity { .. } => FailureType::Permanent,
    }
}

/// Server-requested wait carried by an HTTP error, if any.
#[must_use]
pub fn retry_after_delay(error: &DownloadError) -> Option<Duration> {
    match error {
        DownloadError::HttpStatus {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}

/// Parses `Retry-After` as delta-seconds or an HTTP-date, capped at five
/// minutes.
///
/// ```
/// use mirror_core::download::parse_retry_after;
/// use std::time::Duration;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("later"), None);
/// ```
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    let delay = match value.parse::<u64>() {
        Ok(seconds) => Duration::from_secs(seconds),
        Err(_) => httpdate::parse_http_date(value)
            .ok()?
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    };
    if delay > MAX_RETRY_AFTER {
        warn!(requested_secs = delay.as_secs(), "capping Retry-After");
        return Some(MAX_RETRY_AFTER);
    }
    Some(delay)
}
