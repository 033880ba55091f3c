//! Failure taxonomy for the aggregation pipeline.
//!
//! Only the account profile and the repository listing are load-bearing; their
//! failures abort the aggregation and surface here. Everything else (languages,
//! commit counts, the calendar, the PR search) degrades to empty or absent
//! fields and is logged instead.

use core::fmt;
use reqwest::header::HeaderMap;

/// Rate-limit hints lifted from the upstream's response headers, surfaced to
/// callers when the account fetch fails so they can tell "no such account"
/// from "out of quota".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHint {
    /// Value of `x-ratelimit-remaining`, if present.
    pub remaining: Option<String>,

    /// Value of `x-ratelimit-reset`, if present.
    pub reset: Option<String>,
}

impl RateLimitHint {
    /// Extract the rate-limit headers from a response.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let grab = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);

        Self {
            remaining: grab("x-ratelimit-remaining"),
            reset: grab("x-ratelimit-reset"),
        }
    }
}

/// A fatal aggregation failure.
#[derive(Debug)]
pub enum MetricsError {
    /// The upstream answered the account-profile fetch with a non-2xx status.
    AccountNotFound {
        /// Upstream HTTP status.
        status: u16,

        /// Rate-limit headers from the failing response.
        rate_limit: RateLimitHint,
    },

    /// A page of the repository listing came back non-2xx. Pages already
    /// fetched are discarded; the collection is all-or-nothing.
    CollectionFetchFailed {
        /// Upstream HTTP status of the failing page.
        status: u16,
    },

    /// A network-level failure on a call the aggregation cannot proceed without.
    Upstream(ohno::AppError),
}

impl MetricsError {
    /// The upstream HTTP status associated with this failure, if there is one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::AccountNotFound { status, .. } | Self::CollectionFetchFailed { status } => Some(*status),
            Self::Upstream(_) => None,
        }
    }
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountNotFound { status, rate_limit } => {
                write!(f, "could not fetch account profile (upstream status {status}")?;
                if let Some(remaining) = &rate_limit.remaining {
                    write!(f, ", rate limit remaining: {remaining}")?;
                }
                if let Some(reset) = &rate_limit.reset {
                    write!(f, ", rate limit resets at: {reset}")?;
                }
                write!(f, ")")
            }
            Self::CollectionFetchFailed { status } => {
                write!(f, "could not fetch repository listing (upstream status {status})")
            }
            Self::Upstream(e) => write!(f, "upstream unavailable: {e}"),
        }
    }
}

impl core::error::Error for MetricsError {}

impl From<ohno::AppError> for MetricsError {
    fn from(e: ohno::AppError) -> Self {
        Self::Upstream(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_not_found_display_includes_rate_limit_hints() {
        let err = MetricsError::AccountNotFound {
            status: 403,
            rate_limit: RateLimitHint {
                remaining: Some("0".to_owned()),
                reset: Some("1700000000".to_owned()),
            },
        };

        let msg = err.to_string();
        assert!(msg.contains("403"));
        assert!(msg.contains("rate limit remaining: 0"));
        assert!(msg.contains("1700000000"));
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn rate_limit_hint_reads_headers() {
        let mut headers = HeaderMap::new();
        _ = headers.insert("x-ratelimit-remaining", "42".parse().unwrap());

        let hint = RateLimitHint::from_headers(&headers);
        assert_eq!(hint.remaining.as_deref(), Some("42"));
        assert_eq!(hint.reset, None);
    }
}
