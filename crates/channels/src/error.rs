//! Error taxonomy for the relay core.

use std::{error::Error as StdError, path::PathBuf, time::Duration};

/// Outbound failure, classified once at the destination boundary.
///
/// Each variant has its own recovery in the delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The destination thread no longer exists.
    #[error("destination thread not found")]
    MissingThread,

    /// The destination asked us to slow down. `None` means no usable wait
    /// was reported and the configured default applies.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("delivery failed: {reason}")]
    Other { reason: String },
}

impl DeliveryError {
    /// Classify a free-text failure reason reported by the destination.
    ///
    /// `retry_after` is a structured hint (e.g. a response parameter) and
    /// takes precedence over a wait parsed out of the text.
    #[must_use]
    pub fn classify(reason: &str, retry_after: Option<Duration>) -> Self {
        let lower = reason.to_lowercase();
        if lower.contains("thread not found") {
            return Self::MissingThread;
        }
        if lower.contains("too many requests") || lower.contains("retry after") {
            return Self::RateLimited {
                retry_after: retry_after.or_else(|| parse_retry_after(&lower)),
            };
        }
        Self::Other {
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn other(reason: impl std::fmt::Display) -> Self {
        Self::Other {
            reason: reason.to_string(),
        }
    }
}

/// Extract `N` from "... retry after N ..." (seconds).
fn parse_retry_after(lower: &str) -> Option<Duration> {
    let (_, rest) = lower.split_once("retry after")?;
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok().map(Duration::from_secs)
}

/// Pull-protocol failure.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Still rate limited after the client's bounded retries.
    #[error("rate limited on {route} (retry after {retry_after:?})")]
    RateLimited { route: String, retry_after: Duration },

    #[error("access denied: {route}")]
    Forbidden { route: String },

    #[error("not found: {route}")]
    NotFound { route: String },

    #[error("unexpected status {status} from {route}")]
    Status { route: String, status: u16 },

    #[error("request to {route} failed: {source}")]
    Transport {
        route: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("malformed response from {route}: {message}")]
    Decode { route: String, message: String },
}

impl SourceError {
    #[must_use]
    pub fn transport(
        route: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            route: route.into(),
            source: Box::new(source),
        }
    }
}

/// Persistence failure. In-memory state stays authoritative.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("Bad Request: message thread not found")]
    #[case("THREAD NOT FOUND")]
    fn thread_not_found_is_missing_thread(#[case] reason: &str) {
        assert_eq!(
            DeliveryError::classify(reason, None),
            DeliveryError::MissingThread
        );
    }

    #[test]
    fn rate_limit_wait_parsed_from_text() {
        assert_eq!(
            DeliveryError::classify("Too Many Requests: retry after 35", None),
            DeliveryError::RateLimited {
                retry_after: Some(Duration::from_secs(35))
            }
        );
    }

    #[test]
    fn rate_limit_hint_wins_over_text() {
        assert_eq!(
            DeliveryError::classify(
                "Too Many Requests: retry after 35",
                Some(Duration::from_secs(7))
            ),
            DeliveryError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[test]
    fn rate_limit_without_number_leaves_default_to_caller() {
        assert_eq!(
            DeliveryError::classify("Too Many Requests", None),
            DeliveryError::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn anything_else_is_other() {
        let err = DeliveryError::classify("Bad Request: chat not found", None);
        assert!(matches!(err, DeliveryError::Other { ref reason } if reason.contains("chat not found")));
    }
}
