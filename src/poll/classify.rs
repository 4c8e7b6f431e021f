//! Typed classification of poll and fetch failures
//!
//! Every failure a worker or the feed poller sees is turned into a
//! [`TypedError`] before it is allowed to influence retry or disable
//! decisions. Raw transport errors never leave this module untyped.

use chrono::Duration;
use std::fmt;

/// Closed set of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// HTTP 429
    RateLimited,
    /// HTTP 403
    Forbidden,
    /// HTTP 404
    NotFound,
    /// HTTP 410
    Gone,
    /// HTTP 5xx
    Upstream,
    /// DNS, timeout, connection refused/reset, cancellation
    Network,
    /// Response body could not be parsed
    Parse,
    /// Any other non-success status or client-side anomaly
    Unexpected,
    /// Storage or programming failure on our side
    Internal,
}

impl ErrorKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Gone => "gone",
            Self::Upstream => "upstream",
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Unexpected => "unexpected",
            Self::Internal => "internal",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "rate_limited" => Some(Self::RateLimited),
            "forbidden" => Some(Self::Forbidden),
            "not_found" => Some(Self::NotFound),
            "gone" => Some(Self::Gone),
            "upstream" => Some(Self::Upstream),
            "network" => Some(Self::Network),
            "parse" => Some(Self::Parse),
            "unexpected" => Some(Self::Unexpected),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Severity attached to every error of this kind
    pub fn severity(&self) -> Severity {
        match self {
            Self::Unexpected | Self::Internal => Severity::Error,
            _ => Severity::Warn,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// How loudly a failure is reported
///
/// `Warn` failures are expected operational noise and may disable a source.
/// `Error` failures point at a bug or an anomaly and never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Warn,
    Error,
}

/// A classified failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub status_code: Option<u16>,
    pub retry_after: Option<Duration>,
    pub cause: String,
}

impl TypedError {
    pub fn new(kind: ErrorKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            status_code: None,
            retry_after: None,
            cause: cause.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Shorthand for a storage or programming failure
    pub fn internal(cause: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, cause)
    }

    /// Emits the error at the level its severity calls for
    pub fn log(&self, context: &str, subject: &str) {
        match self.severity {
            Severity::Warn => tracing::warn!(
                kind = %self.kind,
                status = ?self.status_code,
                subject = subject,
                "{}: {}",
                context,
                self.cause
            ),
            Severity::Error => tracing::error!(
                kind = %self.kind,
                status = ?self.status_code,
                subject = subject,
                "{}: {}",
                context,
                self.cause
            ),
        }
    }
}

impl fmt::Display for TypedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.cause),
            None => write!(f, "{}: {}", self.kind, self.cause),
        }
    }
}

/// Transport-level failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Dns,
    Timeout,
    Connect,
    Reset,
    Cancelled,
    TooManyRedirects,
    Other,
}

/// What a fetch attempt produced, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// An HTTP response arrived
    Response {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// No response: the request failed below HTTP
    Transport {
        failure: TransportFailure,
        message: String,
    },

    /// A response arrived but its body could not be parsed
    Parse(String),

    /// Something failed on our side (storage, invariant violation)
    Internal(String),
}

/// Classifies a raw fetch outcome
///
/// Returns `None` for success (2xx and 304 Not Modified).
///
/// | Outcome | Kind | Severity |
/// |---|---|---|
/// | 429 | RateLimited | Warn |
/// | 403 | Forbidden | Warn |
/// | 404 | NotFound | Warn |
/// | 410 | Gone | Warn |
/// | 5xx | Upstream | Warn |
/// | DNS, timeout, connect, reset, cancel | Network | Warn |
/// | parse failure | Parse | Warn |
/// | other status, redirect overflow | Unexpected | Error |
/// | storage/programming failure | Internal | Error |
pub fn classify(outcome: &RawOutcome) -> Option<TypedError> {
    match outcome {
        RawOutcome::Response { status, retry_after } => {
            let status = *status;
            let kind = match status {
                200..=299 | 304 => return None,
                429 => ErrorKind::RateLimited,
                403 => ErrorKind::Forbidden,
                404 => ErrorKind::NotFound,
                410 => ErrorKind::Gone,
                500..=599 => ErrorKind::Upstream,
                _ => ErrorKind::Unexpected,
            };
            let retry_after = if kind == ErrorKind::RateLimited {
                *retry_after
            } else {
                None
            };
            Some(
                TypedError::new(kind, format!("HTTP status {}", status))
                    .with_status(status)
                    .with_retry_after(retry_after),
            )
        }
        RawOutcome::Transport { failure, message } => {
            let kind = match failure {
                TransportFailure::TooManyRedirects | TransportFailure::Other => {
                    ErrorKind::Unexpected
                }
                _ => ErrorKind::Network,
            };
            Some(TypedError::new(kind, message.clone()))
        }
        RawOutcome::Parse(message) => Some(TypedError::new(ErrorKind::Parse, message.clone())),
        RawOutcome::Internal(message) => Some(TypedError::internal(message.clone())),
    }
}

/// Parses a `Retry-After` header value
///
/// Accepts delta-seconds and HTTP dates (RFC 2822 form). Dates in the past
/// yield a zero duration.
pub fn parse_retry_after(value: &str, now: chrono::DateTime<chrono::Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return (secs >= 0).then(|| Duration::seconds(secs));
    }
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| (date.with_timezone(&chrono::Utc) - now).max(Duration::zero()))
}
