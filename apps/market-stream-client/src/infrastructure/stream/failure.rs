//! Transport failure classification.

use std::time::Duration;

use tonic::{Code, Status};

/// Metadata header carrying the server's rate-limit reset, in seconds.
pub const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// How the controller reacts to a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection lost; reconnect.
    Disconnected,
    /// Server-side failure; reconnect.
    Internal,
    /// Rate limited; cool down, then reconnect.
    ResourceExhausted,
    /// Credentials rejected; stop.
    Authentication,
    /// Call cancelled; stop cleanly.
    Cancelled,
}

impl FailureClass {
    /// Classify a status by code.
    #[must_use]
    pub fn classify(status: &Status) -> Self {
        match status.code() {
            Code::Unavailable | Code::DeadlineExceeded | Code::Aborted => Self::Disconnected,
            Code::Unauthenticated | Code::PermissionDenied => Self::Authentication,
            Code::Cancelled => Self::Cancelled,
            Code::ResourceExhausted => Self::ResourceExhausted,
            _ => Self::Internal,
        }
    }

    /// Check whether the controller should reconnect after this failure.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Internal | Self::ResourceExhausted
        )
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Internal => "internal",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Authentication => "authentication",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Read the rate-limit reset from status metadata.
#[must_use]
pub fn rate_limit_reset(status: &Status) -> Option<Duration> {
    status
        .metadata()
        .get(RATE_LIMIT_RESET_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
