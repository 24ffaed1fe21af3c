//! Error types for the market data stream client.

use thiserror::Error;

use crate::domain::streaming::UnknownEventType;
use crate::domain::subscription::NormalizeError;
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::dispatch::DispatchError;
use crate::infrastructure::stream::ReconnectionError;

/// Errors surfaced to the application.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Rejected locally and never retried: bad parameters, exhausted quota
    /// or rate limit, out-of-range settings, double start.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reconnection attempts ran out.
    #[error(transparent)]
    Reconnection(#[from] ReconnectionError),

    /// The dispatcher could not start.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<NormalizeError> for StreamError {
    fn from(err: NormalizeError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<UnknownEventType> for StreamError {
    fn from(err: UnknownEventType) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscription::SubscriptionKind;

    #[test]
    fn normalize_errors_are_invalid_argument() {
        let err = StreamError::from(NormalizeError::MissingInstruments(SubscriptionKind::Trades));
        assert!(matches!(err, StreamError::InvalidArgument(_)));
        assert!(err.to_string().contains("trades"));
    }

    #[test]
    fn reconnection_error_is_transparent() {
        let err = StreamError::from(ReconnectionError::MaxAttemptsExceeded { max_attempts: 5 });
        assert_eq!(err.to_string(), "maximum reconnection attempts (5) exceeded");
    }
}
