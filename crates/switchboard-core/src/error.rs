//! Error taxonomy for resolver operations.

use thiserror::Error;

use crate::provider::ProviderId;

/// Errors that can occur while resolving, binding, or querying providers.
///
/// None of these escape the resolver's event loop: every variant is caught,
/// logged, and converted into either "no state change" or "schedule retry".
/// Callers observe unavailability as absent handles, never as errors.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The provider directory query failed. Logged; the catalog is unchanged.
    #[error("directory query failed: {0}")]
    Discovery(String),

    /// A connect request was rejected or threw. Schedules immediate backoff.
    #[error("connect rejected by {provider}: {reason}")]
    Connection {
        /// The provider the connect was issued to.
        provider: ProviderId,
        /// Reason reported by the connection layer.
        reason: String,
    },

    /// A remote call on a live connection failed. Logged; reconciled by the
    /// next full recomputation, not retried individually.
    #[error("remote {operation} failed on {provider}: {reason}")]
    RemoteCall {
        /// The provider the call was issued to.
        provider: ProviderId,
        /// The remote operation that failed.
        operation: &'static str,
        /// Reason reported by the connection layer.
        reason: String,
    },

    /// A capability query failed. Retried after a fixed delay.
    #[error("capability query failed for {provider}: {reason}")]
    Query {
        /// The queried provider.
        provider: ProviderId,
        /// Reason reported by the query channel.
        reason: String,
    },

    /// A capability query did not answer in time. Retried after a fixed delay.
    #[error("capability query timed out for {provider} after {timeout_ms}ms")]
    QueryTimeout {
        /// The queried provider.
        provider: ProviderId,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// An out-of-range slot or unknown provider id at a call boundary.
    /// Rejected as a no-op, never propagated as a panic.
    #[error("inconsistent configuration: {0}")]
    ConfigInconsistency(String),

    /// Configuration could not be parsed or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error while loading or saving configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for resolver operations.
pub type ResolverResult<T> = Result<T, ResolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResolverError::Connection {
            provider: ProviderId::new("com.example/Svc"),
            reason: "service unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "connect rejected by com.example/Svc: service unavailable"
        );

        let err = ResolverError::QueryTimeout {
            provider: ProviderId::new("com.example/Svc"),
            timeout_ms: 5_000,
        };
        assert_eq!(
            err.to_string(),
            "capability query timed out for com.example/Svc after 5000ms"
        );
    }

    #[test]
    fn test_io_conversion() {
        fn load() -> ResolverResult<String> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into())
        }
        assert!(matches!(load(), Err(ResolverError::Io(_))));
    }
}
