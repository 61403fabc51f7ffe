//! Error types for jirahub-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal at startup; no partial run is attempted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the file path and serde_yaml line context.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The merged document did not match the configuration schema.
    #[error("invalid configuration: {0}")]
    Schema(#[source] serde_yaml::Error),

    #[error("no configuration files given")]
    NoFiles,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid regular expression in `{field}`: {source}")]
    InvalidRegex {
        field: String,
        #[source]
        source: regex::Error,
    },

    /// The same value appears in both an include and an exclude set.
    #[error("`{include}` and `{exclude}` both contain {values:?}")]
    Conflict {
        include: String,
        exclude: String,
        values: Vec<String>,
    },
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Failure reported by a tracker collaborator.
///
/// The variant decides how the action executor treats the failure:
/// transient errors are retried, permission errors abort the run, the rest
/// fail only the issue being processed.
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    /// Network failure, rate limit, or server-side error.
    #[error("transient {service} error: {message}")]
    Transient {
        service: String,
        message: String,
        /// Server-provided delay before the next call (rate limits).
        retry_after: Option<Duration>,
    },

    /// Missing credentials, rejected credentials, or insufficient scope.
    #[error("{service} permission denied: {message}")]
    Permission { service: String, message: String },

    #[error("{service} resource not found: {what}")]
    NotFound { service: String, what: String },

    /// The service refused the request (validation error, unknown field, ...).
    #[error("{service} rejected request ({status}): {message}")]
    Rejected {
        service: String,
        status: u16,
        message: String,
    },

    /// The response could not be understood.
    #[error("failed to decode {service} response: {message}")]
    Decode { service: String, message: String },
}

impl TrackerError {
    pub fn transient(service: impl Into<String>, message: impl Into<String>) -> Self {
        TrackerError::Transient {
            service: service.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permission(service: impl Into<String>, message: impl Into<String>) -> Self {
        TrackerError::Permission {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn not_found(service: impl Into<String>, what: impl Into<String>) -> Self {
        TrackerError::NotFound {
            service: service.into(),
            what: what.into(),
        }
    }

    pub fn decode(service: impl Into<String>, message: impl Into<String>) -> Self {
        TrackerError::Decode {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::Transient { .. })
    }

    /// Aborts the whole run rather than a single issue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TrackerError::Permission { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TrackerError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status code returned by `service`.
    ///
    /// 408/409/425/429 and every 5xx are transient; 401/403 are permission
    /// failures; 404 is not-found; any other 4xx is a rejection.
    pub fn from_status(
        service: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let service = service.into();
        let message = message.into();
        match status {
            401 | 403 => TrackerError::Permission { service, message },
            404 => TrackerError::NotFound {
                service,
                what: message,
            },
            408 | 409 | 425 | 429 => TrackerError::Transient {
                service,
                message: format!("HTTP {status}: {message}"),
                retry_after,
            },
            s if s >= 500 => TrackerError::Transient {
                service,
                message: format!("HTTP {status}: {message}"),
                retry_after,
            },
            _ => TrackerError::Rejected {
                service,
                status,
                message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(401, false, true)]
    #[case(403, false, true)]
    #[case(404, false, false)]
    #[case(408, true, false)]
    #[case(422, false, false)]
    #[case(429, true, false)]
    #[case(500, true, false)]
    #[case(503, true, false)]
    fn status_classification(#[case] status: u16, #[case] transient: bool, #[case] fatal: bool) {
        let err = TrackerError::from_status("GitHub", status, "boom", None);
        assert_eq!(err.is_transient(), transient, "{err}");
        assert_eq!(err.is_fatal(), fatal, "{err}");
    }

    #[test]
    fn retry_after_only_on_transient() {
        let wait = Some(Duration::from_secs(3));
        let err = TrackerError::from_status("JIRA", 429, "slow down", wait);
        assert_eq!(err.retry_after(), wait);
        let err = TrackerError::from_status("JIRA", 400, "bad", wait);
        assert_eq!(err.retry_after(), None);
    }
}
