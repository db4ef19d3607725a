use tokio::sync::watch::error::SendError;

use crate::executor::RunState;

/// Malformed configuration. Always raised before a run starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        source: std::io::Error,
        path: String,
    },

    #[error("Failed to parse config JSON: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Failed to parse config TOML: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },

    #[error("Invalid duration '{input}': {reason}")]
    Duration { input: String, reason: String },

    #[error("Invalid metric selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("Invalid threshold expression '{expression}': {reason}")]
    Expression { expression: String, reason: String },

    #[error("Config validation error: {message}")]
    Validation { message: String },
}

/// A request that did not produce a response.
///
/// Never escapes a virtual user: it is recorded as a failed sample and the
/// run continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Request failed: {message}")]
    Other { message: String },
}

impl RequestError {
    /// Short category used as the `error` tag on failed samples.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
            Self::Other { .. } => "other",
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else {
            Self::Other {
                message: err.to_string(),
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Run state channel closed")]
    Shutdown(#[from] SendError<RunState>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_categories() {
        assert_eq!(RequestError::Timeout.category(), "timeout");
        let conn = RequestError::Connection {
            message: "refused".into(),
        };
        assert_eq!(conn.category(), "connection");
        assert_eq!(conn.to_string(), "Connection error: refused");
    }

    #[test]
    fn config_errors_convert_into_the_crate_error() {
        let err: Error = ConfigError::Validation {
            message: "no stages".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Config validation error: no stages");
    }
}
