//! Error taxonomy shared by the client crates

use thiserror::Error;

/// Problems with the local configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key (set UNIFAI_API_KEY or `api_key` in the config file)")]
    MissingApiKey,

    #[error("invalid API key: {0}")]
    InvalidApiKey(&'static str),

    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("min model interval ({min}s) exceeds max model interval ({max}s)")]
    IntervalOrder { min: u64, max: u64 },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures talking to the remote platform over HTTP. Never retried here.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    /// HTTP status of the failed call, if the server answered at all
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        assert!(ConfigError::MissingApiKey.to_string().contains("UNIFAI_API_KEY"));
        let err = ConfigError::IntervalOrder { min: 90, max: 60 };
        assert_eq!(
            err.to_string(),
            "min model interval (90s) exceeds max model interval (60s)"
        );
    }

    #[test]
    fn test_api_error_status() {
        let err = ApiError::Status {
            url: "http://localhost/actions/call".to_string(),
            status: reqwest::StatusCode::UNAUTHORIZED,
            body: "bad key".to_string(),
        };
        assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("bad key"));
    }
}
