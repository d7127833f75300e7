//! Error types for ASU client operations

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for ASU client operations
pub type Result<T> = std::result::Result<T, AsuClientError>;

/// Errors that can occur during ASU client operations
#[derive(Error, Debug)]
pub enum AsuClientError {
    /// HTTP request failed (connection refused, DNS failure, timeout, broken stream)
    #[error("HTTP request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Client configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Response body was not valid JSON or lacked a required field
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Server returned an error response outside of the build lifecycle
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Remote object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Build finished unsuccessfully
    #[error("Build failed with status {status}: {}", .imagebuilder_status.as_deref().or(.detail.as_deref()).unwrap_or("unknown error"))]
    BuildFailed {
        status: u16,
        imagebuilder_status: Option<String>,
        detail: Option<String>,
        stdout: Option<String>,
        stderr: Option<String>,
    },

    /// Downloaded artifact does not match the digest published by the service
    #[error("Checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Output directory or file could not be created or written
    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Poll bound exceeded while the build was still pending
    #[error("Timed out waiting for build after {attempts} status requests")]
    Timeout { attempts: u32 },
}

impl AsuClientError {
    /// Create a server error from status code and message
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Wrap an IO error with the path it occurred on
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failed_message() {
        let err = AsuClientError::BuildFailed {
            status: 500,
            imagebuilder_status: None,
            detail: Some("Error: Impossible package selection".into()),
            stdout: None,
            stderr: Some("boom".into()),
        };
        assert_eq!(
            err.to_string(),
            "Build failed with status 500: Error: Impossible package selection"
        );
    }

    #[test]
    fn test_filesystem_message() {
        let err = AsuClientError::filesystem(
            "/tmp/out",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "Filesystem error at /tmp/out: denied");
    }
}
