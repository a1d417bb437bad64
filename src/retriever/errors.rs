// Error types for retrieval providers and the orchestrator

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Reference is not a URL any configured provider can handle
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Network failure, timeout or non-2xx status on one instance
    #[error("Instance {instance} unreachable: {reason}")]
    InstanceUnreachable { instance: String, reason: String },

    /// Instance answered, but the body was unusable
    #[error("Invalid response from {instance}: {reason}")]
    InvalidResponse { instance: String, reason: String },

    /// yt-dlp or ffmpeg not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Resolved, but nothing matches the requested output kind
    #[error("No suitable stream: {0}")]
    NoSuitableStream(String),

    /// Byte transfer failed after a stream was selected
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Mux failed: {0}")]
    MuxFailed(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    /// Every candidate instance was tried without success
    #[error("All {attempts} instance(s) failed; last error: {last}")]
    AllInstancesFailed {
        attempts: usize,
        last: Box<RetrievalError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    /// Whether the orchestrator should move on to the next instance
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            Self::InstanceUnreachable { .. }
                | Self::InvalidResponse { .. }
                | Self::ToolNotFound(_)
                | Self::NoSuitableStream(_)
                | Self::DownloadFailed(_)
        )
    }

    pub fn unreachable(instance: &str, reason: impl Into<String>) -> Self {
        Self::InstanceUnreachable {
            instance: instance.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_response(instance: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            instance: instance.to_string(),
            reason: reason.into(),
        }
    }

    /// Map an HTTP client error from a resolve call
    pub fn from_request(instance: &str, err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            format!("timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else if err.is_decode() {
            return Self::invalid_response(instance, format!("undecodable body: {}", err));
        } else {
            err.to_string()
        };
        Self::unreachable(instance, reason)
    }

    /// Classify stderr of the extraction tool.
    ///
    /// Unsupported or malformed URLs are not worth retrying elsewhere; every
    /// other failure is treated as this instance being unusable.
    pub fn from_tool_stderr(instance: &str, stderr: &str) -> Self {
        let trimmed = stderr.trim();
        let lower = trimmed.to_lowercase();

        if lower.contains("unsupported url") || lower.contains("is not a valid url") {
            return Self::InvalidReference(first_error_line(trimmed));
        }

        if lower.contains("timed out") || lower.contains("timeout") {
            return Self::unreachable(instance, format!("timed out: {}", first_error_line(trimmed)));
        }

        Self::unreachable(instance, first_error_line(trimmed))
    }
}

/// yt-dlp prints warnings before the actual `ERROR:` line
fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("unknown error")
        .trim()
        .to_string()
}
