// Common data models for retrieval

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Containers that only ever hold an audio track
const AUDIO_CONTAINERS: &[&str] = &["m4a", "mp3", "aac", "opus", "ogg", "oga", "flac", "wav", "weba"];

/// What a single stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Video only, needs an audio stream muxed in
    Video,
    /// Audio only
    Audio,
    /// Video and audio in one container
    Muxed,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Muxed => write!(f, "muxed"),
        }
    }
}

/// What the caller wants to end up with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Video,
    Audio,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Normalized description of one fetchable stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Provider-specific id (itag, format_id, ...)
    pub id: String,
    pub kind: StreamKind,
    /// File extension of the stream (mp4, webm, m4a)
    pub container: String,
    /// Pixel rows for video/muxed, kbps for audio
    pub quality: u32,
    /// True for video-only streams
    pub requires_mux: bool,
    /// Time-limited URL issued by the provider
    pub source_url: String,
    /// Extra request headers the provider requires for the fetch
    #[serde(default)]
    pub http_headers: HashMap<String, String>,
}

impl StreamDescriptor {
    pub fn new(
        id: impl Into<String>,
        kind: StreamKind,
        container: impl Into<String>,
        quality: u32,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            container: container.into(),
            quality,
            requires_mux: kind == StreamKind::Video,
            source_url: source_url.into(),
            http_headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.http_headers = headers;
        self
    }

    /// Audio stream stored in a container that cannot hold video
    pub fn is_audio_only_file(&self) -> bool {
        self.kind == StreamKind::Audio && is_audio_container(&self.container)
    }
}

pub fn is_audio_container(ext: &str) -> bool {
    AUDIO_CONTAINERS.contains(&ext.to_ascii_lowercase().as_str())
}

/// Caller input for one retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub reference: String,
    pub output_kind: OutputKind,
}

impl RetrievalRequest {
    pub fn new(reference: impl Into<String>, output_kind: OutputKind) -> Self {
        Self {
            reference: reference.into(),
            output_kind,
        }
    }
}

/// Finished artifact handed back to the caller, who owns the file from now on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub local_path: PathBuf,
    pub display_title: String,
    pub display_author: Option<String>,
}

/// Output of one successful resolve call
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub descriptors: Vec<StreamDescriptor>,
    pub title: String,
    pub author: Option<String>,
}

/// What the selector decided to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionPlan {
    /// One muxed or audio stream
    Single(StreamDescriptor),
    /// Video-only + audio-only, muxed after download
    Pair {
        video: StreamDescriptor,
        audio: StreamDescriptor,
    },
}

impl SelectionPlan {
    pub fn requires_mux(&self) -> bool {
        matches!(self, Self::Pair { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_mux_follows_kind() {
        let v = StreamDescriptor::new("137", StreamKind::Video, "mp4", 1080, "https://x/v");
        let m = StreamDescriptor::new("22", StreamKind::Muxed, "mp4", 720, "https://x/m");
        assert!(v.requires_mux);
        assert!(!m.requires_mux);
    }

    #[test]
    fn test_audio_only_file() {
        let m4a = StreamDescriptor::new("140", StreamKind::Audio, "m4a", 128, "https://x/a");
        let webm = StreamDescriptor::new("251", StreamKind::Audio, "webm", 160, "https://x/a");
        let muxed = StreamDescriptor::new("18", StreamKind::Muxed, "mp4", 360, "https://x/m");
        assert!(m4a.is_audio_only_file());
        assert!(!webm.is_audio_only_file());
        assert!(!muxed.is_audio_only_file());
    }
}
