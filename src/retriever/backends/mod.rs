// Retrieval backends
//
// Every backend answers in its own JSON shape. Each shape gets a strict
// serde model and a normalize step producing the same StreamDescriptors.
// Single malformed stream entries are skipped, never fatal.

pub mod aggregator;
pub mod mirror;
pub mod native;

pub use aggregator::AggregatorAdapter;
pub use mirror::{MirrorAdapter, MirrorFlavor};
pub use native::NativeAdapter;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::errors::RetrievalError;
use super::models::{ResolvedMedia, RetrievalRequest};
use super::pool::Instance;

/// Raw per-backend response, before normalization
#[derive(Debug)]
pub enum RawProviderResponse {
    YtDlp(native::YtDlpInfo),
    Invidious(mirror::InvidiousVideo),
    Piped(mirror::PipedStreams),
    Cobalt(aggregator::CobaltResponse),
}

/// What normalization needs besides the raw body
pub struct NormalizeContext<'a> {
    pub instance: &'a Instance,
    pub request: &'a RetrievalRequest,
    /// Target audio format (used when the backend does not report one)
    pub audio_format: &'a str,
}

impl RawProviderResponse {
    pub fn normalize(self, ctx: &NormalizeContext<'_>) -> Result<ResolvedMedia, RetrievalError> {
        match self {
            Self::YtDlp(info) => native::normalize(info, ctx),
            Self::Invidious(video) => mirror::normalize_invidious(video, ctx),
            Self::Piped(streams) => mirror::normalize_piped(streams, ctx),
            Self::Cobalt(response) => aggregator::normalize(response, ctx),
        }
    }
}

/// Deserialize each entry on its own, dropping the ones that do not fit
pub(crate) fn parse_entries<T: DeserializeOwned>(values: Vec<Value>, what: &str) -> Vec<T> {
    let total = values.len();
    let parsed: Vec<T> = values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<T>(v) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping malformed {} entry: {}", what, e);
                None
            }
        })
        .collect();

    if parsed.len() < total {
        debug!("Kept {}/{} {} entries", parsed.len(), total, what);
    }
    parsed
}

/// Title is the one field no backend may omit
pub(crate) fn require_title(title: Option<String>, instance: &Instance) -> Result<String, RetrievalError> {
    title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RetrievalError::invalid_response(&instance.base_url, "response has no title"))
}

/// "1080p60" -> 1080, "128 kbps" -> 128
pub(crate) fn parse_leading_number(s: &str) -> Option<u32> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// File extension for a MIME type such as `audio/webm; codecs="opus"`
pub(crate) fn container_from_mime(mime: &str) -> Option<String> {
    let essence = mime.split(';').next()?.trim().to_ascii_lowercase();
    let ext = match essence.as_str() {
        "video/mp4" => "mp4",
        "audio/mp4" => "m4a",
        "video/webm" | "audio/webm" => "webm",
        "video/3gpp" => "3gp",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        _ => return None,
    };
    Some(ext.to_string())
}

/// Numbers some backends send as strings ("bitrate": "129775")
pub(crate) fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Ids that come as numbers or strings depending on the backend
pub(crate) fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
