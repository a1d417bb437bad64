// Mirror network provider - Invidious and Piped API instances
//
// Instances are interchangeable: same video id, same JSON shape per flavor.
// The orchestrator walks the pool in order and moves on when one fails.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    container_from_mime, lenient_string, lenient_u64, parse_entries, parse_leading_number,
    require_title, NormalizeContext, RawProviderResponse,
};
use crate::config::NetworkConfig;
use crate::retriever::errors::RetrievalError;
use crate::retriever::fetch::HttpFetcher;
use crate::retriever::models::{ResolvedMedia, RetrievalRequest, StreamDescriptor, StreamKind};
use crate::retriever::pool::{Instance, InstancePool};
use crate::retriever::traits::ProviderAdapter;
use crate::retriever::utils::extract_video_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorFlavor {
    /// `local` asks the instance to proxy media through itself
    Invidious { proxy_media: bool },
    Piped,
}

/// `GET /api/v1/videos/{id}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvidiousVideo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub format_streams: Vec<Value>,
    #[serde(default)]
    pub adaptive_formats: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvidiousFormat {
    url: String,
    #[serde(default)]
    itag: Value,
    /// MIME type with codecs
    #[serde(rename = "type")]
    mime_type: String,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    quality_label: Option<String>,
    #[serde(default)]
    bitrate: Value,
}

impl InvidiousFormat {
    fn container(&self) -> Option<String> {
        // Invidious reports "webm" for both audio and video, "m4a" for audio/mp4
        self.container
            .clone()
            .filter(|c| !c.is_empty())
            .or_else(|| container_from_mime(&self.mime_type))
    }

    fn height(&self) -> u32 {
        self.resolution
            .as_deref()
            .or(self.quality_label.as_deref())
            .and_then(parse_leading_number)
            .unwrap_or(0)
    }

    fn into_descriptor(self, kind: StreamKind, instance: &Instance) -> Option<StreamDescriptor> {
        let container = self.container()?;
        let quality = match kind {
            StreamKind::Audio => lenient_u64(&self.bitrate).map(|bps| (bps / 1000) as u32).unwrap_or(0),
            StreamKind::Video | StreamKind::Muxed => self.height(),
        };
        let id = lenient_string(&self.itag).unwrap_or_else(|| format!("{}-{}", kind, quality));
        let url = absolute_url(instance, &self.url)?;
        Some(StreamDescriptor::new(id, kind, container, quality, url))
    }
}

/// `GET /streams/{id}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedStreams {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub video_streams: Vec<Value>,
    #[serde(default)]
    pub audio_streams: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipedStream {
    url: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    video_only: bool,
    #[serde(default)]
    bitrate: Option<u64>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    itag: Option<i64>,
}

impl PipedStream {
    fn container(&self) -> Option<String> {
        if let Some(ext) = self.mime_type.as_deref().and_then(container_from_mime) {
            return Some(ext);
        }
        let ext = match self.format.as_deref()? {
            "MPEG_4" => "mp4",
            "M4A" => "m4a",
            "WEBM" | "WEBMA_OPUS" => "webm",
            "v3GPP" => "3gp",
            _ => return None,
        };
        Some(ext.to_string())
    }

    fn into_descriptor(self, kind: StreamKind, instance: &Instance) -> Option<StreamDescriptor> {
        let container = self.container()?;
        let quality = match kind {
            StreamKind::Audio => self
                .quality
                .as_deref()
                .and_then(parse_leading_number)
                .or_else(|| self.bitrate.map(|bps| (bps / 1000) as u32))
                .unwrap_or(0),
            StreamKind::Video | StreamKind::Muxed => self
                .height
                .filter(|h| *h > 0)
                .or_else(|| self.quality.as_deref().and_then(parse_leading_number))
                .unwrap_or(0),
        };
        let id = self
            .itag
            .map(|i| i.to_string())
            .unwrap_or_else(|| format!("{}-{}", kind, quality));
        let url = absolute_url(instance, &self.url)?;
        Some(StreamDescriptor::new(id, kind, container, quality, url))
    }
}

/// Proxied URLs may come back relative to the instance
fn absolute_url(instance: &Instance, raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    if raw.starts_with('/') {
        return Some(instance.endpoint(raw));
    }
    None
}

pub fn parse_invidious(body: &str, instance: &Instance) -> Result<RawProviderResponse, RetrievalError> {
    serde_json::from_str::<InvidiousVideo>(body)
        .map(RawProviderResponse::Invidious)
        .map_err(|e| RetrievalError::invalid_response(&instance.base_url, format!("invalid JSON: {}", e)))
}

pub fn parse_piped(body: &str, instance: &Instance) -> Result<RawProviderResponse, RetrievalError> {
    serde_json::from_str::<PipedStreams>(body)
        .map(RawProviderResponse::Piped)
        .map_err(|e| RetrievalError::invalid_response(&instance.base_url, format!("invalid JSON: {}", e)))
}

pub(super) fn normalize_invidious(
    video: InvidiousVideo,
    ctx: &NormalizeContext<'_>,
) -> Result<ResolvedMedia, RetrievalError> {
    if let Some(error) = video.error {
        return Err(RetrievalError::unreachable(&ctx.instance.base_url, error));
    }
    let title = require_title(video.title, ctx.instance)?;

    let mut descriptors: Vec<StreamDescriptor> =
        parse_entries::<InvidiousFormat>(video.format_streams, "formatStreams")
            .into_iter()
            .filter_map(|f| f.into_descriptor(StreamKind::Muxed, ctx.instance))
            .collect();

    for format in parse_entries::<InvidiousFormat>(video.adaptive_formats, "adaptiveFormats") {
        let kind = if format.mime_type.starts_with("video/") {
            StreamKind::Video
        } else if format.mime_type.starts_with("audio/") {
            StreamKind::Audio
        } else {
            continue;
        };
        descriptors.extend(format.into_descriptor(kind, ctx.instance));
    }

    Ok(ResolvedMedia {
        descriptors,
        title,
        author: video.author,
    })
}

pub(super) fn normalize_piped(
    streams: PipedStreams,
    ctx: &NormalizeContext<'_>,
) -> Result<ResolvedMedia, RetrievalError> {
    if let Some(error) = streams.error {
        let reason = match streams.message {
            Some(message) => format!("{}: {}", error, message),
            None => error,
        };
        return Err(RetrievalError::unreachable(&ctx.instance.base_url, reason));
    }
    let title = require_title(streams.title, ctx.instance)?;

    let mut descriptors: Vec<StreamDescriptor> = parse_entries::<PipedStream>(streams.video_streams, "videoStreams")
        .into_iter()
        .filter_map(|s| {
            let kind = if s.video_only { StreamKind::Video } else { StreamKind::Muxed };
            s.into_descriptor(kind, ctx.instance)
        })
        .collect();

    descriptors.extend(
        parse_entries::<PipedStream>(streams.audio_streams, "audioStreams")
            .into_iter()
            .filter_map(|s| s.into_descriptor(StreamKind::Audio, ctx.instance)),
    );

    Ok(ResolvedMedia {
        descriptors,
        title,
        author: streams.uploader,
    })
}

pub struct MirrorAdapter {
    flavor: MirrorFlavor,
    pool: InstancePool,
    client: reqwest::Client,
    request_timeout: Duration,
    fetcher: HttpFetcher,
}

impl MirrorAdapter {
    pub fn new(
        flavor: MirrorFlavor,
        pool: InstancePool,
        client: reqwest::Client,
        network: &NetworkConfig,
    ) -> Self {
        Self {
            fetcher: HttpFetcher::new(client.clone(), network),
            flavor,
            pool,
            client,
            request_timeout: network.request_timeout(),
        }
    }

    fn api_url(&self, instance: &Instance, video_id: &str) -> String {
        match self.flavor {
            MirrorFlavor::Invidious { proxy_media } => {
                instance.endpoint(&format!("api/v1/videos/{}?local={}", video_id, proxy_media))
            }
            MirrorFlavor::Piped => instance.endpoint(&format!("streams/{}", video_id)),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MirrorAdapter {
    fn name(&self) -> &'static str {
        match self.flavor {
            MirrorFlavor::Invidious { .. } => "invidious",
            MirrorFlavor::Piped => "piped",
        }
    }

    fn pool(&self) -> &InstancePool {
        &self.pool
    }

    fn is_pooled(&self) -> bool {
        true
    }

    fn supports(&self, reference: &str) -> bool {
        extract_video_id(reference).is_some()
    }

    async fn resolve(&self, request: &RetrievalRequest, instance: &Instance) -> Result<ResolvedMedia, RetrievalError> {
        let video_id = extract_video_id(&request.reference).ok_or_else(|| {
            RetrievalError::InvalidReference(format!("no video id in {}", request.reference))
        })?;

        let url = self.api_url(instance, &video_id);
        info!("[{}] GET {}", self.name(), url);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| RetrievalError::from_request(&instance.base_url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::unreachable(&instance.base_url, format!("HTTP {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RetrievalError::from_request(&instance.base_url, e))?;
        debug!("[{}] {} answered {} bytes", self.name(), instance.base_url, body.len());

        let raw = match self.flavor {
            MirrorFlavor::Invidious { .. } => parse_invidious(&body, instance)?,
            MirrorFlavor::Piped => parse_piped(&body, instance)?,
        };

        let ctx = NormalizeContext {
            instance,
            request,
            audio_format: "",
        };
        raw.normalize(&ctx)
    }

    async fn fetch(&self, descriptor: &StreamDescriptor, destination: &Path) -> Result<PathBuf, RetrievalError> {
        self.fetcher.download(descriptor, destination).await
    }
}
