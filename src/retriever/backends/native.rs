// Native provider - local `yt-dlp` binary in metadata-only mode
//
// yt-dlp resolves the page (signatures, player clients) and prints one JSON
// document; the bytes are then fetched by our own HttpFetcher so every
// provider shares the same download path.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{parse_entries, require_title, NormalizeContext, RawProviderResponse};
use crate::config::NetworkConfig;
use crate::retriever::errors::RetrievalError;
use crate::retriever::fetch::HttpFetcher;
use crate::retriever::models::{
    is_audio_container, ResolvedMedia, RetrievalRequest, StreamDescriptor, StreamKind,
};
use crate::retriever::pool::{Instance, InstancePool};
use crate::retriever::tools::{ToolManager, ToolType};
use crate::retriever::traits::ProviderAdapter;
use crate::retriever::utils::{is_youtube, run_output_with_timeout, validate_reference};

/// Top level of `yt-dlp --dump-json`
#[derive(Debug, Deserialize)]
pub struct YtDlpInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    /// Kept raw so one odd entry cannot sink the whole document
    #[serde(default)]
    pub formats: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    ext: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    abr: Option<f64>,
    #[serde(default)]
    tbr: Option<f64>,
    /// `true`, `false` or `"maybe"`
    #[serde(default)]
    has_drm: Value,
    #[serde(default)]
    http_headers: HashMap<String, String>,
}

impl YtDlpFormat {
    fn kind(&self) -> Option<StreamKind> {
        let present = |codec: &Option<String>| codec.as_deref().map(|c| c != "none");
        match (present(&self.vcodec), present(&self.acodec)) {
            (Some(true), Some(true)) => Some(StreamKind::Muxed),
            (Some(true), _) => Some(StreamKind::Video),
            (Some(false) | None, Some(true)) => Some(StreamKind::Audio),
            (Some(false), Some(false)) => None,
            // Codecs unknown (generic extractors): judge by extension
            (None, None) | (None, Some(false)) | (Some(false), None) => {
                if is_audio_container(&self.ext) {
                    Some(StreamKind::Audio)
                } else if self.vcodec.is_none() && self.acodec.is_none() {
                    Some(StreamKind::Muxed)
                } else {
                    None
                }
            }
        }
    }

    fn is_drm(&self) -> bool {
        match &self.has_drm {
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty(),
            _ => false,
        }
    }

    /// Plain progressive download; manifests and segmented protocols are skipped
    fn is_direct(&self) -> bool {
        match self.protocol.as_deref() {
            None => true,
            Some(p) => matches!(p, "http" | "https"),
        }
    }

    fn into_descriptor(self) -> Option<StreamDescriptor> {
        if self.is_drm() || !self.is_direct() {
            return None;
        }
        let kind = self.kind()?;
        let url = self.url.clone().filter(|u| !u.is_empty())?;

        let quality = match kind {
            StreamKind::Audio => self.abr.or(self.tbr).map(|b| b.round() as u32).unwrap_or(0),
            StreamKind::Video | StreamKind::Muxed => self.height.unwrap_or(0),
        };

        Some(
            StreamDescriptor::new(self.format_id, kind, self.ext, quality, url)
                .with_headers(self.http_headers),
        )
    }
}

/// Parse stdout of `yt-dlp --dump-json`
pub fn parse_dump_json(stdout: &[u8], instance: &Instance) -> Result<RawProviderResponse, RetrievalError> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)
        .map_err(|e| RetrievalError::invalid_response(&instance.base_url, format!("invalid JSON: {}", e)))?;
    Ok(RawProviderResponse::YtDlp(info))
}

pub(super) fn normalize(info: YtDlpInfo, ctx: &NormalizeContext<'_>) -> Result<ResolvedMedia, RetrievalError> {
    let instance = &ctx.instance.base_url;
    let formats = info
        .formats
        .ok_or_else(|| RetrievalError::invalid_response(instance, "no formats array"))?;
    let title = require_title(info.title, ctx.instance)?;

    let descriptors: Vec<StreamDescriptor> = parse_entries::<YtDlpFormat>(formats, "yt-dlp format")
        .into_iter()
        .filter_map(YtDlpFormat::into_descriptor)
        .collect();

    debug!(
        "yt-dlp resolved {} ({}) to {} usable streams",
        info.id.as_deref().unwrap_or("?"),
        title,
        descriptors.len()
    );

    Ok(ResolvedMedia {
        descriptors,
        title,
        author: info.uploader.or(info.channel),
    })
}

pub struct NativeAdapter {
    ytdlp_path: String,
    player_client: Option<String>,
    proxy: Option<String>,
    timeout: Duration,
    pool: InstancePool,
    fetcher: HttpFetcher,
}

impl NativeAdapter {
    pub fn new(
        binary: Option<String>,
        player_client: Option<String>,
        timeout: Duration,
        network: &NetworkConfig,
        fetcher: HttpFetcher,
    ) -> Self {
        let ytdlp_path = binary.unwrap_or_else(|| ToolManager::new().resolve_path(ToolType::YtDlp));
        Self {
            pool: InstancePool::single(Instance::new(format!("local:{}", ToolType::YtDlp.as_str()))),
            ytdlp_path,
            player_client,
            proxy: network.proxy.clone(),
            timeout,
            fetcher,
        }
    }

    fn build_args(&self, url: &str) -> Vec<String> {
        let mut args = vec![
            "--dump-json".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.timeout.as_secs().max(1).to_string(),
            "--retries".to_string(),
            "2".to_string(),
        ];

        if let (true, Some(client)) = (is_youtube(url), self.player_client.as_deref()) {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={}", client));
        }

        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl ProviderAdapter for NativeAdapter {
    fn name(&self) -> &'static str {
        "native"
    }

    fn pool(&self) -> &InstancePool {
        &self.pool
    }

    fn supports(&self, reference: &str) -> bool {
        validate_reference(reference).is_ok()
    }

    async fn resolve(&self, request: &RetrievalRequest, instance: &Instance) -> Result<ResolvedMedia, RetrievalError> {
        let args = self.build_args(&request.reference);
        info!("Resolving with {} {}", self.ytdlp_path, args.join(" "));

        let output = run_output_with_timeout(&self.ytdlp_path, args, self.timeout)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    RetrievalError::ToolNotFound(self.ytdlp_path.clone())
                } else {
                    RetrievalError::unreachable(&instance.base_url, e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RetrievalError::from_tool_stderr(&instance.base_url, &stderr));
        }

        let ctx = NormalizeContext {
            instance,
            request,
            audio_format: "",
        };
        parse_dump_json(&output.stdout, instance)?.normalize(&ctx)
    }

    async fn fetch(&self, descriptor: &StreamDescriptor, destination: &Path) -> Result<PathBuf, RetrievalError> {
        self.fetcher.download(descriptor, destination).await
    }
}
