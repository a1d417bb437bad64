// Aggregator provider - one hosted cobalt-compatible endpoint
//
// The service picks the stream server-side, so a successful answer always
// normalizes to a single descriptor of unknown quality.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{NormalizeContext, RawProviderResponse};
use crate::config::NetworkConfig;
use crate::retriever::errors::RetrievalError;
use crate::retriever::fetch::HttpFetcher;
use crate::retriever::models::{
    is_audio_container, OutputKind, ResolvedMedia, RetrievalRequest, StreamDescriptor, StreamKind,
};
use crate::retriever::pool::{Instance, InstancePool};
use crate::retriever::traits::ProviderAdapter;
use crate::retriever::utils::{extract_video_id, validate_reference};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CobaltRequest<'a> {
    url: &'a str,
    download_mode: &'static str,
    audio_format: &'a str,
    video_quality: &'static str,
    filename_style: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CobaltResponse {
    Tunnel {
        url: String,
        #[serde(default)]
        filename: Option<String>,
    },
    Redirect {
        url: String,
        #[serde(default)]
        filename: Option<String>,
    },
    Picker {
        #[serde(default)]
        audio: Option<String>,
        #[serde(default, rename = "audioFilename")]
        audio_filename: Option<String>,
        #[serde(default)]
        picker: Vec<PickerItem>,
    },
    Error {
        error: CobaltErrorBody,
    },
    /// Any status this client does not handle (e.g. `local-processing`)
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct PickerItem {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct CobaltErrorBody {
    pub code: String,
}

pub fn parse_response(body: &str, instance: &Instance) -> Result<RawProviderResponse, RetrievalError> {
    serde_json::from_str::<CobaltResponse>(body)
        .map(RawProviderResponse::Cobalt)
        .map_err(|e| RetrievalError::invalid_response(&instance.base_url, format!("invalid JSON: {}", e)))
}

pub(super) fn normalize(response: CobaltResponse, ctx: &NormalizeContext<'_>) -> Result<ResolvedMedia, RetrievalError> {
    let instance = &ctx.instance.base_url;
    let wants_audio = ctx.request.output_kind == OutputKind::Audio;

    let (url, filename, audio_track) = match response {
        CobaltResponse::Tunnel { url, filename } | CobaltResponse::Redirect { url, filename } => {
            (url, filename, wants_audio)
        }
        CobaltResponse::Picker {
            audio,
            audio_filename,
            picker,
        } => match (wants_audio, audio) {
            (true, Some(audio_url)) => (audio_url, audio_filename, true),
            _ => {
                let item = picker
                    .iter()
                    .find(|p| p.kind.as_deref() == Some("video"))
                    .or_else(|| picker.first())
                    .ok_or_else(|| RetrievalError::invalid_response(instance, "empty picker"))?;
                (item.url.clone(), None, false)
            }
        },
        CobaltResponse::Error { error } => {
            return Err(RetrievalError::unreachable(instance, error.code));
        }
        CobaltResponse::Unsupported => {
            return Err(RetrievalError::invalid_response(instance, "unsupported response status"));
        }
    };

    if url.is_empty() {
        return Err(RetrievalError::invalid_response(instance, "empty media URL"));
    }

    let (stem, ext) = split_filename(filename.as_deref());
    let title = stem
        .or_else(|| extract_video_id(&ctx.request.reference))
        .ok_or_else(|| RetrievalError::invalid_response(instance, "no filename or video id for title"))?;

    let container = ext.unwrap_or_else(|| {
        if audio_track {
            ctx.audio_format.to_string()
        } else {
            "mp4".to_string()
        }
    });
    let kind = if audio_track || is_audio_container(&container) {
        StreamKind::Audio
    } else {
        StreamKind::Muxed
    };

    Ok(ResolvedMedia {
        descriptors: vec![StreamDescriptor::new("cobalt", kind, container, 0, url)],
        title,
        author: None,
    })
}

/// "My Video (1080p, h264).mp4" -> ("My Video (1080p, h264)", "mp4")
fn split_filename(filename: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(name) = filename.map(str::trim).filter(|n| !n.is_empty()) else {
        return (None, None);
    };
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 => {
            (Some(stem.to_string()), Some(ext.to_ascii_lowercase()))
        }
        _ => (Some(name.to_string()), None),
    }
}

pub struct AggregatorAdapter {
    pool: InstancePool,
    api_key: Option<String>,
    audio_format: String,
    client: reqwest::Client,
    request_timeout: Duration,
    fetcher: HttpFetcher,
}

impl AggregatorAdapter {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        audio_format: &str,
        client: reqwest::Client,
        network: &NetworkConfig,
    ) -> Result<Self, RetrievalError> {
        Ok(Self {
            pool: InstancePool::new([endpoint])?,
            api_key: api_key.filter(|k| !k.is_empty()),
            audio_format: audio_format.to_string(),
            fetcher: HttpFetcher::new(client.clone(), network),
            client,
            request_timeout: network.request_timeout(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for AggregatorAdapter {
    fn name(&self) -> &'static str {
        "cobalt"
    }

    fn pool(&self) -> &InstancePool {
        &self.pool
    }

    fn supports(&self, reference: &str) -> bool {
        validate_reference(reference).is_ok()
    }

    async fn resolve(&self, request: &RetrievalRequest, instance: &Instance) -> Result<ResolvedMedia, RetrievalError> {
        let body = CobaltRequest {
            url: &request.reference,
            download_mode: match request.output_kind {
                OutputKind::Audio => "audio",
                OutputKind::Video => "auto",
            },
            audio_format: &self.audio_format,
            video_quality: "max",
            filename_style: "basic",
        };

        let url = instance.endpoint("/");
        info!("[cobalt] POST {} ({})", url, body.download_mode);

        let mut builder = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header(AUTHORIZATION, format!("Api-Key {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RetrievalError::from_request(&instance.base_url, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RetrievalError::from_request(&instance.base_url, e))?;

        if !status.is_success() {
            // Error bodies still carry a code worth reporting
            let reason = match serde_json::from_str::<CobaltResponse>(&text) {
                Ok(CobaltResponse::Error { error }) => format!("HTTP {}: {}", status, error.code),
                _ => format!("HTTP {}", status),
            };
            return Err(RetrievalError::unreachable(&instance.base_url, reason));
        }
        debug!("[cobalt] answered {} bytes", text.len());

        let ctx = NormalizeContext {
            instance,
            request,
            audio_format: &self.audio_format,
        };
        parse_response(&text, instance)?.normalize(&ctx)
    }

    async fn fetch(&self, descriptor: &StreamDescriptor, destination: &Path) -> Result<PathBuf, RetrievalError> {
        self.fetcher.download(descriptor, destination).await
    }
}
