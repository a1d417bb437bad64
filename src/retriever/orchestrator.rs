// Orchestrator with instance failover
//
// Providers are tried in configured order, each provider's instances in pool
// order. Failover-class errors advance to the next instance; everything else
// aborts the request. Temporary files of a failed attempt never survive it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backends::{AggregatorAdapter, MirrorAdapter, MirrorFlavor, NativeAdapter};
use super::errors::RetrievalError;
use super::fetch::HttpFetcher;
use super::format_selector::FormatSelector;
use super::media::FfmpegProcessor;
use super::models::{
    OutputKind, RetrievalRequest, RetrievalResult, SelectionPlan, StreamDescriptor,
};
use super::pool::{Instance, InstanceHealth, InstancePool};
use super::traits::{MediaProcessor, ProviderAdapter};
use super::utils::{
    build_http_client, extract_video_id, remove_quietly, sanitize_title, truncate_utf8, validate_reference,
};
use crate::config::{MediaConfig, ProviderConfig, RetrieverConfig};

/// Where a single retrieval currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    Idle,
    ResolvingInstance,
    Resolved,
    Fetching,
    Muxing,
    Transcoding,
    Done,
    InstanceExhausted,
    Failed,
}

impl fmt::Display for RetrievalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ResolvingInstance => "resolving-instance",
            Self::Resolved => "resolved",
            Self::Fetching => "fetching",
            Self::Muxing => "muxing",
            Self::Transcoding => "transcoding",
            Self::Done => "done",
            Self::InstanceExhausted => "instance-exhausted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Request-scoped state machine; only used for logging transitions
struct Progress {
    state: RetrievalState,
    token: Uuid,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: RetrievalState::Idle,
            token: Uuid::new_v4(),
        }
    }

    fn advance(&mut self, next: RetrievalState) {
        debug!("[{}] {} -> {}", self.token, self.state, next);
        self.state = next;
    }

    /// Temp file for one stream of this request
    fn temp_path(&self, download_dir: &Path, descriptor: &StreamDescriptor) -> PathBuf {
        download_dir.join(format!(
            ".{}.{}.{}.part",
            self.token, descriptor.kind, descriptor.container
        ))
    }
}

pub struct Retriever {
    providers: Vec<Box<dyn ProviderAdapter>>,
    processor: Box<dyn MediaProcessor>,
    audio_format: String,
    merge_container: String,
}

impl Retriever {
    pub fn new(processor: Box<dyn MediaProcessor>, media: &MediaConfig) -> Self {
        Self {
            providers: Vec::new(),
            processor,
            audio_format: media.audio_format.to_ascii_lowercase(),
            merge_container: media.merge_container.to_ascii_lowercase(),
        }
    }

    pub fn add_provider(&mut self, provider: Box<dyn ProviderAdapter>) {
        self.providers.push(provider);
    }

    /// Build every configured provider plus an ffmpeg processor
    pub fn from_config(config: &RetrieverConfig) -> Result<Self, RetrievalError> {
        config.validate()?;

        let network = &config.network;
        let client = build_http_client(network)?;
        let mut retriever = Self::new(Box::new(FfmpegProcessor::new(&config.media)), &config.media);

        for provider in &config.providers {
            let adapter: Box<dyn ProviderAdapter> = match provider {
                ProviderConfig::Native {
                    binary,
                    player_client,
                    timeout_secs,
                } => Box::new(NativeAdapter::new(
                    binary.clone(),
                    player_client.clone(),
                    Duration::from_secs(*timeout_secs),
                    network,
                    HttpFetcher::new(client.clone(), network),
                )),
                ProviderConfig::Invidious { instances, proxy_media } => Box::new(MirrorAdapter::new(
                    MirrorFlavor::Invidious {
                        proxy_media: *proxy_media,
                    },
                    InstancePool::new(instances)?,
                    client.clone(),
                    network,
                )),
                ProviderConfig::Piped { instances } => Box::new(MirrorAdapter::new(
                    MirrorFlavor::Piped,
                    InstancePool::new(instances)?,
                    client.clone(),
                    network,
                )),
                ProviderConfig::Cobalt { endpoint, api_key } => Box::new(AggregatorAdapter::new(
                    endpoint,
                    api_key.clone(),
                    &config.media.audio_format,
                    client.clone(),
                    network,
                )?),
            };
            debug!("Registered provider {} ({} instance(s))", adapter.name(), adapter.pool().len());
            retriever.add_provider(adapter);
        }

        Ok(retriever)
    }

    pub fn providers(&self) -> impl Iterator<Item = &dyn ProviderAdapter> {
        self.providers.iter().map(|p| p.as_ref())
    }

    /// Resolve, fetch and post-process one reference into `download_dir`
    pub async fn retrieve(
        &self,
        request: &RetrievalRequest,
        download_dir: &Path,
    ) -> Result<RetrievalResult, RetrievalError> {
        let mut progress = Progress::new();
        info!(
            "[{}] Retrieving {} as {}",
            progress.token, request.reference, request.output_kind
        );

        if let Err(e) = validate_reference(&request.reference) {
            progress.advance(RetrievalState::Failed);
            return Err(e);
        }

        let candidates: Vec<&dyn ProviderAdapter> = self
            .providers()
            .filter(|p| {
                let ok = p.supports(&request.reference);
                if !ok {
                    debug!("Provider {} does not handle {}", p.name(), request.reference);
                }
                ok
            })
            .collect();

        if candidates.is_empty() {
            progress.advance(RetrievalState::Failed);
            return Err(RetrievalError::InvalidReference(format!(
                "no configured provider handles {}",
                request.reference
            )));
        }

        tokio::fs::create_dir_all(download_dir).await?;

        let total: usize = candidates.iter().map(|p| p.pool().len()).sum();
        let surface_directly = total == 1 && !candidates[0].is_pooled();

        let mut observed: Vec<Instance> = Vec::with_capacity(total);
        let mut last_error: Option<RetrievalError> = None;

        for provider in &candidates {
            for instance in provider.pool().iter() {
                let mut instance = instance.clone();
                progress.advance(RetrievalState::ResolvingInstance);
                debug!("[{}] Trying {} instance {}", progress.token, provider.name(), instance.base_url);

                match self.attempt(*provider, &instance, request, download_dir, &mut progress).await {
                    Ok(result) => {
                        progress.advance(RetrievalState::Done);
                        info!(
                            "[{}] Done via {} {}: {}",
                            progress.token,
                            provider.name(),
                            instance.base_url,
                            result.local_path.display()
                        );
                        instance.health = InstanceHealth::Healthy;
                        observed.push(instance);
                        log_health(&progress, &observed);
                        return Ok(result);
                    }
                    Err(e) if e.is_failover() => {
                        warn!("[{}] {} {} failed: {}", progress.token, provider.name(), instance.base_url, e);
                        instance.health = InstanceHealth::Failed;
                        observed.push(instance);
                        last_error = Some(e);
                    }
                    Err(e) => {
                        progress.advance(RetrievalState::Failed);
                        warn!("[{}] Aborting: {}", progress.token, e);
                        return Err(e);
                    }
                }
            }
        }

        progress.advance(RetrievalState::InstanceExhausted);
        log_health(&progress, &observed);
        progress.advance(RetrievalState::Failed);

        let last = last_error
            .unwrap_or_else(|| RetrievalError::NoSuitableStream("no instance was tried".to_string()));

        if surface_directly {
            return Err(last);
        }
        Err(RetrievalError::AllInstancesFailed {
            attempts: observed.len(),
            last: Box::new(last),
        })
    }

    /// One instance, start to finish
    async fn attempt(
        &self,
        provider: &dyn ProviderAdapter,
        instance: &Instance,
        request: &RetrievalRequest,
        download_dir: &Path,
        progress: &mut Progress,
    ) -> Result<RetrievalResult, RetrievalError> {
        let media = provider.resolve(request, instance).await?;
        progress.advance(RetrievalState::Resolved);
        info!(
            "[{}] {} resolved '{}' with {} stream(s)",
            provider.name(),
            instance.base_url,
            media.title,
            media.descriptors.len()
        );

        let plan = FormatSelector::select(&media.descriptors, request.output_kind)?;
        let stem = output_stem(&media.title, &request.reference);

        progress.advance(RetrievalState::Fetching);
        let mut temps: Vec<PathBuf> = Vec::new();

        let local_path = match &plan {
            SelectionPlan::Pair { video, audio } => {
                let video_path = fetch_temp(provider, video, download_dir, progress, &mut temps).await?;
                let audio_path = fetch_temp(provider, audio, download_dir, progress, &mut temps).await?;

                progress.advance(RetrievalState::Muxing);
                let output = download_dir.join(format!("{}.{}", stem, self.merge_container));
                let muxed = self.processor.mux(&video_path, &audio_path, &output).await;
                remove_quietly(&temps).await;
                if let Err(e) = muxed {
                    remove_quietly(&[&output]).await;
                    return Err(e);
                }
                output
            }
            SelectionPlan::Single(descriptor) => {
                let path = fetch_temp(provider, descriptor, download_dir, progress, &mut temps).await?;

                if request.output_kind == OutputKind::Audio && !descriptor.is_audio_only_file() {
                    progress.advance(RetrievalState::Transcoding);
                    let output = download_dir.join(format!("{}.{}", stem, self.audio_format));
                    if let Err(e) = self.processor.transcode_to_audio(&path, &output, &self.audio_format).await {
                        remove_quietly(&temps).await;
                        remove_quietly(&[&output]).await;
                        return Err(e);
                    }
                    output
                } else {
                    let output = download_dir.join(format!("{}.{}", stem, descriptor.container));
                    if let Err(e) = tokio::fs::rename(&path, &output).await {
                        remove_quietly(&temps).await;
                        return Err(e.into());
                    }
                    output
                }
            }
        };

        Ok(RetrievalResult {
            local_path,
            display_title: media.title,
            display_author: media.author,
        })
    }
}

fn log_health(progress: &Progress, observed: &[Instance]) {
    debug!(
        "[{}] Instance health: {:?}",
        progress.token,
        observed
            .iter()
            .map(|i| (i.base_url.as_str(), i.health))
            .collect::<Vec<_>>()
    );
}

/// Fetch into a fresh temp path; on failure every temp of the attempt goes
async fn fetch_temp(
    provider: &dyn ProviderAdapter,
    descriptor: &StreamDescriptor,
    download_dir: &Path,
    progress: &Progress,
    temps: &mut Vec<PathBuf>,
) -> Result<PathBuf, RetrievalError> {
    let temp = progress.temp_path(download_dir, descriptor);
    temps.push(temp.clone());
    debug!(
        "[{}] Fetching {} stream {} ({}, {})",
        progress.token, descriptor.kind, descriptor.id, descriptor.container, descriptor.quality
    );

    match provider.fetch(descriptor, &temp).await {
        Ok(path) => {
            if path != temp {
                temps.push(path.clone());
            }
            Ok(path)
        }
        Err(e) => {
            remove_quietly(temps.as_slice()).await;
            Err(e)
        }
    }
}

/// Byte budget for a file name stem, leaving room for the extension under
/// the common 255-byte limit
const MAX_STEM_BYTES: usize = 200;

/// File name without extension: sanitized title, else the video id
fn output_stem(title: &str, reference: &str) -> String {
    let safe = sanitize_title(title);
    let safe = truncate_utf8(&safe, MAX_STEM_BYTES).trim_end();
    if !safe.is_empty() {
        return safe.to_string();
    }
    extract_video_id(reference)
        .map(|id| sanitize_title(&id))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "video".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::retriever::models::{ResolvedMedia, StreamKind};
    use crate::retriever::test_support::{bind, list_dir, serve, spawn_server};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    enum Behavior {
        Unreachable,
        Streams(Vec<StreamDescriptor>),
    }

    struct FakeProvider {
        name: &'static str,
        pool: InstancePool,
        pooled: bool,
        youtube_only: bool,
        behaviors: HashMap<String, Behavior>,
        failing_fetch: HashSet<String>,
        title: String,
        contacted: Arc<Mutex<Vec<String>>>,
    }

    impl FakeProvider {
        fn pooled(bases: &[&str]) -> Self {
            Self {
                name: "fake",
                pool: InstancePool::new(bases).unwrap(),
                pooled: true,
                youtube_only: false,
                behaviors: HashMap::new(),
                failing_fetch: HashSet::new(),
                title: "Fake: Title!".to_string(),
                contacted: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn on(mut self, base: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(base.to_string(), behavior);
            self
        }

        fn failing_fetch(mut self, id: &str) -> Self {
            self.failing_fetch.insert(id.to_string());
            self
        }

        fn titled(mut self, title: &str) -> Self {
            self.title = title.to_string();
            self
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn pool(&self) -> &InstancePool {
            &self.pool
        }

        fn is_pooled(&self) -> bool {
            self.pooled
        }

        fn supports(&self, reference: &str) -> bool {
            !self.youtube_only || extract_video_id(reference).is_some()
        }

        async fn resolve(&self, _request: &RetrievalRequest, instance: &Instance) -> Result<ResolvedMedia, RetrievalError> {
            self.contacted.lock().unwrap().push(instance.base_url.clone());
            match self.behaviors.get(&instance.base_url) {
                Some(Behavior::Streams(descriptors)) => Ok(ResolvedMedia {
                    descriptors: descriptors.clone(),
                    title: self.title.clone(),
                    author: Some("Author".to_string()),
                }),
                Some(Behavior::Unreachable) | None => {
                    Err(RetrievalError::unreachable(&instance.base_url, "HTTP 503"))
                }
            }
        }

        async fn fetch(&self, descriptor: &StreamDescriptor, destination: &Path) -> Result<PathBuf, RetrievalError> {
            if self.failing_fetch.contains(&descriptor.id) {
                return Err(RetrievalError::DownloadFailed(format!("stream {} reset", descriptor.id)));
            }
            tokio::fs::write(destination, descriptor.id.as_bytes()).await?;
            Ok(destination.to_path_buf())
        }
    }

    #[derive(Default, Clone)]
    struct FakeProcessor {
        calls: Arc<Mutex<Vec<String>>>,
        fail_mux: bool,
        fail_transcode: bool,
    }

    #[async_trait]
    impl MediaProcessor for FakeProcessor {
        async fn mux(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> Result<(), RetrievalError> {
            self.calls.lock().unwrap().push("mux".to_string());
            if self.fail_mux {
                // ffmpeg may leave a truncated output behind
                tokio::fs::write(output_path, b"partial").await?;
                return Err(RetrievalError::MuxFailed("ffmpeg exited with 1".to_string()));
            }
            let mut bytes = tokio::fs::read(video_path).await?;
            bytes.extend(tokio::fs::read(audio_path).await?);
            tokio::fs::write(output_path, bytes).await?;
            Ok(())
        }

        async fn transcode_to_audio(
            &self,
            input_path: &Path,
            output_path: &Path,
            format: &str,
        ) -> Result<(), RetrievalError> {
            self.calls.lock().unwrap().push(format!("transcode:{}", format));
            if self.fail_transcode {
                tokio::fs::write(output_path, b"partial").await?;
                return Err(RetrievalError::TranscodeFailed("ffmpeg exited with 1".to_string()));
            }
            let bytes = tokio::fs::read(input_path).await?;
            tokio::fs::write(output_path, bytes).await?;
            tokio::fs::remove_file(input_path).await?;
            Ok(())
        }
    }

    fn muxed(id: &str, quality: u32) -> StreamDescriptor {
        StreamDescriptor::new(id, StreamKind::Muxed, "mp4", quality, format!("https://media/{}", id))
    }

    fn video(id: &str, quality: u32) -> StreamDescriptor {
        StreamDescriptor::new(id, StreamKind::Video, "webm", quality, format!("https://media/{}", id))
    }

    fn audio(id: &str, container: &str, quality: u32) -> StreamDescriptor {
        StreamDescriptor::new(id, StreamKind::Audio, container, quality, format!("https://media/{}", id))
    }

    fn retriever(processor: FakeProcessor, providers: Vec<FakeProvider>) -> Retriever {
        let mut r = Retriever::new(Box::new(processor), &MediaConfig::default());
        for p in providers {
            r.add_provider(Box::new(p));
        }
        r
    }

    fn video_request() -> RetrievalRequest {
        RetrievalRequest::new("https://youtu.be/abc123", OutputKind::Video)
    }

    #[tokio::test]
    async fn test_failover_stops_at_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::pooled(&["https://a", "https://b", "https://c", "https://d"])
            .on("https://a", Behavior::Unreachable)
            .on("https://b", Behavior::Unreachable)
            .on("https://c", Behavior::Streams(vec![muxed("c18", 360)]))
            .on("https://d", Behavior::Streams(vec![muxed("d22", 720)]));
        let contacted = provider.contacted.clone();

        let result = retriever(FakeProcessor::default(), vec![provider])
            .retrieve(&video_request(), dir.path())
            .await
            .unwrap();

        assert_eq!(*contacted.lock().unwrap(), vec!["https://a", "https://b", "https://c"]);
        assert_eq!(result.local_path, dir.path().join("Fake Title.mp4"));
        assert_eq!(result.display_title, "Fake: Title!");
        assert_eq!(result.display_author.as_deref(), Some("Author"));
        assert_eq!(std::fs::read_to_string(&result.local_path).unwrap(), "c18");
        assert_eq!(list_dir(dir.path()), vec!["Fake Title.mp4"]);
    }

    #[tokio::test]
    async fn test_all_instances_failing_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::pooled(&["https://a", "https://b"])
            .on("https://a", Behavior::Unreachable)
            .on("https://b", Behavior::Streams(vec![video("v1", 1080), audio("a1", "m4a", 128)]))
            .failing_fetch("a1");

        let err = retriever(FakeProcessor::default(), vec![provider])
            .retrieve(&video_request(), dir.path())
            .await
            .unwrap_err();

        match err {
            RetrievalError::AllInstancesFailed { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, RetrievalError::DownloadFailed(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(list_dir(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_pair_is_muxed_and_inputs_removed() {
        let dir = tempfile::tempdir().unwrap();
        let processor = FakeProcessor::default();
        let calls = processor.calls.clone();
        let provider = FakeProvider::pooled(&["https://a"])
            .on("https://a", Behavior::Streams(vec![video("v720", 720), audio("a128", "m4a", 128)]));

        let result = retriever(processor, vec![provider])
            .retrieve(&video_request(), dir.path())
            .await
            .unwrap();

        assert_eq!(result.local_path, dir.path().join("Fake Title.mp4"));
        assert_eq!(std::fs::read_to_string(&result.local_path).unwrap(), "v720a128");
        assert_eq!(*calls.lock().unwrap(), vec!["mux"]);
        assert_eq!(list_dir(dir.path()), vec!["Fake Title.mp4"]);
    }

    #[tokio::test]
    async fn test_audio_from_muxed_only_is_transcoded() {
        let dir = tempfile::tempdir().unwrap();
        let processor = FakeProcessor::default();
        let calls = processor.calls.clone();
        let provider = FakeProvider::pooled(&["https://a"])
            .on("https://a", Behavior::Streams(vec![muxed("m360", 360), muxed("m720", 720)]));
        let request = RetrievalRequest::new("https://youtu.be/abc123", OutputKind::Audio);

        let result = retriever(processor, vec![provider])
            .retrieve(&request, dir.path())
            .await
            .unwrap();

        assert_eq!(result.local_path, dir.path().join("Fake Title.mp3"));
        assert_eq!(std::fs::read_to_string(&result.local_path).unwrap(), "m720");
        assert_eq!(*calls.lock().unwrap(), vec!["transcode:mp3"]);
        assert_eq!(list_dir(dir.path()), vec!["Fake Title.mp3"]);
    }

    #[tokio::test]
    async fn test_audio_only_container_skips_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let processor = FakeProcessor::default();
        let calls = processor.calls.clone();
        let provider = FakeProvider::pooled(&["https://a"])
            .on("https://a", Behavior::Streams(vec![muxed("m360", 360), audio("a140", "m4a", 128)]));
        let request = RetrievalRequest::new("https://youtu.be/abc123", OutputKind::Audio);

        let result = retriever(processor, vec![provider])
            .retrieve(&request, dir.path())
            .await
            .unwrap();

        assert_eq!(result.local_path, dir.path().join("Fake Title.m4a"));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_suitable_stream_advances() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::pooled(&["https://a", "https://b"])
            .on("https://a", Behavior::Streams(vec![audio("a1", "m4a", 128)]))
            .on("https://b", Behavior::Streams(vec![muxed("b18", 360)]));
        let contacted = provider.contacted.clone();

        let result = retriever(FakeProcessor::default(), vec![provider])
            .retrieve(&video_request(), dir.path())
            .await
            .unwrap();

        assert_eq!(contacted.lock().unwrap().len(), 2);
        assert_eq!(std::fs::read_to_string(result.local_path).unwrap(), "b18");
    }

    #[tokio::test]
    async fn test_mux_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let processor = FakeProcessor {
            fail_mux: true,
            ..FakeProcessor::default()
        };
        let provider = FakeProvider::pooled(&["https://a", "https://b"])
            .on("https://a", Behavior::Streams(vec![video("v1", 1080), audio("a1", "webm", 160)]))
            .on("https://b", Behavior::Streams(vec![muxed("b18", 360)]));
        let contacted = provider.contacted.clone();

        let err = retriever(processor, vec![provider])
            .retrieve(&video_request(), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, RetrievalError::MuxFailed(_)));
        assert_eq!(*contacted.lock().unwrap(), vec!["https://a"]);
        assert!(list_dir(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_transcode_failure_is_fatal_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let processor = FakeProcessor {
            fail_transcode: true,
            ..FakeProcessor::default()
        };
        let provider = FakeProvider::pooled(&["https://a", "https://b"])
            .on("https://a", Behavior::Streams(vec![muxed("m360", 360)]))
            .on("https://b", Behavior::Streams(vec![audio("b140", "m4a", 128)]));
        let contacted = provider.contacted.clone();
        let request = RetrievalRequest::new("https://youtu.be/abc123", OutputKind::Audio);

        let err = retriever(processor, vec![provider])
            .retrieve(&request, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, RetrievalError::TranscodeFailed(_)));
        assert!(!err.is_failover());
        assert_eq!(*contacted.lock().unwrap(), vec!["https://a"]);
        assert!(list_dir(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_long_multibyte_title_fits_file_name_limit() {
        let dir = tempfile::tempdir().unwrap();
        let title = "漢".repeat(104);
        let provider = FakeProvider::pooled(&["https://a"])
            .on("https://a", Behavior::Streams(vec![muxed("m720", 720)]))
            .titled(&title);

        let result = retriever(FakeProcessor::default(), vec![provider])
            .retrieve(&video_request(), dir.path())
            .await
            .unwrap();

        let name = result.local_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.len() <= 255, "{} bytes", name.len());
        assert!(name.ends_with(".mp4"));
        assert!(name.starts_with("漢漢漢"));
        assert_eq!(result.display_title, title);
        assert_eq!(std::fs::read_to_string(&result.local_path).unwrap(), "m720");
    }

    #[tokio::test]
    async fn test_invalid_reference_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FakeProvider::pooled(&["https://a"]);
        let contacted = provider.contacted.clone();
        let r = retriever(FakeProcessor::default(), vec![provider]);

        let err = r
            .retrieve(&RetrievalRequest::new("not a url", OutputKind::Video), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidReference(_)));
        assert!(contacted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_reference_skips_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut mirrors = FakeProvider::pooled(&["https://a"]);
        mirrors.youtube_only = true;
        let contacted = mirrors.contacted.clone();

        let err = retriever(FakeProcessor::default(), vec![mirrors])
            .retrieve(&RetrievalRequest::new("https://vimeo.com/1", OutputKind::Video), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, RetrievalError::InvalidReference(_)));
        assert!(contacted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_non_pooled_error_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut native = FakeProvider::pooled(&["https://local"]).on("https://local", Behavior::Unreachable);
        native.pooled = false;

        let err = retriever(FakeProcessor::default(), vec![native])
            .retrieve(&video_request(), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, RetrievalError::InstanceUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_providers_tried_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FakeProvider::pooled(&["https://local"]).on("https://local", Behavior::Unreachable);
        first.pooled = false;
        first.name = "first";
        let second = FakeProvider::pooled(&["https://m1"]).on("https://m1", Behavior::Streams(vec![muxed("m", 480)]));
        let first_contacted = first.contacted.clone();

        let result = retriever(FakeProcessor::default(), vec![first, second])
            .retrieve(&video_request(), dir.path())
            .await
            .unwrap();

        assert_eq!(first_contacted.lock().unwrap().len(), 1);
        assert_eq!(std::fs::read_to_string(result.local_path).unwrap(), "m");
    }

    #[test]
    fn test_output_stem_fallbacks() {
        assert_eq!(output_stem("A/B: c", "https://youtu.be/abc123"), "AB c");
        assert_eq!(output_stem("???", "https://youtu.be/abc123"), "abc123");
        assert_eq!(output_stem("???", "https://vimeo.com/1"), "video");

        let stem = output_stem(&"日本語 ".repeat(60), "https://youtu.be/abc123");
        assert!(stem.len() <= MAX_STEM_BYTES);
        assert!(!stem.ends_with(' '));
    }

    #[tokio::test]
    async fn test_mirror_scenario_skips_dead_instance() {
        use axum::extract::Path as UrlPath;
        use axum::http::StatusCode;
        use axum::routing::get;
        use axum::{Json, Router};
        use serde_json::json;

        let a = spawn_server(Router::new().route(
            "/api/v1/videos/:id",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        ))
        .await;

        let (listener, b) = bind().await;
        let b_base = b.clone();
        serve(
            listener,
            Router::new()
                .route(
                    "/api/v1/videos/:id",
                    get(move |UrlPath(id): UrlPath<String>| {
                        let base = b_base.clone();
                        async move {
                            assert_eq!(id, "abc123");
                            Json(json!({
                                "title": "Scenario Title",
                                "author": "B",
                                "formatStreams": [
                                    {"url": format!("{}/media/480", base), "itag": "480", "type": "video/mp4",
                                     "container": "mp4", "resolution": "480p"},
                                    {"url": format!("{}/media/1080", base), "itag": "1080", "type": "video/mp4",
                                     "container": "mp4", "resolution": "1080p"}
                                ],
                                "adaptiveFormats": []
                            }))
                        }
                    }),
                )
                .route(
                    "/media/:q",
                    get(|UrlPath(q): UrlPath<String>| async move { format!("stream-{}", q) }),
                ),
        );

        let c_hits = Arc::new(AtomicUsize::new(0));
        let hits = c_hits.clone();
        let c = spawn_server(Router::new().route(
            "/api/v1/videos/:id",
            get(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async { (StatusCode::OK, "{}") }
            }),
        ))
        .await;

        let network = NetworkConfig {
            request_timeout_secs: 5,
            ..NetworkConfig::default()
        };
        let mirror = MirrorAdapter::new(
            MirrorFlavor::Invidious { proxy_media: true },
            InstancePool::new([a, b, c]).unwrap(),
            reqwest::Client::new(),
            &network,
        );

        let mut r = Retriever::new(Box::new(FakeProcessor::default()), &MediaConfig::default());
        r.add_provider(Box::new(mirror));

        let dir = tempfile::tempdir().unwrap();
        let result = r.retrieve(&video_request(), dir.path()).await.unwrap();

        assert_eq!(result.local_path, dir.path().join("Scenario Title.mp4"));
        assert_eq!(result.display_title, "Scenario Title");
        assert_eq!(std::fs::read_to_string(&result.local_path).unwrap(), "stream-1080");
        assert_eq!(c_hits.load(Ordering::SeqCst), 0);
        assert_eq!(list_dir(dir.path()), vec!["Scenario Title.mp4"]);
    }
}
