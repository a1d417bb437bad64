// Provider and media processing trait definitions

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::errors::RetrievalError;
use super::models::{ResolvedMedia, RetrievalRequest, StreamDescriptor};
use super::pool::{Instance, InstancePool};

/// One retrieval backend (native tool, mirror network, aggregator)
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Name of the provider (for logging)
    fn name(&self) -> &'static str;

    /// Instances to try, in priority order
    fn pool(&self) -> &InstancePool;

    /// Whether the instances are interchangeable network mirrors
    fn is_pooled(&self) -> bool {
        false
    }

    /// Whether this provider can handle the reference at all
    fn supports(&self, reference: &str) -> bool;

    /// Query one instance and normalize its answer into descriptors.
    ///
    /// The output kind is passed along for backends that choose the stream
    /// server-side.
    async fn resolve(&self, request: &RetrievalRequest, instance: &Instance) -> Result<ResolvedMedia, RetrievalError>;

    /// Stream the descriptor's bytes to `destination`
    async fn fetch(&self, descriptor: &StreamDescriptor, destination: &Path) -> Result<PathBuf, RetrievalError>;
}

/// External media engine used after download
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Combine video-only and audio-only files into one container
    async fn mux(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> Result<(), RetrievalError>;

    /// Re-encode to an audio-only format; removes `input_path` on success
    async fn transcode_to_audio(
        &self,
        input_path: &Path,
        output_path: &Path,
        format: &str,
    ) -> Result<(), RetrievalError>;
}
