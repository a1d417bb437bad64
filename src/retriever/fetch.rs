// Bounded-memory stream download shared by every provider

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::errors::RetrievalError;
use super::models::StreamDescriptor;
use crate::config::NetworkConfig;

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    read_timeout: Duration,
    overall_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, network: &NetworkConfig) -> Self {
        Self {
            client,
            read_timeout: network.read_timeout(),
            overall_timeout: network.download_timeout(),
        }
    }

    pub fn with_timeouts(mut self, read_timeout: Duration, overall_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.overall_timeout = overall_timeout;
        self
    }

    /// Download to `destination`. Any partial file is removed on failure.
    pub async fn download(
        &self,
        descriptor: &StreamDescriptor,
        destination: &Path,
    ) -> Result<PathBuf, RetrievalError> {
        let result = match timeout(self.overall_timeout, self.stream_to_file(descriptor, destination)).await {
            Ok(res) => res,
            Err(_) => Err(RetrievalError::DownloadFailed(format!(
                "stream {} exceeded {:?}",
                descriptor.id, self.overall_timeout
            ))),
        };

        match result {
            Ok(bytes) => {
                info!(
                    "Fetched stream {} ({} bytes) to {}",
                    descriptor.id,
                    bytes,
                    destination.display()
                );
                Ok(destination.to_path_buf())
            }
            Err(e) => {
                warn!("Fetch of stream {} failed: {}", descriptor.id, e);
                if let Err(rm) = tokio::fs::remove_file(destination).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial file {}: {}", destination.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to_file(
        &self,
        descriptor: &StreamDescriptor,
        destination: &Path,
    ) -> Result<u64, RetrievalError> {
        let mut request = self.client.get(&descriptor.source_url);
        for (key, value) in &descriptor.http_headers {
            request = request.header(key.as_str(), value.as_str());
        }

        debug!("GET {}", descriptor.source_url);
        let response = timeout(self.read_timeout, request.send())
            .await
            .map_err(|_| {
                RetrievalError::DownloadFailed(format!(
                    "no response within {:?}",
                    self.read_timeout
                ))
            })?
            .map_err(|e| RetrievalError::DownloadFailed(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::DownloadFailed(format!("HTTP {}", status)));
        }

        let mut file = File::create(destination)
            .await
            .map_err(|e| RetrievalError::DownloadFailed(format!("cannot create {}: {}", destination.display(), e)))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let next = timeout(self.read_timeout, stream.next()).await.map_err(|_| {
                RetrievalError::DownloadFailed(format!(
                    "stalled for {:?} after {} bytes",
                    self.read_timeout, written
                ))
            })?;

            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| RetrievalError::DownloadFailed(format!("read error: {}", e)))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| RetrievalError::DownloadFailed(format!("write error: {}", e)))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| RetrievalError::DownloadFailed(format!("flush error: {}", e)))?;

        Ok(written)
    }
}
