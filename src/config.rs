// Configuration: TOML file + environment overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::retriever::errors::RetrievalError;
use crate::retriever::media::is_supported_audio_format;
use crate::retriever::pool::InstancePool;

/// Client identifier sent with every outbound request
pub const DEFAULT_USER_AGENT: &str = concat!("video-retriever/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Where finished files land unless the caller says otherwise
    pub download_dir: PathBuf,
    pub network: NetworkConfig,
    pub media: MediaConfig,
    /// Providers in the order they are tried
    pub providers: Vec<ProviderConfig>,
}

/// Network configuration shared by all HTTP-based providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP or SOCKS5 proxy URL (e.g., "socks5h://127.0.0.1:1080")
    pub proxy: Option<String>,
    pub connect_timeout_secs: u64,
    /// Hard limit for one resolve call
    pub request_timeout_secs: u64,
    /// Longest allowed gap between two chunks of a download
    pub read_timeout_secs: u64,
    /// Hard limit for one stream download
    pub download_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            read_timeout_secs: 30,
            download_timeout_secs: 30 * 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// ffmpeg binary; detected when unset
    pub ffmpeg_path: Option<String>,
    /// Target format for audio-only output
    pub audio_format: String,
    /// Container used when muxing separate video and audio
    pub merge_container: String,
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            audio_format: "mp3".to_string(),
            merge_container: "mp4".to_string(),
            timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Local yt-dlp executable
    Native {
        #[serde(default)]
        binary: Option<String>,
        #[serde(default)]
        player_client: Option<String>,
        #[serde(default = "default_native_timeout")]
        timeout_secs: u64,
    },
    /// Invidious API mirrors
    Invidious {
        instances: Vec<String>,
        /// Ask instances to proxy media instead of handing out upstream URLs
        #[serde(default = "default_true")]
        proxy_media: bool,
    },
    /// Piped API mirrors
    Piped { instances: Vec<String> },
    /// cobalt-compatible aggregator
    Cobalt {
        endpoint: String,
        #[serde(default)]
        api_key: Option<String>,
    },
}

fn default_native_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            network: NetworkConfig::default(),
            media: MediaConfig::default(),
            providers: vec![
                ProviderConfig::Native {
                    binary: None,
                    player_client: Some("web".to_string()),
                    timeout_secs: default_native_timeout(),
                },
                ProviderConfig::Invidious {
                    instances: vec![
                        "https://inv.nadeko.net".to_string(),
                        "https://invidious.nerdvpn.de".to_string(),
                        "https://yewtu.be".to_string(),
                    ],
                    proxy_media: true,
                },
                ProviderConfig::Piped {
                    instances: vec![
                        "https://pipedapi.kavin.rocks".to_string(),
                        "https://pipedapi.adminforge.de".to_string(),
                    ],
                },
                ProviderConfig::Cobalt {
                    endpoint: "https://api.cobalt.tools".to_string(),
                    api_key: None,
                },
            ],
        }
    }
}

impl RetrieverConfig {
    /// `$VIDEO_RETRIEVER_CONFIG`, else `<config dir>/video-retriever/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(custom) = std::env::var("VIDEO_RETRIEVER_CONFIG") {
            return Some(PathBuf::from(custom));
        }
        dirs::config_dir().map(|d| d.join("video-retriever").join("config.toml"))
    }

    /// Load from the default location, applying environment overrides
    pub fn load() -> Result<Self, RetrievalError> {
        Self::load_from(Self::default_path().as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, RetrievalError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                debug!("Loading config from {}", p.display());
                let contents = std::fs::read_to_string(p)?;
                Self::from_toml_str(&contents)?
            }
            _ => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, RetrievalError> {
        toml::from_str(contents).map_err(|e| RetrievalError::Config(format!("Invalid config: {}", e)))
    }

    /// Apply `VIDEO_RETRIEVER_PROXY`, `YTDLP_PATH` and `FFMPEG_PATH`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(proxy) = lookup("VIDEO_RETRIEVER_PROXY").filter(|p| !p.is_empty()) {
            self.network.proxy = Some(proxy);
        }

        if let Some(path) = lookup("FFMPEG_PATH").filter(|p| !p.is_empty()) {
            self.media.ffmpeg_path = Some(path);
        }

        if let Some(path) = lookup("YTDLP_PATH").filter(|p| !p.is_empty()) {
            for provider in &mut self.providers {
                if let ProviderConfig::Native { binary, .. } = provider {
                    *binary = Some(path.clone());
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.providers.is_empty() {
            return Err(RetrievalError::Config("No providers configured".to_string()));
        }

        for provider in &self.providers {
            match provider {
                ProviderConfig::Invidious { instances, .. } | ProviderConfig::Piped { instances } => {
                    if instances.is_empty() {
                        return Err(RetrievalError::Config(
                            "Mirror providers need at least one instance".to_string(),
                        ));
                    }
                    InstancePool::new(instances)?;
                }
                ProviderConfig::Cobalt { endpoint, .. } => {
                    if endpoint.trim().is_empty() {
                        return Err(RetrievalError::Config("Cobalt endpoint is empty".to_string()));
                    }
                    InstancePool::new([endpoint])?;
                }
                ProviderConfig::Native { .. } => {}
            }
        }

        if !is_supported_audio_format(&self.media.audio_format) {
            return Err(RetrievalError::Config(format!(
                "media.audio_format '{}' is not supported",
                self.media.audio_format
            )));
        }

        let container = &self.media.merge_container;
        if container.is_empty() || !container.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RetrievalError::Config(format!(
                "media.merge_container '{}' is not a file extension",
                container
            )));
        }

        Ok(())
    }
}
