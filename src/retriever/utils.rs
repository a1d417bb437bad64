// Helper functions shared by providers and the orchestrator

use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use super::errors::RetrievalError;
use crate::config::NetworkConfig;

/// Hosts (and their subdomains) that serve YouTube video pages
const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "youtu.be", "youtube-nocookie.com"];

lazy_static::lazy_static! {
    static ref VIDEO_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    static ref VIDEO_PATH_RE: Regex = Regex::new(r"^/(?:shorts|embed|live|v)/([A-Za-z0-9_-]+)").unwrap();
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    #[error("Failed to collect output of {program}: {reason}")]
    Output { program: String, reason: String },
}

impl CommandError {
    /// The executable itself is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Run command with timeout, killing it on expiry
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    limit: Duration,
) -> Result<std::process::Output, CommandError> {
    debug!("Running: {} {}", program, args.join(" "));

    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let output_err = |reason: String| CommandError::Output {
        program: program.to_string(),
        reason,
    };

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| output_err("stdout not captured".to_string()))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| output_err("stderr not captured".to_string()))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await.map(|_| buf)
    });

    match timeout(limit, child.wait()).await {
        Ok(status_res) => {
            let status = status_res.map_err(|e| output_err(e.to_string()))?;
            let stdout = stdout_task
                .await
                .map_err(|e| output_err(e.to_string()))?
                .map_err(|e| output_err(e.to_string()))?;
            let stderr = stderr_task
                .await
                .map_err(|e| output_err(e.to_string()))?
                .map_err(|e| output_err(e.to_string()))?;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(CommandError::TimedOut {
                program: program.to_string(),
                secs: limit.as_secs(),
            })
        }
    }
}

/// HTTP client with connect timeout, client identifier and optional proxy.
///
/// No overall timeout on the client itself: resolve calls set one per
/// request, downloads are bounded by the fetcher.
pub fn build_http_client(network: &NetworkConfig) -> Result<reqwest::Client, RetrievalError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(network.connect_timeout())
        .user_agent(network.user_agent.clone());

    if let Some(proxy_url) = network.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| RetrievalError::Config(format!("Invalid proxy URL {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| RetrievalError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Accept only absolute http(s) URLs with a host
pub fn validate_reference(reference: &str) -> Result<Url, RetrievalError> {
    let parsed = Url::parse(reference.trim())
        .map_err(|e| RetrievalError::InvalidReference(format!("{}: {}", reference, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(RetrievalError::InvalidReference(format!(
            "{}: expected an http(s) URL",
            reference
        )));
    }

    Ok(parsed)
}

fn is_youtube_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    YOUTUBE_HOSTS
        .iter()
        .any(|h| host == *h || host.strip_suffix(h).map_or(false, |sub| sub.ends_with('.')))
}

/// Reference points at a YouTube host (judged on the parsed host, not the text)
pub fn is_youtube(reference: &str) -> bool {
    validate_reference(reference)
        .ok()
        .and_then(|url| url.host_str().map(is_youtube_host))
        .unwrap_or(false)
}

/// Video id from the common YouTube URL shapes
pub fn extract_video_id(reference: &str) -> Option<String> {
    let url = validate_reference(reference).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    if !is_youtube_host(&host) {
        return None;
    }

    let id = if host == "youtu.be" || host.ends_with(".youtu.be") {
        url.path_segments()?.next().map(str::to_string)
    } else if url.path() == "/watch" {
        url.query_pairs().find(|(k, _)| k == "v").map(|(_, v)| v.into_owned())
    } else {
        VIDEO_PATH_RE
            .captures(url.path())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    };

    id.filter(|id| VIDEO_ID_RE.is_match(id))
}

/// Keep letters, digits, space, '-' and '_'
pub fn sanitize_title(title: &str) -> String {
    let safe: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    safe.trim().to_string()
}

/// Cut to at most `max_bytes` bytes without splitting a character
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Remove files left behind by a failed attempt, ignoring ones already gone
pub async fn remove_quietly<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Could not remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_video_id() {
        assert_eq!(extract_video_id("https://youtu.be/abc123").as_deref(), Some("abc123"));
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://youtube.com/shorts/aBc_-9").as_deref(),
            Some("aBc_-9")
        );
        assert_eq!(
            extract_video_id("https://m.youtube.com/embed/abc123?start=5").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract_video_id("https://www.youtube-nocookie.com/embed/abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(extract_video_id("https://vimeo.com/12345"), None);
        assert_eq!(extract_video_id("https://www.youtube.com/feed/trending"), None);
        assert_eq!(extract_video_id("https://youtu.be/"), None);
    }

    #[test]
    fn test_video_id_requires_youtube_host() {
        assert_eq!(extract_video_id("https://example.com/watch?v=XYZ&from=youtube.com"), None);
        assert_eq!(extract_video_id("https://notyoutube.com/embed/abc123"), None);
        assert_eq!(extract_video_id("https://youtube.com.evil.example/v/abc123"), None);
        assert_eq!(extract_video_id("https://evil.example/youtu.be/abc123"), None);

        assert!(is_youtube("https://music.youtube.com/watch?v=abc123"));
        assert!(!is_youtube("https://example.com/?u=youtube.com"));
        assert!(!is_youtube("https://fakeyoutu.be/abc123"));
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("https://youtu.be/abc123").is_ok());
        assert!(matches!(
            validate_reference("not a url"),
            Err(RetrievalError::InvalidReference(_))
        ));
        assert!(matches!(
            validate_reference("file:///etc/passwd"),
            Err(RetrievalError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("  AC/DC: Live! (2024) "), "ACDC Live 2024");
        assert_eq!(sanitize_title("my_video - part 1"), "my_video - part 1");
        assert_eq!(sanitize_title("???"), "");
    }

    #[test]
    fn test_truncate_utf8_keeps_char_boundary() {
        assert_eq!(truncate_utf8("short", 200), "short");
        let cjk = "漢".repeat(10); // 30 bytes
        let cut = truncate_utf8(&cjk, 10);
        assert_eq!(cut, "漢漢漢");
        assert_eq!(cut.len(), 9);
    }

    #[tokio::test]
    async fn test_run_output_missing_program() {
        let err = run_output_with_timeout(
            "definitely-not-a-real-binary-4242",
            vec![],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_remove_quietly_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.part");
        tokio::fs::write(&present, b"x").await.unwrap();
        remove_quietly(&[present.clone(), dir.path().join("missing.part")]).await;
        assert!(!present.exists());
    }
}
