// ffmpeg-backed muxing and audio transcoding

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::errors::RetrievalError;
use super::tools::{ToolManager, ToolType};
use super::traits::MediaProcessor;
use super::utils::{remove_quietly, run_output_with_timeout};
use crate::config::MediaConfig;

pub struct FfmpegProcessor {
    ffmpeg_path: String,
    timeout: Duration,
}

impl FfmpegProcessor {
    pub fn new(config: &MediaConfig) -> Self {
        let ffmpeg_path = config
            .ffmpeg_path
            .clone()
            .unwrap_or_else(|| ToolManager::new().resolve_path(ToolType::Ffmpeg));

        Self {
            ffmpeg_path,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_ffmpeg_path(mut self, path: &str) -> Self {
        self.ffmpeg_path = path.to_string();
        self
    }

    fn base_args() -> Vec<String> {
        ["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn mux_args(video_path: &Path, audio_path: &Path, output_path: &Path) -> Vec<String> {
        let mut args = Self::base_args();
        args.extend([
            "-i".to_string(),
            video_path.to_string_lossy().to_string(),
            "-i".to_string(),
            audio_path.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            // Video is copied as-is, audio re-encoded for container compatibility
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
        ]);

        let is_mp4 = output_path
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("mp4"));
        if is_mp4 {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }

        args.push(output_path.to_string_lossy().to_string());
        args
    }

    fn transcode_args(
        input_path: &Path,
        output_path: &Path,
        format: &str,
    ) -> Result<Vec<String>, RetrievalError> {
        let (codec, bitrate) = audio_codec(format)?;

        let mut args = Self::base_args();
        args.extend([
            "-i".to_string(),
            input_path.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            codec.to_string(),
        ]);
        if let Some(b) = bitrate {
            args.push("-b:a".to_string());
            args.push(b.to_string());
        }
        args.push(output_path.to_string_lossy().to_string());
        Ok(args)
    }

    /// Run ffmpeg; the error string is ready to be wrapped by the caller
    async fn run(&self, args: Vec<String>) -> Result<(), String> {
        let output = run_output_with_timeout(&self.ffmpeg_path, args, self.timeout)
            .await
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim().lines().last().unwrap_or("no output").to_string();
        Err(format!("ffmpeg exited with {}: {}", output.status, detail))
    }
}

pub fn is_supported_audio_format(format: &str) -> bool {
    audio_codec(format).is_ok()
}

/// ffmpeg encoder and bitrate for a target audio format
fn audio_codec(format: &str) -> Result<(&'static str, Option<&'static str>), RetrievalError> {
    match format.to_ascii_lowercase().as_str() {
        "mp3" => Ok(("libmp3lame", Some("192k"))),
        "m4a" | "aac" => Ok(("aac", Some("192k"))),
        "opus" => Ok(("libopus", Some("160k"))),
        "ogg" => Ok(("libvorbis", Some("192k"))),
        "flac" => Ok(("flac", None)),
        "wav" => Ok(("pcm_s16le", None)),
        other => Err(RetrievalError::TranscodeFailed(format!(
            "unsupported audio format '{}'",
            other
        ))),
    }
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn mux(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> Result<(), RetrievalError> {
        let args = Self::mux_args(video_path, audio_path, output_path);
        debug!("ffmpeg mux args: {:?}", args);

        if let Err(e) = self.run(args).await {
            remove_quietly(&[output_path]).await;
            return Err(RetrievalError::MuxFailed(e));
        }

        info!("Muxed into {}", output_path.display());
        Ok(())
    }

    async fn transcode_to_audio(
        &self,
        input_path: &Path,
        output_path: &Path,
        format: &str,
    ) -> Result<(), RetrievalError> {
        let args = Self::transcode_args(input_path, output_path, format)?;
        debug!("ffmpeg transcode args: {:?}", args);

        if let Err(e) = self.run(args).await {
            remove_quietly(&[output_path]).await;
            return Err(RetrievalError::TranscodeFailed(e));
        }

        tokio::fs::remove_file(input_path).await?;
        info!("Transcoded to {}", output_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_mux_args_copy_video() {
        let args = FfmpegProcessor::mux_args(
            &PathBuf::from("/tmp/v.webm"),
            &PathBuf::from("/tmp/a.m4a"),
            &PathBuf::from("/tmp/out.mp4"),
        );

        let joined = args.join(" ");
        assert!(joined.contains("-i /tmp/v.webm -i /tmp/a.m4a"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("+faststart"));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
        assert!(args.contains(&"-y".to_string()));
    }

    #[test]
    fn test_mkv_mux_has_no_faststart() {
        let args = FfmpegProcessor::mux_args(
            &PathBuf::from("v.webm"),
            &PathBuf::from("a.webm"),
            &PathBuf::from("out.mkv"),
        );
        assert!(!args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn test_transcode_args_mp3() {
        let args = FfmpegProcessor::transcode_args(
            &PathBuf::from("in.mp4"),
            &PathBuf::from("out.mp3"),
            "mp3",
        )
        .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-vn -c:a libmp3lame -b:a 192k out.mp3"));
    }

    #[test]
    fn test_unknown_audio_format() {
        let err = FfmpegProcessor::transcode_args(
            &PathBuf::from("in.mp4"),
            &PathBuf::from("out.xyz"),
            "xyz",
        )
        .unwrap_err();
        assert!(matches!(err, RetrievalError::TranscodeFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_mux_failure() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("v.mp4");
        let audio = dir.path().join("a.m4a");
        let output = dir.path().join("out.mp4");
        std::fs::write(&video, b"v").unwrap();
        std::fs::write(&audio, b"a").unwrap();

        let processor = FfmpegProcessor::new(&MediaConfig::default())
            .with_ffmpeg_path("definitely-not-ffmpeg-4242");
        let err = processor.mux(&video, &audio, &output).await.unwrap_err();

        assert!(matches!(err, RetrievalError::MuxFailed(_)));
        assert!(!err.is_failover());
        assert!(!output.exists());
    }
}
