use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use video_retriever::retriever::ToolManager;
use video_retriever::{OutputKind, RetrievalRequest, Retriever, RetrieverConfig};

#[derive(Parser)]
#[command(name = "video-retriever", version, about = "Download a video or its audio track")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve one URL into a local file
    Get {
        url: String,
        /// Extract audio instead of video
        #[arg(long)]
        audio: bool,
        /// Target directory (defaults to the configured download dir)
        #[arg(long, short)]
        output_dir: Option<PathBuf>,
        /// Config file (defaults to $VIDEO_RETRIEVER_CONFIG or the user config dir)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show availability of yt-dlp and ffmpeg
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Get {
            url,
            audio,
            output_dir,
            config,
        } => {
            let config_path = config.or_else(RetrieverConfig::default_path);
            let config = RetrieverConfig::load_from(config_path.as_deref()).context("loading configuration")?;
            let retriever = Retriever::from_config(&config).context("setting up providers")?;

            let output_kind = if audio { OutputKind::Audio } else { OutputKind::Video };
            let download_dir = output_dir.unwrap_or_else(|| config.download_dir.clone());

            let result = retriever
                .retrieve(&RetrievalRequest::new(url.as_str(), output_kind), &download_dir)
                .await
                .with_context(|| format!("retrieving {}", url))?;

            println!("{}", result.local_path.display());
            match result.display_author {
                Some(author) => println!("{} - {}", result.display_title, author),
                None => println!("{}", result.display_title),
            }
        }
        Command::Tools => {
            for tool in ToolManager::new().get_all_tools() {
                let status = match (&tool.path, &tool.version) {
                    (Some(path), Some(version)) => format!("{} ({})", version, path),
                    (Some(path), None) => format!("found at {} (version unknown)", path),
                    _ => "not found".to_string(),
                };
                println!("{:<8} {}", tool.name, status);
            }
        }
    }

    Ok(())
}
