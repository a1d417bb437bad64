pub mod config;
pub mod retriever;

use std::path::Path;

pub use config::RetrieverConfig;
pub use retriever::{OutputKind, RetrievalError, RetrievalRequest, RetrievalResult, Retriever};

/// One-shot retrieval with configuration loaded from the environment
pub async fn retrieve(
    reference: &str,
    output_kind: OutputKind,
    download_dir: &Path,
) -> Result<RetrievalResult, RetrievalError> {
    let config = RetrieverConfig::load()?;
    let retriever = Retriever::from_config(&config)?;
    retriever
        .retrieve(&RetrievalRequest::new(reference, output_kind), download_dir)
        .await
}
