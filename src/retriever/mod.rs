// Retriever module - resolve a reference, pick streams, fetch, post-process

pub mod backends;
pub mod errors;
pub mod fetch;
pub mod format_selector;
pub mod media;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod tools;
pub mod traits;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use backends::{AggregatorAdapter, MirrorAdapter, MirrorFlavor, NativeAdapter, RawProviderResponse};
pub use errors::RetrievalError;
pub use fetch::HttpFetcher;
pub use format_selector::FormatSelector;
pub use media::FfmpegProcessor;
pub use models::{
    OutputKind, ResolvedMedia, RetrievalRequest, RetrievalResult, SelectionPlan, StreamDescriptor, StreamKind,
};
pub use orchestrator::{RetrievalState, Retriever};
pub use pool::{Instance, InstanceHealth, InstancePool};
pub use tools::{ToolInfo, ToolManager, ToolType};
pub use traits::{MediaProcessor, ProviderAdapter};
