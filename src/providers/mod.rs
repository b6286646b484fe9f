//! Provider Client Abstraction (C4): a uniform interface over
//! heterogeneous upstream chat/embed/rerank protocols.

pub mod error;
pub mod factory;
pub mod openai_compatible;
pub mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::pin::Pin;

pub use error::{ProviderError, ProviderResult};
pub use openai_compatible::OpenAIProvider;
pub use types::*;

/// A lazy sequence of [`StreamEvent`]s with no terminator object of its
/// own — exhaustion of the stream is the terminator, matching §9's
/// "finite lazy sequence of Delta records" guidance.
pub type ProviderStream = Pin<Box<dyn futures::Stream<Item = ProviderResult<StreamEvent>> + Send>>;

/// Capability flags a provider advertises; the selection engine filters
/// on these, never on string matching against the provider name.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    pub chat: bool,
    pub chat_stream: bool,
    pub embed: bool,
    pub rerank: bool,
    pub vision: bool,
    pub tools: bool,
}

/// Capability-polymorphic contract every upstream is represented behind.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used as the provider id throughout the registry,
    /// cache, and debate session records.
    fn id(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn chat(&self, request: ChatRequest) -> ProviderResult<ChatResponse>;

    async fn chat_stream(&self, request: ChatRequest) -> ProviderResult<ProviderStream>;

    async fn embed(&self, _texts: Vec<String>) -> ProviderResult<Vec<Vec<f32>>> {
        Err(ProviderError::InvalidRequest(format!(
            "{} does not support embeddings",
            self.id()
        )))
    }

    async fn rerank(&self, _query: &str, _docs: Vec<String>) -> ProviderResult<Vec<f64>> {
        Err(ProviderError::InvalidRequest(format!(
            "{} does not support rerank",
            self.id()
        )))
    }

    async fn discover_models(&self) -> ProviderResult<Vec<ModelDescriptor>>;

    fn default_model(&self) -> &str;

    fn context_window(&self, model: &str) -> Option<u32>;

    fn calculate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64;
}

/// Type alias matching the provider-client boundary's stream return; kept
/// distinct from `futures::stream::BoxStream` naming used elsewhere in
/// the ecosystem for reference.
pub type BoxedProviderStream = BoxStream<'static, ProviderResult<StreamEvent>>;
