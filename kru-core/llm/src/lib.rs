//! Model-facing half of kru: message types, a streaming HTTP client, the
//! Gemini provider, and the error taxonomy all provider failures map into.

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub mod api;
mod client;
pub mod error;
pub mod providers;
pub mod traffic_log;

pub use api::*;
pub use error::{ErrorKind, LlmError};
pub use providers::{DEFAULT_GEMINI_MODEL, GeminiChatModel, GeminiProvider};

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelCapability {
    Text,
    Embedding,
}

#[derive(Clone, Debug)]
pub struct ModelDefinition {
    pub id: String,
    pub display_name: Option<String>,
    pub capabilities: Vec<ModelCapability>,
}

impl ModelDefinition {
    pub fn new(id: impl Into<String>, capabilities: Vec<ModelCapability>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            capabilities,
        }
    }

    pub fn with_display_name(
        id: impl Into<String>,
        display_name: impl Into<String>,
        capabilities: Vec<ModelCapability>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: Some(display_name.into()),
            capabilities,
        }
    }

    /// Display name, falling back to id
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn has_capability(&self, capability: &ModelCapability) -> bool {
        self.capabilities.contains(capability)
    }
}

#[async_trait]
pub trait ChatModel {
    fn name(&self) -> &str;

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError>;

    /// Stream the reply. Failures after the stream opened arrive as `Err`
    /// items; consumers should stop at the first one.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, LlmError>;
}

#[async_trait]
impl ChatModel for Arc<dyn ChatModel + Send + Sync> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        (**self).chat(request).await
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream, LlmError> {
        (**self).stream_chat(request).await
    }
}

#[async_trait]
pub trait ModelProvider {
    /// List available models with their capabilities
    async fn list_models(&self) -> Result<Vec<ModelDefinition>, LlmError>;

    /// Create a chat model by name
    fn create_chat_model(&self, model_name: &str) -> Option<Arc<dyn ChatModel + Send + Sync>>;
}
