//! LLM backend implementations.
//!
//! DashScope (OpenAI-compatible mode) is the production backend; the echo
//! backend answers offline and is handy for local testing.

pub mod dashscope;
pub mod echo;

use crate::config::BackendConfig;
use crate::protocol::ChatMessage;
use anyhow::Result;
use futures::stream::BoxStream;

/// Per-request generation parameters, already resolved against defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A stream of answer fragments.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Enum-based backend for LLM providers.
pub enum Backend {
    DashScope(dashscope::DashScopeBackend),
    Echo(echo::EchoBackend),
}

impl Backend {
    /// Produce a complete answer for the conversation.
    pub async fn complete(&self, messages: &[ChatMessage], params: GenerationParams) -> Result<String> {
        match self {
            Backend::DashScope(b) => b.complete(messages, params).await,
            Backend::Echo(b) => b.complete(messages, params).await,
        }
    }

    /// Produce the answer as a stream of fragments.
    pub async fn stream(&self, messages: &[ChatMessage], params: GenerationParams) -> Result<ChunkStream> {
        match self {
            Backend::DashScope(b) => b.stream(messages, params).await,
            Backend::Echo(b) => Ok(b.stream(messages)),
        }
    }

    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::DashScope(_) => "dashscope",
            Backend::Echo(_) => "echo",
        }
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        match self {
            Backend::DashScope(b) => &b.model,
            Backend::Echo(b) => &b.model,
        }
    }

    /// Check that the backend can be used at all.
    pub async fn health_check(&self) -> Result<()> {
        match self {
            Backend::DashScope(b) => b.health_check(),
            Backend::Echo(_) => Ok(()),
        }
    }
}

/// Create a backend from configuration.
pub fn create_backend(config: &BackendConfig) -> Result<Backend> {
    let backend = match config {
        BackendConfig::DashScope {
            base_url,
            model,
            api_key,
            timeout_secs,
            max_retries,
        } => Backend::DashScope(dashscope::DashScopeBackend::new(
            base_url.clone(),
            model.clone(),
            api_key.clone(),
            std::time::Duration::from_secs(*timeout_secs),
            *max_retries,
        )?),
        BackendConfig::Echo { model } => Backend::Echo(echo::EchoBackend::new(model.clone())),
    };
    Ok(backend)
}
