//! Offline backend that answers with the last user message.

use super::{ChunkStream, GenerationParams};
use crate::protocol::{ChatMessage, Role};
use anyhow::{anyhow, Result};
use futures::StreamExt;

pub struct EchoBackend {
    pub model: String,
}

impl EchoBackend {
    pub fn new(model: String) -> Self {
        Self { model }
    }

    pub async fn complete(&self, messages: &[ChatMessage], _params: GenerationParams) -> Result<String> {
        last_user(messages)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No user message to echo"))
    }

    /// Stream the echo word by word, keeping the separating whitespace.
    pub fn stream(&self, messages: &[ChatMessage]) -> ChunkStream {
        let text = last_user(messages).unwrap_or_default().to_string();
        let chunks: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        futures::stream::iter(chunks).boxed()
    }
}

fn last_user(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}
