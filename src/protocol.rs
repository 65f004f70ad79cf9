//! IPC protocol definitions for client-service communication.
//!
//! The protocol uses length-prefixed JSON over a Unix domain socket (or
//! loopback TCP). A connection carries one request; the service answers with
//! zero or more `Chunk` frames followed by exactly one final frame.

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Full conversation history, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Stream the answer as `Chunk` frames.
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Message type for IPC communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Generate a reply to a conversation.
    Chat(ChatRequest),
    /// Liveness check.
    Ping,
    /// Request service status.
    Status,
}

/// Status information reported by the background service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub backend: String,
    pub model: String,
    pub model_loaded: bool,
    pub clients_connected: usize,
    /// Resident memory in MB, when the platform exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    pub uptime_secs: u64,
    pub cache_entries: usize,
}

impl ServiceStatus {
    /// Rows for a human-readable report, in display order.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("status", self.status.clone()),
            ("backend", self.backend.clone()),
            ("model", self.model.clone()),
            ("model_loaded", self.model_loaded.to_string()),
            ("clients_connected", self.clients_connected.to_string()),
            (
                "memory_usage",
                self.memory_mb
                    .map(|mb| format!("{} MB", mb))
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            ("uptime_secs", self.uptime_secs.to_string()),
            ("cache_entries", self.cache_entries.to_string()),
        ]
    }
}

/// Response frames sent from service to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// A piece of a streamed answer.
    Chunk { content: String },
    /// The complete answer; always the last frame of a chat exchange.
    Chat {
        response: String,
        /// Rough token estimate (characters / 4).
        tokens: usize,
        #[serde(default)]
        cached: bool,
    },
    Pong,
    Status(ServiceStatus),
    Error { message: String },
}

impl Response {
    /// Create a final chat response.
    pub fn chat(response: String, cached: bool) -> Self {
        let tokens = estimate_tokens(&response);
        Self::Chat {
            response,
            tokens,
            cached,
        }
    }

    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Rough token count used for reporting only.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Framing for messages: length-prefixed JSON.
/// Format: 4 bytes (big-endian u32) length + JSON payload
pub mod framing {
    use anyhow::{anyhow, Result};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Largest payload accepted in either direction.
    pub const MAX_FRAME_LEN: usize = 1_000_000;

    /// Write a length-prefixed message.
    pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
    where
        W: AsyncWriteExt + Unpin,
        T: serde::Serialize,
    {
        let json = serde_json::to_vec(message)?;
        if json.len() > MAX_FRAME_LEN {
            return Err(anyhow!("Message too large: {} bytes", json.len()));
        }
        let len = json.len() as u32;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(&json).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a length-prefixed message.
    pub async fn read_message<R, T>(reader: &mut R) -> Result<T>
    where
        R: AsyncReadExt + Unpin,
        T: serde::de::DeserializeOwned,
    {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_FRAME_LEN {
            return Err(anyhow!("Message too large: {} bytes", len));
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        let message = serde_json::from_slice(&buf)?;
        Ok(message)
    }
}
