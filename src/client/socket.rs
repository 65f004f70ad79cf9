//! Socket client for communicating with the background service.

use crate::config::{Config, Endpoint};
use crate::protocol::{framing, ChatMessage, ChatRequest, Message, Response, ServiceStatus};
use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// A finished chat answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub tokens: usize,
    pub cached: bool,
}

/// Talks to qwen-server, one connection per request.
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: Endpoint,
    unit: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Client {
    pub fn new(endpoint: Endpoint, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            endpoint,
            unit: "qwen-server".to_string(),
            connect_timeout,
            request_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.server.endpoint(),
            unit: config.service.unit.clone(),
            connect_timeout: Duration::from_secs(config.client.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.client.request_timeout_secs),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let connect = async {
            match &self.endpoint {
                Endpoint::Unix(path) => UnixStream::connect(path)
                    .await
                    .map(|s| Box::new(s) as Box<dyn Connection>),
                Endpoint::Tcp(addr) => TcpStream::connect(addr)
                    .await
                    .map(|s| Box::new(s) as Box<dyn Connection>),
            }
        };

        tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| anyhow!("Connection timeout - is {} running?", self.unit))?
            .with_context(|| {
                format!(
                    "Failed to connect to the service at {}. Start it with: sudo systemctl start {}",
                    self.endpoint, self.unit
                )
            })
    }

    /// Open a connection and send one request on it.
    async fn send(&self, message: &Message) -> Result<Box<dyn Connection>> {
        let mut conn = self.connect().await?;
        framing::write_message(&mut conn, message).await?;
        Ok(conn)
    }

    async fn receive(&self, conn: &mut Box<dyn Connection>) -> Result<Response> {
        tokio::time::timeout(self.request_timeout, framing::read_message(conn))
            .await
            .map_err(|_| anyhow!("Request timeout - the model took too long"))?
    }

    /// Check that the service answers.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.send(&Message::Ping).await?;
        match self.receive(&mut conn).await? {
            Response::Pong => Ok(()),
            Response::Error { message } => Err(anyhow!("{}", message)),
            other => Err(anyhow!("Unexpected response to ping: {:?}", other)),
        }
    }

    /// Fetch the service status.
    pub async fn status(&self) -> Result<ServiceStatus> {
        let mut conn = self.send(&Message::Status).await?;
        match self.receive(&mut conn).await? {
            Response::Status(status) => Ok(status),
            Response::Error { message } => Err(anyhow!("{}", message)),
            other => Err(anyhow!("Unexpected response to status: {:?}", other)),
        }
    }

    /// Send the conversation and collect the answer.
    ///
    /// `on_chunk` sees each streamed fragment, or the whole answer once when
    /// the service did not stream.
    pub async fn chat<F>(&self, messages: &[ChatMessage], stream: bool, mut on_chunk: F) -> Result<ChatReply>
    where
        F: FnMut(&str) -> Result<()>,
    {
        let request = Message::Chat(ChatRequest {
            messages: messages.to_vec(),
            stream,
            temperature: None,
            max_tokens: None,
        });
        let mut conn = self.send(&request).await?;

        let mut streamed = false;
        loop {
            match self.receive(&mut conn).await? {
                Response::Chunk { content } => {
                    streamed = true;
                    on_chunk(&content)?;
                }
                Response::Chat {
                    response,
                    tokens,
                    cached,
                } => {
                    if !streamed {
                        on_chunk(&response)?;
                    }
                    return Ok(ChatReply {
                        text: response,
                        tokens,
                        cached,
                    });
                }
                Response::Error { message } => return Err(anyhow!("{}", message)),
                other => return Err(anyhow!("Unexpected response to chat: {:?}", other)),
            }
        }
    }
}
