//! Socket server for the background service.
//!
//! Handles client connections and routes requests to the LLM backend.

use crate::config::{Config, GenerationConfig, Transport};
use crate::daemon::cache::ResponseCache;
use crate::daemon::llm::{create_backend, Backend, GenerationParams};
use crate::protocol::{framing, ChatMessage, ChatRequest, Message, Response, ServiceStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const WARMUP_PROMPT: &str = "你好";

/// How long a new connection may take to send its request.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared by every connection.
pub struct ServerState {
    backend: Backend,
    generation: GenerationConfig,
    cache: Mutex<ResponseCache>,
    model_loaded: AtomicBool,
    active_clients: AtomicUsize,
    started_at: Instant,
}

impl ServerState {
    fn new(backend: Backend, generation: GenerationConfig) -> Self {
        Self {
            backend,
            cache: Mutex::new(ResponseCache::new(generation.cache_ttl())),
            generation,
            model_loaded: AtomicBool::new(false),
            active_clients: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }

    fn params(&self, request: &ChatRequest) -> GenerationParams {
        GenerationParams {
            temperature: request.temperature.unwrap_or(self.generation.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.generation.max_tokens),
        }
    }

    async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            status: "running".to_string(),
            backend: self.backend.name().to_string(),
            model: self.backend.model().to_string(),
            model_loaded: self.model_loaded.load(Ordering::Relaxed),
            clients_connected: self.active_clients.load(Ordering::Relaxed),
            memory_mb: resident_memory_mb(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            cache_entries: self.cache.lock().await.len(),
        }
    }

    /// Answer a chat request, writing chunk frames first when streaming.
    async fn chat<W>(&self, request: ChatRequest, out: &mut W) -> Result<Response>
    where
        W: AsyncWrite + Unpin,
    {
        if request.messages.is_empty() {
            return Ok(Response::error("messages must not be empty"));
        }
        let params = self.params(&request);
        if request.stream {
            self.chat_streamed(&request.messages, params, out).await
        } else {
            Ok(self.chat_once(&request.messages, params).await)
        }
    }

    async fn chat_once(&self, messages: &[ChatMessage], params: GenerationParams) -> Response {
        let key = ResponseCache::key(messages, params);
        if let Some(hit) = self.cache.lock().await.get(&key, Instant::now()) {
            debug!("Serving cached response");
            return Response::chat(hit, true);
        }

        match self.backend.complete(messages, params).await {
            Ok(answer) => {
                if !answer.is_empty() {
                    self.cache
                        .lock()
                        .await
                        .insert(key, answer.clone(), Instant::now());
                }
                Response::chat(answer, false)
            }
            Err(e) => {
                error!("Generation failed: {:#}", e);
                Response::error(format!("model request failed: {:#}", e))
            }
        }
    }

    async fn chat_streamed<W>(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
        out: &mut W,
    ) -> Result<Response>
    where
        W: AsyncWrite + Unpin,
    {
        let mut chunks = match self.backend.stream(messages, params).await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("Streaming generation failed: {:#}", e);
                return Ok(Response::error(format!("model request failed: {:#}", e)));
            }
        };

        let mut answer = String::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(content) => {
                    answer.push_str(&content);
                    framing::write_message(out, &Response::Chunk { content }).await?;
                }
                Err(e) => {
                    error!("Stream failed: {:#}", e);
                    return Ok(Response::error(format!("model stream failed: {:#}", e)));
                }
            }
        }
        Ok(Response::chat(answer, false))
    }
}

/// Decrements the connection count when a handler finishes.
struct ConnectionGuard<'a>(&'a AtomicUsize);

impl<'a> ConnectionGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Listener abstraction so Unix and TCP share one accept loop.
#[async_trait]
trait Acceptor: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept_stream(&mut self) -> std::io::Result<Self::Stream>;
}

#[async_trait]
impl Acceptor for UnixListener {
    type Stream = UnixStream;

    async fn accept_stream(&mut self) -> std::io::Result<UnixStream> {
        self.accept().await.map(|(stream, _)| stream)
    }
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept_stream(&mut self) -> std::io::Result<TcpStream> {
        let (stream, addr) = self.accept().await?;
        debug!("Client connected from {}", addr);
        Ok(stream)
    }
}

/// The background service.
pub struct DaemonServer {
    config: Config,
    state: Arc<ServerState>,
}

impl DaemonServer {
    /// Create a server with the backend named in the configuration.
    pub fn new(config: Config) -> Result<Self> {
        let backend = create_backend(&config.backend)?;
        Ok(Self::with_backend(config, backend))
    }

    /// Create a server around an already constructed backend.
    pub fn with_backend(config: Config, backend: Backend) -> Self {
        let state = Arc::new(ServerState::new(backend, config.generation.clone()));
        Self { config, state }
    }

    /// Check the backend and optionally warm the model up.
    pub async fn prepare(&self) -> Result<()> {
        let backend = &self.state.backend;
        info!("Checking backend health...");
        backend.health_check().await.with_context(|| {
            format!(
                "Backend health check failed for {} ({})",
                backend.name(),
                backend.model()
            )
        })?;
        self.state.model_loaded.store(true, Ordering::Relaxed);

        if self.config.server.warmup {
            self.warm_up().await;
        }
        info!("Backend ready: {} ({})", backend.name(), backend.model());
        Ok(())
    }

    /// Send one short request. Failure only costs a slower first answer.
    async fn warm_up(&self) {
        info!("Warming up model...");
        let params = GenerationParams {
            temperature: self.config.generation.temperature,
            max_tokens: self.config.generation.max_tokens,
        };
        match self
            .state
            .backend
            .complete(&[ChatMessage::user(WARMUP_PROMPT)], params)
            .await
        {
            Ok(answer) => {
                let preview: String = answer.chars().take(50).collect();
                info!("Warm-up succeeded: {}...", preview);
            }
            Err(e) => warn!("Warm-up failed, continuing anyway: {:#}", e),
        }
    }

    /// Prepare, listen on the configured transport and serve until SIGTERM/SIGINT.
    pub async fn run(&self) -> Result<()> {
        self.prepare().await?;

        let result = match self.config.server.transport {
            Transport::Unix => {
                let path = &self.config.server.socket_path;
                let listener = bind_unix(path).await?;
                info!("Listening on {}", path.display());
                let result = self.serve_unix(listener, shutdown_signal()).await;
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!("Failed to remove socket {}: {}", path.display(), e);
                }
                result
            }
            Transport::Tcp => {
                let addr = &self.config.server.tcp_addr;
                let listener = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind to {}", addr))?;
                info!("Listening on tcp://{}", addr);
                self.serve_tcp(listener, shutdown_signal()).await
            }
        };

        self.state.cache.lock().await.clear();
        info!("Service stopped");
        result
    }

    /// Serve connections from a bound Unix listener until `shutdown` resolves.
    pub async fn serve_unix<F>(&self, listener: UnixListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.serve(listener, shutdown).await
    }

    /// Serve connections from a bound TCP listener until `shutdown` resolves.
    pub async fn serve_tcp<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.serve(listener, shutdown).await
    }

    async fn serve<A, F>(&self, mut listener: A, shutdown: F) -> Result<()>
    where
        A: Acceptor,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                accepted = listener.accept_stream() => match accepted {
                    Ok(stream) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, state, REQUEST_READ_TIMEOUT).await {
                                error!("Error handling client: {:#}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_client<S>(mut stream: S, state: Arc<ServerState>, read_timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = ConnectionGuard::enter(&state.active_clients);
    debug!("Client connected");

    let read = tokio::time::timeout(read_timeout, framing::read_message(&mut stream)).await;
    let Ok(read) = read else {
        debug!("Client sent no request within {:?}, closing", read_timeout);
        return Ok(());
    };
    let message: Message = match read {
        Ok(message) => message,
        Err(e) => {
            if is_eof(&e) {
                debug!("Client closed before sending a request");
                return Ok(());
            }
            warn!("Invalid request: {:#}", e);
            framing::write_message(&mut stream, &Response::error("invalid request")).await?;
            return Ok(());
        }
    };

    let response = match message {
        Message::Ping => Response::Pong,
        Message::Status => Response::Status(state.status().await),
        Message::Chat(request) => {
            debug!("Chat request with {} messages", request.messages.len());
            state.chat(request, &mut stream).await?
        }
    };

    framing::write_message(&mut stream, &response).await?;
    debug!("Response sent");
    Ok(())
}

fn is_eof(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::UnexpectedEof)
}

/// Bind a Unix socket that any local user may connect to.
async fn bind_unix(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
    }

    // Remove a socket left behind by a previous run
    if path.exists() {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to remove existing socket: {}", path.display()))?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind to socket: {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    Ok(listener)
}

/// Resolves on SIGTERM (systemctl stop) or SIGINT.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Resident set size from /proc, in MB.
fn resident_memory_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_mb(&status)
}

fn parse_vm_rss_mb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}
