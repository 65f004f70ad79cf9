//! Configuration management for qwen-fast.
//!
//! Configuration is loaded from the first file that exists out of
//! `$QWEN_FAST_CONFIG`, `/etc/qwen-fast/config.toml` and
//! `~/.config/qwen-fast/config.toml`. Missing files mean defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "QWEN_FAST_CONFIG";

/// Environment variable holding the DashScope API key.
pub const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";

const SYSTEM_CONFIG_PATH: &str = "/etc/qwen-fast/config.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// How the dispatcher talks to the OS service manager.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Where the background service listens.
    #[serde(default)]
    pub server: ServerConfig,
    /// LLM provider configuration.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Generation defaults and caching.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Interactive client behaviour.
    #[serde(default)]
    pub client: ClientConfig,
}

/// Service manager settings used by `ag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// systemd unit name.
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Seconds to wait after `systemctl start` before re-checking.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// Prefix start/stop with sudo when not running as root.
    #[serde(default = "default_true")]
    pub sudo: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            unit: default_unit(),
            grace_period_secs: default_grace_period_secs(),
            sudo: true,
        }
    }
}

impl ServiceConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn default_unit() -> String {
    "qwen-server".to_string()
}

fn default_grace_period_secs() -> u64 {
    3
}

/// Transport between client and background service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Unix,
    Tcp,
}

/// Listening settings shared by the service and the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub transport: Transport,
    /// Unix socket path (default: /tmp/qwen_server.sock).
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Loopback TCP address used when `transport = "tcp"`.
    #[serde(default = "default_tcp_addr")]
    pub tcp_addr: String,
    /// Send one short request at startup so the first real answer is fast.
    #[serde(default = "default_true")]
    pub warmup: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Unix,
            socket_path: default_socket_path(),
            tcp_addr: default_tcp_addr(),
            warmup: true,
        }
    }
}

impl ServerConfig {
    /// The endpoint clients should connect to.
    pub fn endpoint(&self) -> Endpoint {
        match self.transport {
            Transport::Unix => Endpoint::Unix(self.socket_path.clone()),
            Transport::Tcp => Endpoint::Tcp(self.tcp_addr.clone()),
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/qwen_server.sock")
}

fn default_tcp_addr() -> String {
    "127.0.0.1:9898".to_string()
}

/// A resolved address of the background service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Backend configuration for LLM providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// DashScope OpenAI-compatible API.
    DashScope {
        /// Base URL (default: DashScope compatible-mode endpoint).
        #[serde(default = "default_dashscope_url")]
        base_url: String,
        /// Model name (default: qwen-turbo).
        #[serde(default = "default_dashscope_model")]
        model: String,
        /// API key (prefer DASHSCOPE_API_KEY env var).
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    /// Offline backend that repeats the last user message.
    Echo {
        #[serde(default = "default_echo_model")]
        model: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::DashScope {
            base_url: default_dashscope_url(),
            model: default_dashscope_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_dashscope_url() -> String {
    "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string()
}

fn default_dashscope_model() -> String {
    "qwen-turbo".to_string()
}

fn default_echo_model() -> String {
    "echo".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

/// Generation defaults applied when a request leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// How long a non-streamed answer stays in the response cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_temperature() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// Interactive client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Ask the service to stream replies chunk by chunk.
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stream: true,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Get the per-user config file path.
    pub fn user_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("qwen-fast").join("config.toml"))
            .context("Could not determine config directory")
    }

    /// Resolve which config file to read, if any exists.
    pub fn config_path() -> Result<Option<PathBuf>> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            // An explicit override must exist.
            return Ok(Some(PathBuf::from(path)));
        }
        let system = PathBuf::from(SYSTEM_CONFIG_PATH);
        if system.exists() {
            return Ok(Some(system));
        }
        let user = Self::user_config_path()?;
        Ok(user.exists().then_some(user))
    }

    /// Load configuration, using defaults if no file is found.
    pub fn load() -> Result<Self> {
        match Self::config_path()? {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the backend type as a string.
    pub fn backend_type(&self) -> &'static str {
        match &self.backend {
            BackendConfig::DashScope { .. } => "dashscope",
            BackendConfig::Echo { .. } => "echo",
        }
    }

    /// Get the model name.
    pub fn model_name(&self) -> &str {
        match &self.backend {
            BackendConfig::DashScope { model, .. } => model,
            BackendConfig::Echo { model } => model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(matches!(config.backend, BackendConfig::DashScope { .. }));
        assert_eq!(config.model_name(), "qwen-turbo");
        assert_eq!(config.service.unit, "qwen-server");
        assert_eq!(config.service.grace_period(), Duration::from_secs(3));
        assert_eq!(
            config.server.endpoint(),
            Endpoint::Unix(PathBuf::from("/tmp/qwen_server.sock"))
        );
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.generation.max_tokens, 2000);
        assert_eq!(config.generation.cache_ttl(), Duration::from_secs(300));
        assert!(config.client.stream);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
[service]
unit = "qwen-dev"
grace_period_secs = 5
sudo = false

[server]
transport = "tcp"
tcp_addr = "127.0.0.1:7000"

[backend]
type = "echo"

[generation]
temperature = 0.2
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.service.unit, "qwen-dev");
        assert!(!config.service.sudo);
        assert_eq!(config.server.endpoint(), Endpoint::Tcp("127.0.0.1:7000".into()));
        assert_eq!(config.backend_type(), "echo");
        assert_eq!(config.model_name(), "echo");
        assert_eq!(config.generation.max_tokens, 2000);
    }

    #[test]
    fn test_dashscope_partial_backend() {
        let toml = r#"
[backend]
type = "dashscope"
model = "qwen-plus"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        match config.backend {
            BackendConfig::DashScope {
                base_url,
                model,
                max_retries,
                ..
            } => {
                assert_eq!(model, "qwen-plus");
                assert!(base_url.contains("dashscope"));
                assert_eq!(max_retries, 3);
            }
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[service]\nunit = \"custom\"\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.service.unit, "custom");
    }

    #[test]
    fn test_load_from_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[service\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
