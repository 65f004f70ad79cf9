//! The qwen-server background service.
//!
//! The service is a long-running process, normally managed by systemd, that:
//! - Holds the HTTP client for the LLM API
//! - Warms the model up once at startup
//! - Caches non-streamed answers for a few minutes
//! - Answers chat, ping and status requests on a local socket

pub mod cache;
pub mod llm;
pub mod server;

pub use server::DaemonServer;
