//! qwen-fast - fast terminal chat for Qwen models.
//!
//! `ag` dispatches a single flag: chat (starting the systemd service on
//! demand), status, stop or help. `qwen-server` is the resident service that
//! keeps the LLM client warm and answers over a local socket.

pub mod client;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod service;
