//! Client side of qwen-fast.
//!
//! The client is what `ag` runs once the service is up:
//! - Sends chat, ping and status requests to qwen-server over its socket
//! - Renders a full-screen chat when attached to a terminal
//! - Falls back to a plain line loop otherwise

pub mod frontend;
pub mod repl;
pub mod session;
pub mod socket;
pub mod tui;

pub use frontend::SocketFrontend;
pub use socket::Client;
