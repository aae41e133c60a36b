//! Library root for `kr-bot`.
//!
//! Kr-bot is a QQ group chat bot speaking OneBot v11, designed to:
//! - Classify every inbound message by scene (private, group, mentions)
//! - Answer with the first matching rule, administrator-defined rules first
//! - Hold conversations with an OpenAI-compatible model, with per-user session memory
//! - Call MCP tools when a message looks like it needs one
//!
//! The bot integrates with a OneBot implementation for chat, SurrealDB (or an in-memory
//! store) for persistence, and OpenAI-compatible endpoints for completions. The
//! architecture is built around extensible traits that allow for different
//! implementations of each service.

pub mod base;
pub mod interaction;
pub mod prelude;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the kr-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with database, LLM, chat, and tool clients
/// - Starts the OneBot listener
pub async fn start(config: Config) -> Void {
    info!("Starting kr-bot ...");

    // Start the crypto provider.
    crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install the default crypto provider."))?;

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
