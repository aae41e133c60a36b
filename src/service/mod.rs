//! Service integrations for external APIs and clients.
//!
//! This module contains the collaborators used by kr-bot:
//! - Chat services (e.g., a OneBot HTTP implementation)
//! - Database services (in-memory, or SurrealDB)
//! - LLM services (e.g., OpenAI-compatible endpoints)
//! - MCP tool endpoints, and the session and directive stores built on the database
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod chat;
pub mod db;
pub mod directive;
pub mod llm;
pub mod mcp;
pub mod session;
