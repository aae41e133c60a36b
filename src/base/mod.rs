//! Core components, types, and utilities for kr-bot.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - System prompts and canned replies.
//! - Common types, the error taxonomy, and result handling.

pub mod config;
pub mod error;
pub mod prompts;
pub mod types;
