//! Event handling and rule evaluation for kr-bot.
//!
//! This module turns raw chat events into replies:
//! - Normalizing events and recording them in per-conversation windows
//! - Evaluating dynamic and static rules, first match wins
//! - Composing conversational replies with the completion model and tools

pub mod builtin;
pub mod chat_event;
pub mod dispatcher;
pub mod dynamic;
pub mod normalizer;
pub mod orchestrator;
pub mod rule;
pub mod window;
