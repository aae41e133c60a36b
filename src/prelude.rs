//! Common imports for code built on kr-bot.

pub use crate::base::{
    config::Config,
    error::{BotError, BotErrorExt},
    types::{ChatMessage, ChatRole, ConversationKey, Err, Reply, Res, Scene, Void},
};
pub use crate::interaction::{
    dispatcher::{DispatchOutcome, Dispatcher},
    normalizer::{NormalizedMessage, RawEvent},
    rule::TriggerContext,
};
pub use anyhow::anyhow;
pub use tracing::{debug, error, info, instrument, warn};
