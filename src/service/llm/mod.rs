pub mod openai;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{ChatMessage, Res};

// Traits.

/// Generic LLM client trait that clients must implement.
///
/// This trait defines the core functionality for interacting with chat-completion models.
/// Implementing this trait allows different LLM providers to be used with kr-bot.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// Complete a conversation.
    ///
    /// `messages` is the whole conversation, system directive included, oldest first.  The
    /// returned text is the assistant's next turn.
    async fn complete(&self, messages: &[ChatMessage]) -> Res<String>;
}

// Structs.

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }
}
