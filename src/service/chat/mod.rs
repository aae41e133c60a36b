pub mod onebot;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::{
    base::types::{ConversationKey, Reply, Void},
    interaction::dispatcher::Dispatcher,
};

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This trait defines the core functionality for interacting with chat platforms
/// like OneBot implementations. Implementing this trait allows different chat services
/// to be used with kr-bot.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Start the chat client listener.
    ///
    /// Inbound events are handed to `dispatcher`.  Returns when the listener stops.
    async fn start(&self, dispatcher: Dispatcher) -> Void;

    /// Deliver a reply to a group or private conversation.
    async fn send_reply(&self, conversation: &ConversationKey, reply: &Reply) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}
