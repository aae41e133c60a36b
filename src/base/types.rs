use std::fmt;

use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// Delivery context of an inbound message.
///
/// Derived exactly once per message by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scene {
    /// A direct (one-to-one) message.
    Private,
    /// A group message that mentions nobody.
    Group,
    /// A group message that mentions the bot's own account.
    MentionsBot,
    /// A group message that mentions some other account.
    MentionsOther,
    /// A group message that mentions everyone.
    MentionsAll,
}

impl Scene {
    /// Every scene, in declaration order.
    pub const ALL: [Scene; 5] = [Scene::Private, Scene::Group, Scene::MentionsBot, Scene::MentionsOther, Scene::MentionsAll];
}

/// Identifies the conversation (group or private chat) a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ConversationKey {
    Group(i64),
    Private(i64),
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKey::Group(id) => write!(f, "group:{id}"),
            ConversationKey::Private(id) => write!(f, "private:{id}"),
        }
    }
}

/// The kind of content a reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Image,
}

/// The output of a rule's action, handed to the chat client for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub content: String,
    pub content_type: ContentType,
}

impl Reply {
    /// A plain text reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Text,
        }
    }

    /// An image reply; `content` is a file path or URL understood by the platform.
    pub fn image(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Image,
        }
    }

    /// Whether there is nothing worth sending.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Role of a turn in a chat-completion conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of a chat-completion conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}
