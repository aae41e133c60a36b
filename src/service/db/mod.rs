//! Persistence for dynamic rules and chat sessions.
//!
//! Backends store plain keyed records.  The stores in `interaction::dynamic` and
//! `service::session` own ordering, trimming, and locking.

pub mod memory;
pub mod surreal;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::base::{
    config::Config,
    types::{ChatMessage, Res, Scene, Void},
};

// Traits.

/// Generic database client trait that clients must implement.
///
/// Implementing this trait allows different database backends to be used with kr-bot.
#[async_trait]
pub trait GenericDbClient: Send + Sync + 'static {
    /// Every rule record, soft-deleted ones included, ordered by `sequence`.
    async fn list_rules(&self) -> Res<Vec<DynamicRuleRecord>>;

    /// A single rule record by id, soft-deleted or not.
    async fn get_rule(&self, id: i64) -> Res<Option<DynamicRuleRecord>>;

    /// Insert or overwrite a rule record.
    async fn put_rule(&self, record: &DynamicRuleRecord) -> Void;

    /// Exchange the `sequence` values of two rule records in one atomic step.
    ///
    /// Either both records change or neither does.
    async fn swap_rule_sequences(&self, first: i64, second: i64, now: DateTime<Utc>) -> Void;

    /// A session record by id.
    async fn get_session(&self, session_id: &str) -> Res<Option<SessionRecord>>;

    /// Insert or overwrite a session record.
    async fn put_session(&self, record: &SessionRecord) -> Void;

    /// Remove a session record.  Returns whether it existed.
    async fn delete_session(&self, session_id: &str) -> Res<bool>;

    /// Ids of all stored sessions, in no particular order.
    async fn list_session_ids(&self) -> Res<Vec<String>>;

    /// A chat directive by scope key.
    async fn get_directive(&self, key: &str) -> Res<Option<DirectiveRecord>>;

    /// Insert or overwrite a chat directive.
    async fn put_directive(&self, record: &DirectiveRecord) -> Void;
}

// Structs.

/// Database client for kr-bot.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DbClient {
    inner: Arc<dyn GenericDbClient>,
}

impl Deref for DbClient {
    type Target = dyn GenericDbClient;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DbClient {
    pub fn new(inner: Arc<dyn GenericDbClient>) -> Self {
        Self { inner }
    }

    /// Build the backend selected by `db_endpoint`: `memory` is the in-process store,
    /// anything else is handed to SurrealDB (`mem://`, `ws://`, ...).
    pub async fn from_config(config: &Config) -> Res<Self> {
        if config.db_endpoint == "memory" {
            return Ok(Self::memory());
        }

        Self::surreal(config).await
    }
}

// Data types.

/// How a dynamic rule's condition value is compared against message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionType {
    /// The trimmed text equals the value.
    Equals,
    /// The text contains the value.
    Contains,
    /// The trimmed text starts with the value.
    StartsWith,
    /// The trimmed text ends with the value.
    EndsWith,
}

/// What a dynamic rule's `content` means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleContentType {
    /// Reply with `content` verbatim.
    Text,
    /// `content` names a built-in handler.
    HandlerRef,
}

/// A persisted, administrator-defined rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRuleRecord {
    pub id: i64,
    pub condition_type: ConditionType,
    pub condition_value: String,
    pub content_type: RuleContentType,
    pub content: String,
    pub sequence: i64,
    pub scene: Scene,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the rule is soft-deleted.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DynamicRuleRecord {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// A persisted chat-completion conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Preview of the first non-system message, cached once.
    #[serde(default)]
    pub preview: Option<String>,
}

/// A persisted chat directive for a group, or for one member of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectiveRecord {
    /// Scope key, `group:<id>` or `member:<group>:<user>`.
    pub key: String,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}
