//! Persisted chat directives: per group, and per member of a group.
//!
//! A directive is appended to the configured system directive whenever the bot chats in
//! that scope, so groups and members can give the bot a role of their own.

use std::fmt;

use chrono::Utc;
use tracing::{info, instrument};

use crate::{
    base::types::{ConversationKey, Res, Void},
    service::db::{DbClient, DirectiveRecord},
};

// Types.

/// Who a directive applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveScope {
    /// Everyone chatting in a group.
    Group(i64),
    /// One member, only within one group.
    Member { group_id: i64, user_id: i64 },
}

impl fmt::Display for DirectiveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveScope::Group(group_id) => write!(f, "group:{group_id}"),
            DirectiveScope::Member { group_id, user_id } => write!(f, "member:{group_id}:{user_id}"),
        }
    }
}

// Structs.

/// Directive store.  It is trivially cloneable.
#[derive(Clone)]
pub struct DirectiveStore {
    db: DbClient,
}

impl DirectiveStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }

    /// The stored directive for `scope`, if any.
    pub async fn get(&self, scope: DirectiveScope) -> Res<Option<String>> {
        Ok(self.db.get_directive(&scope.to_string()).await?.map(|r| r.text).filter(|t| !t.is_empty()))
    }

    /// Store the directive for `scope`.  An empty text clears it.
    #[instrument(skip(self, text))]
    pub async fn set(&self, scope: DirectiveScope, text: &str) -> Void {
        let record = DirectiveRecord {
            key: scope.to_string(),
            text: text.trim().to_string(),
            updated_at: Utc::now(),
        };

        self.db.put_directive(&record).await?;

        info!("Directive for `{}` updated.", scope);

        Ok(())
    }

    /// The system directive for a chat turn: `base`, then the group directive, then the
    /// member directive.  Private conversations only get `base`.
    pub async fn compose(&self, base: &str, conversation: &ConversationKey, user_id: i64) -> Res<String> {
        let ConversationKey::Group(group_id) = *conversation else {
            return Ok(base.to_string());
        };

        let mut directive = base.trim_end().to_string();

        if let Some(group) = self.get(DirectiveScope::Group(group_id)).await? {
            directive.push_str(&format!("\n\n## Group Directive (must follow)\n\n{group}"));
        }

        if let Some(member) = self.get(DirectiveScope::Member { group_id, user_id }).await? {
            directive.push_str(&format!("\n\n## Member Directive (follow where possible)\n\n{member}"));
        }

        Ok(directive)
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_keys() {
        assert_eq!(DirectiveScope::Group(777).to_string(), "group:777");
        assert_eq!(DirectiveScope::Member { group_id: 777, user_id: 42 }.to_string(), "member:777:42");
    }

    #[tokio::test]
    async fn test_set_then_get_and_clear() {
        let store = DirectiveStore::new(DbClient::memory());
        let scope = DirectiveScope::Member { group_id: 777, user_id: 42 };

        assert_eq!(store.get(scope).await.unwrap(), None);

        store.set(scope, " 说话像猫 ").await.unwrap();
        assert_eq!(store.get(scope).await.unwrap().as_deref(), Some("说话像猫"));

        store.set(scope, "").await.unwrap();
        assert_eq!(store.get(scope).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compose_layers_group_then_member() {
        let store = DirectiveStore::new(DbClient::memory());

        store.set(DirectiveScope::Group(777), "用文言文").await.unwrap();
        store.set(DirectiveScope::Member { group_id: 777, user_id: 42 }, "叫我主人").await.unwrap();

        let composed = store.compose("base\n", &ConversationKey::Group(777), 42).await.unwrap();
        assert_eq!(composed, "base\n\n## Group Directive (must follow)\n\n用文言文\n\n## Member Directive (follow where possible)\n\n叫我主人");

        // Another member only gets the group layer.
        let other = store.compose("base", &ConversationKey::Group(777), 7).await.unwrap();
        assert_eq!(other, "base\n\n## Group Directive (must follow)\n\n用文言文");

        // Private chats and other groups get the base directive.
        assert_eq!(store.compose("base", &ConversationKey::Private(42), 42).await.unwrap(), "base");
        assert_eq!(store.compose("base", &ConversationKey::Group(1), 42).await.unwrap(), "base");
    }
}
