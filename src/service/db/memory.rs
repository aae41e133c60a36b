//! In-process database backend.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::base::{
    error::BotError,
    types::{Res, Void},
};

use super::{DbClient, DirectiveRecord, DynamicRuleRecord, GenericDbClient, SessionRecord};

// Extra methods on `DbClient` applied by the memory implementation.

impl DbClient {
    /// A fresh, empty in-process store.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(MemoryDbClient::default()),
        }
    }
}

// Specific implementations.

#[derive(Default)]
pub struct MemoryDbClient {
    rules: RwLock<BTreeMap<i64, DynamicRuleRecord>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    directives: RwLock<HashMap<String, DirectiveRecord>>,
}

#[async_trait]
impl GenericDbClient for MemoryDbClient {
    async fn list_rules(&self) -> Res<Vec<DynamicRuleRecord>> {
        let mut rules = self.rules.read().await.values().cloned().collect::<Vec<_>>();
        rules.sort_by_key(|r| (r.sequence, r.id));

        Ok(rules)
    }

    async fn get_rule(&self, id: i64) -> Res<Option<DynamicRuleRecord>> {
        Ok(self.rules.read().await.get(&id).cloned())
    }

    async fn put_rule(&self, record: &DynamicRuleRecord) -> Void {
        self.rules.write().await.insert(record.id, record.clone());

        Ok(())
    }

    async fn swap_rule_sequences(&self, first: i64, second: i64, now: DateTime<Utc>) -> Void {
        let mut rules = self.rules.write().await;

        let first_sequence = rules.get(&first).map(|r| r.sequence).ok_or(BotError::RecordNotFound(format!("dynamic_rule:{first}")))?;
        let second_sequence = rules.get(&second).map(|r| r.sequence).ok_or(BotError::RecordNotFound(format!("dynamic_rule:{second}")))?;

        for (id, sequence) in [(first, second_sequence), (second, first_sequence)] {
            if let Some(record) = rules.get_mut(&id) {
                record.sequence = sequence;
                record.updated_at = now;
            }
        }

        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Res<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn put_session(&self, record: &SessionRecord) -> Void {
        self.sessions.write().await.insert(record.session_id.clone(), record.clone());

        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Res<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn list_session_ids(&self) -> Res<Vec<String>> {
        Ok(self.sessions.read().await.keys().cloned().collect())
    }

    async fn get_directive(&self, key: &str) -> Res<Option<DirectiveRecord>> {
        Ok(self.directives.read().await.get(key).cloned())
    }

    async fn put_directive(&self, record: &DirectiveRecord) -> Void {
        self.directives.write().await.insert(record.key.clone(), record.clone());

        Ok(())
    }
}

// Tests.
