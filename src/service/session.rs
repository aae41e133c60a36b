//! Capacity-bounded chat-completion history, keyed by session id.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

use crate::{
    base::{
        error::BotError,
        types::{ChatMessage, ChatRole, Res, Void},
    },
    service::db::{DbClient, SessionRecord},
};

/// Default number of turns kept per session.
pub const DEFAULT_SESSION_CAPACITY: usize = 100;

/// Number of characters kept in a session preview.
pub const PREVIEW_LENGTH: usize = 50;

/// Summary of a session, without its messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub preview: Option<String>,
}

/// Session context store.
///
/// Mutations of one session are serialized by a per-session lock; distinct sessions
/// proceed independently.  It is trivially cloneable.
#[derive(Clone)]
pub struct SessionStore {
    db: DbClient,
    capacity: usize,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(db: DbClient, capacity: usize) -> Self {
        Self {
            db,
            capacity: capacity.max(2),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one message, trimming the session down to capacity.
    #[instrument(skip(self, message))]
    pub async fn append(&self, session_id: &str, message: ChatMessage) -> Void {
        self.append_many(session_id, vec![message]).await
    }

    /// Append several messages under one lock acquisition.
    #[instrument(skip(self, messages))]
    pub async fn append_many(&self, session_id: &str, messages: Vec<ChatMessage>) -> Void {
        validate_session_id(session_id)?;

        let _guard = self.lock(session_id).await;
        let now = Utc::now();

        let mut record = self.db.get_session(session_id).await?.unwrap_or_else(|| SessionRecord {
            session_id: session_id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            preview: None,
        });

        record.messages.extend(messages);
        trim_to_capacity(&mut record.messages, self.capacity);

        if record.preview.is_none() {
            record.preview = record.messages.iter().find(|m| m.role != ChatRole::System).map(|m| preview_of(&m.content));
        }

        record.updated_at = now;

        debug!("Session `{}` now holds {} messages.", session_id, record.messages.len());

        self.db.put_session(&record).await
    }

    /// Make `directive` the session's leading system message, and return the history.
    ///
    /// A session without a leading system message gets one; a stale one is replaced.
    /// Runs under the session lock, so concurrent turns never store it twice.
    #[instrument(skip(self, directive))]
    pub async fn ensure_directive(&self, session_id: &str, directive: &str) -> Res<Vec<ChatMessage>> {
        validate_session_id(session_id)?;

        let _guard = self.lock(session_id).await;
        let now = Utc::now();

        let mut record = self.db.get_session(session_id).await?.unwrap_or_else(|| SessionRecord {
            session_id: session_id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            preview: None,
        });

        match record.messages.first_mut() {
            Some(first) if first.role == ChatRole::System => {
                if first.content == directive {
                    return Ok(record.messages);
                }

                first.content = directive.to_string();
            }
            _ => record.messages.insert(0, ChatMessage::system(directive)),
        }

        trim_to_capacity(&mut record.messages, self.capacity);
        record.updated_at = now;

        self.db.put_session(&record).await?;

        Ok(record.messages)
    }

    /// The session's messages in append order.  Empty for unknown sessions.
    ///
    /// The returned list is a copy; changing it does not change the stored session.
    #[instrument(skip(self))]
    pub async fn load(&self, session_id: &str) -> Res<Vec<ChatMessage>> {
        if session_id.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self.db.get_session(session_id).await?.map(|r| r.messages).unwrap_or_default())
    }

    /// Drop every message but keep the session itself.
    #[instrument(skip(self))]
    pub async fn clear(&self, session_id: &str) -> Void {
        validate_session_id(session_id)?;

        let _guard = self.lock(session_id).await;

        if let Some(mut record) = self.db.get_session(session_id).await? {
            record.messages.clear();
            record.preview = None;
            record.updated_at = Utc::now();

            self.db.put_session(&record).await?;
        }

        Ok(())
    }

    /// Remove the session entirely.
    #[instrument(skip(self))]
    pub async fn delete(&self, session_id: &str) -> Void {
        validate_session_id(session_id)?;

        let guard = self.lock(session_id).await;
        self.db.delete_session(session_id).await?;

        // Drop the lock entry too, unless another caller is already waiting on it.
        self.locks.remove_if(session_id, |_, lock| Arc::strong_count(lock) <= 2);
        drop(guard);

        Ok(())
    }

    /// Ids of every stored session, sorted.
    pub async fn list_sessions(&self) -> Res<Vec<String>> {
        let mut ids = self.db.list_session_ids().await?;
        ids.sort();

        Ok(ids)
    }

    /// Counts, timestamps, and preview of a session.
    #[instrument(skip(self))]
    pub async fn describe(&self, session_id: &str) -> Res<SessionSummary> {
        let record = self.db.get_session(session_id).await?.ok_or_else(|| BotError::RecordNotFound(format!("session:{session_id}")))?;

        Ok(SessionSummary {
            session_id: record.session_id,
            count: record.messages.len(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            preview: record.preview,
        })
    }

    async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(session_id.to_string()).or_default().clone();
        lock.lock_owned().await
    }
}

// Helpers.

fn validate_session_id(session_id: &str) -> Void {
    if session_id.is_empty() {
        return Err(anyhow::anyhow!("Session id must not be empty."));
    }

    Ok(())
}

/// Keep a leading system message plus the newest `capacity - 1` turns, or the newest
/// `capacity` turns when there is no leading system message.
pub fn trim_to_capacity(messages: &mut Vec<ChatMessage>, capacity: usize) {
    if messages.len() <= capacity {
        return;
    }

    let keep_system = messages.first().map(|m| m.role == ChatRole::System).unwrap_or(false);

    if keep_system {
        let excess = messages.len() - capacity;
        messages.drain(1..1 + excess);
    } else {
        let excess = messages.len() - capacity;
        messages.drain(..excess);
    }
}

/// The first `PREVIEW_LENGTH` characters of `content`, with `...` when truncated.
pub fn preview_of(content: &str) -> String {
    if content.chars().count() > PREVIEW_LENGTH {
        format!("{}...", content.chars().take(PREVIEW_LENGTH).collect::<String>())
    } else {
        content.to_string()
    }
}

// Tests.
