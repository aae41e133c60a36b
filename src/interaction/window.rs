//! Bounded, per-conversation history of recent messages.

use std::{collections::VecDeque, sync::Arc};

use dashmap::DashMap;

use crate::{base::types::ConversationKey, interaction::normalizer::NormalizedMessage};

/// Number of messages retained per conversation.
pub const WINDOW_CAPACITY: usize = 30;

/// An immutable copy of a conversation's recent messages, oldest first.
pub type WindowSnapshot = Arc<Vec<Arc<NormalizedMessage>>>;

/// Recent messages for every conversation, in memory only.
///
/// Appends and snapshots on one key are serialized by that key's shard lock; different
/// keys do not contend.  It is trivially cloneable.
#[derive(Clone, Default)]
pub struct ConversationWindow {
    inner: Arc<DashMap<ConversationKey, VecDeque<Arc<NormalizedMessage>>>>,
}

impl ConversationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a message onto its conversation, evicting the oldest past capacity.
    pub fn append(&self, message: Arc<NormalizedMessage>) {
        let mut entry = self.inner.entry(message.conversation).or_insert_with(|| VecDeque::with_capacity(WINDOW_CAPACITY));
        push_bounded(&mut entry, message);
    }

    /// Copy of the current window for `key`; empty when the conversation is unknown.
    pub fn snapshot(&self, key: &ConversationKey) -> WindowSnapshot {
        let messages = self.inner.get(key).map(|entry| entry.iter().cloned().collect()).unwrap_or_default();

        Arc::new(messages)
    }

    /// Append a message and return the snapshot that includes it, under a single lock.
    pub fn record(&self, message: Arc<NormalizedMessage>) -> WindowSnapshot {
        let mut entry = self.inner.entry(message.conversation).or_insert_with(|| VecDeque::with_capacity(WINDOW_CAPACITY));
        push_bounded(&mut entry, message);

        Arc::new(entry.iter().cloned().collect())
    }

    pub fn len(&self, key: &ConversationKey) -> usize {
        self.inner.get(key).map(|entry| entry.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, key: &ConversationKey) -> bool {
        self.len(key) == 0
    }
}

// Helpers.

fn push_bounded(queue: &mut VecDeque<Arc<NormalizedMessage>>, message: Arc<NormalizedMessage>) {
    while queue.len() >= WINDOW_CAPACITY {
        queue.pop_front();
    }
    queue.push_back(message);
}

// Tests.
