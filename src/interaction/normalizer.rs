//! Turns raw OneBot events into [`NormalizedMessage`]s.
//!
//! The scene of a message is decided here, exactly once, and never recomputed downstream.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::base::{
    error::{BotError, BotErrorExt},
    types::{ConversationKey, Res, Scene},
};

// Types.

/// A raw inbound event, in the OneBot v11 wire shape.
///
/// Only the fields the core reads are modelled; anything else is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub post_type: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub self_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Unix seconds.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub message: MessageBody,
}

impl RawEvent {
    /// Whether this event carries a chat message (as opposed to a heartbeat, notice, etc.).
    pub fn is_message(&self) -> bool {
        self.post_type == "message"
    }
}

/// The body of a message: either structured segments or a plain string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Segments(Vec<Segment>),
    Plain(String),
}

impl Default for MessageBody {
    fn default() -> Self {
        MessageBody::Plain(String::new())
    }
}

/// One segment of a structured message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            data: serde_json::json!({ "text": text.into() }),
        }
    }
}

/// Who a message mentions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mention {
    Account(i64),
    All,
}

/// A classified inbound message.  Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub raw: Arc<RawEvent>,
    pub scene: Scene,
    pub mentioned: Option<Mention>,
    pub text: String,
    pub conversation: ConversationKey,
    pub sender: i64,
    pub self_id: i64,
    pub timestamp: DateTime<Utc>,
}

// Operations.

/// Classify a raw event.
///
/// Fails with [`BotError::UnrecognizedEventKind`] when the origin type is neither `group`
/// nor `private`, or when a group event does not name its group.
pub fn normalize(raw: RawEvent) -> Res<NormalizedMessage> {
    let conversation = match raw.message_type.as_str() {
        "group" => match raw.group_id {
            Some(group_id) => ConversationKey::Group(group_id),
            None => return Err(BotError::UnrecognizedEventKind("group event without group_id".to_string()).into()),
        },
        "private" => ConversationKey::Private(raw.user_id),
        other => return Err(BotError::UnrecognizedEventKind(other.to_string()).into()),
    };

    let mentioned = match extract_mention(&raw.raw_message) {
        Ok(mention) => mention,
        Err(err) if err.bot_error().is_some() => {
            warn!("Treating malformed mention as no mention: {}", err);
            None
        }
        Err(err) => return Err(err),
    };

    let scene = match conversation {
        ConversationKey::Private(_) => Scene::Private,
        ConversationKey::Group(_) => match mentioned {
            Some(Mention::All) => Scene::MentionsAll,
            Some(Mention::Account(id)) if id == raw.self_id => Scene::MentionsBot,
            Some(Mention::Account(_)) => Scene::MentionsOther,
            None => Scene::Group,
        },
    };

    let text = extract_text(&raw);
    let timestamp = Utc.timestamp_opt(raw.time, 0).single().unwrap_or_else(Utc::now);

    Ok(NormalizedMessage {
        sender: raw.user_id,
        self_id: raw.self_id,
        raw: Arc::new(raw),
        scene,
        mentioned,
        text,
        conversation,
        timestamp,
    })
}

/// Concatenate the text segments of a structured body with a single space between them.
///
/// Plain-string bodies are used as-is.
pub fn extract_text(raw: &RawEvent) -> String {
    match &raw.message {
        MessageBody::Plain(text) => text.clone(),
        MessageBody::Segments(segments) => segments
            .iter()
            .filter(|s| s.kind == "text")
            .filter_map(|s| s.data.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Find the first `[CQ:at,qq=<id>]` marker in the raw message.
///
/// Returns `Ok(None)` when there is no marker at all, and [`BotError::MalformedMention`]
/// when the marker is there but its identity is neither `all` nor a number.
pub fn extract_mention(raw_message: &str) -> Res<Option<Mention>> {
    let Some(captures) = mention_regex().captures(raw_message) else {
        return Ok(None);
    };

    let identity = captures.get(1).map(|m| m.as_str().trim()).unwrap_or_default();

    if identity == "all" {
        return Ok(Some(Mention::All));
    }

    identity
        .parse::<i64>()
        .map(|id| Some(Mention::Account(id)))
        .map_err(|_| BotError::MalformedMention(captures[0].to_string()).into())
}

// Helpers.

static MENTION_REGEX: OnceLock<Regex> = OnceLock::new();

/// Matches a CQ mention marker and captures its identity.
fn mention_regex() -> &'static Regex {
    MENTION_REGEX.get_or_init(|| Regex::new(r"\[CQ:at,qq=([^,\]]*)").unwrap())
}

// Tests.
