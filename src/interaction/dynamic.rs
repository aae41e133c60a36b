//! Administrator-defined rules, persisted and compiled into [`Rule`]s.
//!
//! Live records are totally ordered by `sequence`; every mutation goes through one writer
//! lock so concurrent upserts, deletes, and moves cannot break that order.

use std::{collections::HashMap, pin::Pin, sync::Arc};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{
    base::{
        error::BotError,
        types::{Res, Reply, Scene, Void},
    },
    interaction::rule::{Priority, Rule, TriggerContext},
    service::db::{ConditionType, DbClient, DynamicRuleRecord, RuleContentType},
};

// Types.

/// A named, built-in action that dynamic rules can refer to.
pub type BoxedHandler = Arc<dyn Fn(TriggerContext) -> Pin<Box<dyn Future<Output = Res<Reply>> + Send>> + Send + Sync>;

/// The handlers dynamic rules may name with a `handlerRef` content type.
#[derive(Clone, Default)]
pub struct HandlerPool {
    handlers: HashMap<String, BoxedHandler>,
}

impl HandlerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A, F>(&mut self, name: impl Into<String>, action: A)
    where
        A: Fn(TriggerContext) -> F + Send + Sync + 'static,
        F: Future<Output = Res<Reply>> + Send + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(move |context| Box::pin(action(context))));
    }

    pub fn get(&self, name: &str) -> Option<BoxedHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self.handlers.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

/// The editable fields of a dynamic rule.
///
/// `id: None` creates a new rule; `Some(id)` updates that rule in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRuleDraft {
    pub id: Option<i64>,
    pub condition_type: ConditionType,
    pub condition_value: String,
    pub content_type: RuleContentType,
    pub content: String,
    pub scene: Scene,
    pub description: String,
}

/// Which way a rule moves in the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

// Structs.

/// Dynamic rule store.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DynamicRuleStore {
    db: DbClient,
    writer: Arc<Mutex<()>>,
}

impl DynamicRuleStore {
    pub fn new(db: DbClient) -> Self {
        Self {
            db,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Live records, ordered by `sequence`.
    pub async fn list_live(&self) -> Res<Vec<DynamicRuleRecord>> {
        Ok(self.db.list_rules().await?.into_iter().filter(DynamicRuleRecord::is_live).collect())
    }

    /// Create or update a rule.
    ///
    /// New rules get `id = max(id) + 1` and are appended after every live rule.  Updates keep
    /// the rule's place; updating a missing or soft-deleted rule fails with
    /// [`BotError::RecordNotFound`].
    #[instrument(skip(self, draft))]
    pub async fn upsert(&self, draft: DynamicRuleDraft) -> Res<DynamicRuleRecord> {
        let _guard = self.writer.lock().await;
        let now = Utc::now();

        let record = match draft.id {
            Some(id) => {
                let existing = self.db.get_rule(id).await?.filter(DynamicRuleRecord::is_live).ok_or_else(|| not_found(id))?;

                DynamicRuleRecord {
                    condition_type: draft.condition_type,
                    condition_value: draft.condition_value,
                    content_type: draft.content_type,
                    content: draft.content,
                    scene: draft.scene,
                    description: draft.description,
                    updated_at: now,
                    ..existing
                }
            }
            None => {
                let all = self.db.list_rules().await?;

                let id = all.iter().map(|r| r.id).max().map(|max| max + 1).unwrap_or(1);
                let sequence = all.iter().filter(|r| r.is_live()).map(|r| r.sequence).max().map(|max| max + 1).unwrap_or(0);

                DynamicRuleRecord {
                    id,
                    condition_type: draft.condition_type,
                    condition_value: draft.condition_value,
                    content_type: draft.content_type,
                    content: draft.content,
                    sequence,
                    scene: draft.scene,
                    description: draft.description,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                }
            }
        };

        self.db.put_rule(&record).await?;

        info!("Saved dynamic rule {} at sequence {}.", record.id, record.sequence);

        Ok(record)
    }

    /// Mark a rule deleted.  It stops being live but keeps its record.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, id: i64) -> Void {
        let _guard = self.writer.lock().await;

        let mut record = self.db.get_rule(id).await?.filter(DynamicRuleRecord::is_live).ok_or_else(|| not_found(id))?;

        let now = Utc::now();
        record.deleted_at = Some(now);
        record.updated_at = now;

        self.db.put_rule(&record).await
    }

    /// Swap a rule with the live rule just before it.
    pub async fn move_up(&self, id: i64) -> Void {
        self.move_rule(id, Direction::Up).await
    }

    /// Swap a rule with the live rule just after it.
    pub async fn move_down(&self, id: i64) -> Void {
        self.move_rule(id, Direction::Down).await
    }

    /// Compile every live record, in order, into a dynamic [`Rule`].
    ///
    /// Records naming an unknown handler are skipped with a warning.
    #[instrument(skip_all)]
    pub async fn load_dynamic_rules(&self, handlers: &HandlerPool) -> Res<Vec<Rule>> {
        let records = self.list_live().await?;

        let rules = records
            .iter()
            .filter_map(|record| match compile(record, handlers) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    warn!("Skipping dynamic rule {}: {}", record.id, err);
                    None
                }
            })
            .collect::<Vec<_>>();

        info!("Loaded {} of {} dynamic rules.", rules.len(), records.len());

        Ok(rules)
    }

    #[instrument(skip(self))]
    async fn move_rule(&self, id: i64, direction: Direction) -> Void {
        let _guard = self.writer.lock().await;

        let live = self.list_live().await?;
        let position = live.iter().position(|r| r.id == id).ok_or_else(|| not_found(id))?;

        let neighbor = match direction {
            Direction::Up => position.checked_sub(1).and_then(|p| live.get(p)),
            Direction::Down => live.get(position + 1),
        }
        .ok_or(BotError::NoNeighbor(id))?;

        self.db.swap_rule_sequences(id, neighbor.id, Utc::now()).await
    }
}

// Helpers.

fn not_found(id: i64) -> BotError {
    BotError::RecordNotFound(format!("dynamic_rule:{id}"))
}

/// Whether `text` satisfies a dynamic rule's condition.
pub fn condition_matches(condition_type: ConditionType, value: &str, text: &str) -> bool {
    match condition_type {
        ConditionType::Equals => text.trim() == value,
        ConditionType::Contains => text.contains(value),
        ConditionType::StartsWith => text.trim().starts_with(value),
        ConditionType::EndsWith => text.trim().ends_with(value),
    }
}

/// Turn a record into a dynamic rule.  Fails when it names an unknown handler.
pub fn compile(record: &DynamicRuleRecord, handlers: &HandlerPool) -> Res<Rule> {
    let condition_type = record.condition_type;
    let value = record.condition_value.clone();
    let condition = move |context: &TriggerContext| Ok(condition_matches(condition_type, &value, &context.message.text));

    let description = if record.description.is_empty() {
        format!("dynamic rule {}", record.id)
    } else {
        record.description.clone()
    };

    let rule = match record.content_type {
        RuleContentType::Text => {
            let content = record.content.clone();
            Rule::new(Priority::Dynamic, [record.scene], description, condition, move |_| {
                let content = content.clone();
                async move { Ok(Reply::text(content)) }
            })
        }
        RuleContentType::HandlerRef => {
            let handler = handlers.get(&record.content).ok_or_else(|| anyhow::anyhow!("unknown handler `{}`", record.content))?;
            Rule::new(Priority::Dynamic, [record.scene], description, condition, move |context| handler(context))
        }
    };

    Ok(rule)
}

// Tests.
