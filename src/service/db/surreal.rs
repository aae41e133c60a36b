//! SurrealDB implementation for kr-bot data storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::{
    Surreal,
    engine::any::{self, Any},
    opt::auth::Root,
};
use tracing::{info, instrument};

use crate::base::{
    config::Config,
    types::{ChatMessage, Res, Scene, Void},
};

use super::{ConditionType, DbClient, DirectiveRecord, DynamicRuleRecord, GenericDbClient, RuleContentType, SessionRecord};

const RULE_TABLE: &str = "dynamic_rule";
const SESSION_TABLE: &str = "session";
const DIRECTIVE_TABLE: &str = "directive";

// Extra methods on `DbClient` applied by the surreal implementation.

impl DbClient {
    /// Connect to the SurrealDB instance named by the configuration.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let client = SurrealDbClient::new(config).await?;
        Ok(Self { inner: Arc::new(client) })
    }

    /// An embedded, in-memory SurrealDB instance.
    pub async fn surreal_memory() -> Res<Self> {
        Self::surreal(&Config::default()).await
    }
}

// Row types.

/// Rule row as stored; the record id is `dynamic_rule:<rule_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleRow {
    rule_id: i64,
    condition_type: ConditionType,
    condition_value: String,
    content_type: RuleContentType,
    content: String,
    sequence: i64,
    scene: Scene,
    description: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<&DynamicRuleRecord> for RuleRow {
    fn from(record: &DynamicRuleRecord) -> Self {
        Self {
            rule_id: record.id,
            condition_type: record.condition_type,
            condition_value: record.condition_value.clone(),
            content_type: record.content_type,
            content: record.content.clone(),
            sequence: record.sequence,
            scene: record.scene,
            description: record.description.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            deleted_at: record.deleted_at,
        }
    }
}

impl From<RuleRow> for DynamicRuleRecord {
    fn from(row: RuleRow) -> Self {
        Self {
            id: row.rule_id,
            condition_type: row.condition_type,
            condition_value: row.condition_value,
            content_type: row.content_type,
            content: row.content,
            sequence: row.sequence,
            scene: row.scene,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

/// Session row as stored; the record id is `session:<session_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRow {
    session_id: String,
    messages: Vec<ChatMessage>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    preview: Option<String>,
}

impl From<&SessionRecord> for SessionRow {
    fn from(record: &SessionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            messages: record.messages.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            preview: record.preview.clone(),
        }
    }
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            session_id: row.session_id,
            messages: row.messages,
            created_at: row.created_at,
            updated_at: row.updated_at,
            preview: row.preview,
        }
    }
}

// Specific implementations.

/// SurrealDB client implementation.
pub struct SurrealDbClient {
    db: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect, sign in (except for embedded memory), and select the namespace and database.
    #[instrument(name = "SurrealDbClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        let db = any::connect(config.db_endpoint.as_str()).await?;

        if !config.db_endpoint.starts_with("mem://") {
            db.signin(Root {
                username: &config.db_username,
                password: &config.db_password,
            })
            .await?;
        }

        db.use_ns(config.db_namespace.as_str()).use_db(config.db_database.as_str()).await?;

        info!("Database `{}` initialized successfully.", config.db_endpoint);

        Ok(Self { db })
    }
}

#[async_trait]
impl GenericDbClient for SurrealDbClient {
    #[instrument(skip(self))]
    async fn list_rules(&self) -> Res<Vec<DynamicRuleRecord>> {
        let rows: Vec<RuleRow> = self.db.query("SELECT * OMIT id FROM type::table($table) ORDER BY sequence ASC").bind(("table", RULE_TABLE)).await?.take(0)?;

        Ok(rows.into_iter().map(DynamicRuleRecord::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_rule(&self, id: i64) -> Res<Option<DynamicRuleRecord>> {
        let rows: Vec<RuleRow> = self
            .db
            .query("SELECT * OMIT id FROM type::thing($table, $id)")
            .bind(("table", RULE_TABLE))
            .bind(("id", id))
            .await?
            .take(0)?;

        Ok(rows.into_iter().next().map(DynamicRuleRecord::from))
    }

    #[instrument(skip_all)]
    async fn put_rule(&self, record: &DynamicRuleRecord) -> Void {
        self.db
            .query("UPSERT type::thing($table, $id) CONTENT $row RETURN NONE")
            .bind(("table", RULE_TABLE))
            .bind(("id", record.id))
            .bind(("row", RuleRow::from(record)))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn swap_rule_sequences(&self, first: i64, second: i64, now: DateTime<Utc>) -> Void {
        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                LET $first_rule = type::thing($table, $first);
                LET $second_rule = type::thing($table, $second);
                LET $first_sequence = $first_rule.sequence;
                LET $second_sequence = $second_rule.sequence;
                IF $first_sequence = NONE OR $second_sequence = NONE {
                    THROW "dynamic rule not found";
                };
                UPDATE $first_rule SET sequence = $second_sequence, updated_at = $now RETURN NONE;
                UPDATE $second_rule SET sequence = $first_sequence, updated_at = $now RETURN NONE;
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("table", RULE_TABLE))
            .bind(("first", first))
            .bind(("second", second))
            .bind(("now", now))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_session(&self, session_id: &str) -> Res<Option<SessionRecord>> {
        let rows: Vec<SessionRow> = self
            .db
            .query("SELECT * OMIT id FROM type::thing($table, $id)")
            .bind(("table", SESSION_TABLE))
            .bind(("id", session_id.to_string()))
            .await?
            .take(0)?;

        Ok(rows.into_iter().next().map(SessionRecord::from))
    }

    #[instrument(skip_all)]
    async fn put_session(&self, record: &SessionRecord) -> Void {
        self.db
            .query("UPSERT type::thing($table, $id) CONTENT $row RETURN NONE")
            .bind(("table", SESSION_TABLE))
            .bind(("id", record.session_id.clone()))
            .bind(("row", SessionRow::from(record)))
            .await?
            .check()?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_session(&self, session_id: &str) -> Res<bool> {
        let existed = self.get_session(session_id).await?.is_some();

        self.db
            .query("DELETE type::thing($table, $id) RETURN NONE")
            .bind(("table", SESSION_TABLE))
            .bind(("id", session_id.to_string()))
            .await?
            .check()?;

        Ok(existed)
    }

    #[instrument(skip(self))]
    async fn list_session_ids(&self) -> Res<Vec<String>> {
        let ids: Vec<String> = self.db.query("SELECT VALUE session_id FROM type::table($table)").bind(("table", SESSION_TABLE)).await?.take(0)?;

        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn get_directive(&self, key: &str) -> Res<Option<DirectiveRecord>> {
        let rows: Vec<DirectiveRecord> = self
            .db
            .query("SELECT * OMIT id FROM type::thing($table, $id)")
            .bind(("table", DIRECTIVE_TABLE))
            .bind(("id", key.to_string()))
            .await?
            .take(0)?;

        Ok(rows.into_iter().next())
    }

    #[instrument(skip_all)]
    async fn put_directive(&self, record: &DirectiveRecord) -> Void {
        self.db
            .query("UPSERT type::thing($table, $id) CONTENT $row RETURN NONE")
            .bind(("table", DIRECTIVE_TABLE))
            .bind(("id", record.key.clone()))
            .bind(("row", record.clone()))
            .await?
            .check()?;

        Ok(())
    }
}

// Tests.
