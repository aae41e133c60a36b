//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc, time::Duration};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::base::prompts;

use super::types::Res;

/// Default OpenAI-compatible API base URL.
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Default chat-completion model.
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default sampling temperature.
fn default_openai_temperature() -> f32 {
    0.7
}

/// Default max output tokens.
fn default_openai_max_tokens() -> u32 {
    4096
}

/// Default per-request timeout for the completion API, in seconds.
fn default_openai_timeout_secs() -> u64 {
    60
}

/// Default system directive for conversational replies.
fn default_system_directive() -> String {
    prompts::SYSTEM_DIRECTIVE.to_string()
}

/// Default help text.
fn default_help_message() -> String {
    prompts::HELP_MESSAGE.to_string()
}

/// Default OneBot HTTP API URL.
fn default_onebot_api_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

/// Default listen address for inbound OneBot events.
fn default_onebot_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Default database endpoint (in-memory SurrealDB).
fn default_db_endpoint() -> String {
    "mem://".to_string()
}

fn default_db_namespace() -> String {
    "kr".to_string()
}

fn default_db_database() -> String {
    "bot".to_string()
}

/// Default number of turns retained per chat session.
fn default_session_capacity() -> usize {
    crate::service::session::DEFAULT_SESSION_CAPACITY
}

/// Default path to the MCP server descriptor file.
fn default_mcp_config_path() -> String {
    ".hidden/mcp.json".to_string()
}

fn default_mcp_connect_timeout_ms() -> u64 {
    30_000
}

fn default_mcp_ping_interval_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_mcp_max_retries() -> u32 {
    3
}

fn default_mcp_retry_delay_ms() -> u64 {
    2_000
}

fn default_mcp_tool_call_timeout_ms() -> u64 {
    30_000
}

/// Configuration for the kr-bot application.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inner: Arc::new(ConfigInner::default()),
        }
    }
}

/// A holiday reported by the holiday countdown.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Holiday {
    pub name: String,
    /// First day off.
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// OpenAI API key (`KR_BOT_OPENAI_API_KEY`).
    pub openai_api_key: String,
    /// OpenAI-compatible API base URL (`KR_BOT_OPENAI_BASE_URL`).
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    /// Chat-completion model to use (`KR_BOT_OPENAI_MODEL`).
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    /// Sampling temperature (`KR_BOT_OPENAI_TEMPERATURE`).
    /// Value between 0 and 2.
    #[serde(default = "default_openai_temperature")]
    pub openai_temperature: f32,
    /// Max output tokens (`KR_BOT_OPENAI_MAX_TOKENS`).
    #[serde(default = "default_openai_max_tokens")]
    pub openai_max_tokens: u32,
    /// Timeout of a single completion request in seconds (`KR_BOT_OPENAI_TIMEOUT_SECS`).
    #[serde(default = "default_openai_timeout_secs")]
    pub openai_timeout_secs: u64,
    /// System directive for conversational replies (`KR_BOT_SYSTEM_DIRECTIVE`).
    #[serde(default = "default_system_directive")]
    pub system_directive: String,
    /// Text returned by the help rule (`KR_BOT_HELP_MESSAGE`).
    #[serde(default = "default_help_message")]
    pub help_message: String,
    /// Accounts the conversational rule never answers (`KR_BOT_BLOCKED_ACCOUNTS`).
    #[serde(default)]
    pub blocked_accounts: Vec<i64>,
    /// Holidays the holiday countdown reports, in order (`holidays` table array in the config file).
    #[serde(default)]
    pub holidays: Vec<Holiday>,
    /// Weekend days that are working days, for the working-day count (`KR_BOT_MAKEUP_WORKDAYS`).
    #[serde(default)]
    pub makeup_workdays: Vec<NaiveDate>,
    /// Directive for the encouragement rule; the rule stays off while unset (`KR_BOT_SMART_REPLY_DIRECTIVE`).
    #[serde(default)]
    pub smart_reply_directive: Option<String>,
    /// OneBot HTTP API URL used to send replies (`KR_BOT_ONEBOT_API_URL`).
    #[serde(default = "default_onebot_api_url")]
    pub onebot_api_url: String,
    /// Optional OneBot access token (`KR_BOT_ONEBOT_ACCESS_TOKEN`).
    #[serde(default)]
    pub onebot_access_token: Option<String>,
    /// Address the inbound event webhook listens on (`KR_BOT_ONEBOT_LISTEN_ADDR`).
    #[serde(default = "default_onebot_listen_addr")]
    pub onebot_listen_addr: String,
    /// Database endpoint URL (`KR_BOT_DB_ENDPOINT`); `memory` selects the in-process store.
    #[serde(default = "default_db_endpoint")]
    pub db_endpoint: String,
    /// Database username (`KR_BOT_DB_USERNAME`).
    #[serde(default)]
    pub db_username: String,
    /// Database password (`KR_BOT_DB_PASSWORD`).
    #[serde(default)]
    pub db_password: String,
    /// Database namespace (`KR_BOT_DB_NAMESPACE`).
    #[serde(default = "default_db_namespace")]
    pub db_namespace: String,
    /// Database name (`KR_BOT_DB_DATABASE`).
    #[serde(default = "default_db_database")]
    pub db_database: String,
    /// Turns retained per chat session (`KR_BOT_SESSION_CAPACITY`).
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
    /// Path to the MCP server descriptor file (`KR_BOT_MCP_CONFIG_PATH`).
    #[serde(default = "default_mcp_config_path")]
    pub mcp_config_path: String,
    /// Timeout for establishing a tool endpoint connection (`KR_BOT_MCP_CONNECT_TIMEOUT_MS`).
    #[serde(default = "default_mcp_connect_timeout_ms")]
    pub mcp_connect_timeout_ms: u64,
    /// Health-check interval for connected tool endpoints (`KR_BOT_MCP_PING_INTERVAL_MS`).
    /// Zero disables health checks.
    #[serde(default = "default_mcp_ping_interval_ms")]
    pub mcp_ping_interval_ms: u64,
    /// Whether failed health checks schedule reconnects (`KR_BOT_MCP_AUTO_RECONNECT`).
    #[serde(default = "default_true")]
    pub mcp_auto_reconnect: bool,
    /// Maximum automatic reconnect attempts (`KR_BOT_MCP_MAX_RETRIES`).
    #[serde(default = "default_mcp_max_retries")]
    pub mcp_max_retries: u32,
    /// Base reconnect delay; attempt `n` waits `n` times this (`KR_BOT_MCP_RETRY_DELAY_MS`).
    #[serde(default = "default_mcp_retry_delay_ms")]
    pub mcp_retry_delay_ms: u64,
    /// Hard timeout for a single tool call (`KR_BOT_MCP_TOOL_CALL_TIMEOUT_MS`).
    #[serde(default = "default_mcp_tool_call_timeout_ms")]
    pub mcp_tool_call_timeout_ms: u64,
}

impl Default for ConfigInner {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            openai_model: default_openai_model(),
            openai_temperature: default_openai_temperature(),
            openai_max_tokens: default_openai_max_tokens(),
            openai_timeout_secs: default_openai_timeout_secs(),
            system_directive: default_system_directive(),
            help_message: default_help_message(),
            blocked_accounts: Vec::new(),
            holidays: Vec::new(),
            makeup_workdays: Vec::new(),
            smart_reply_directive: None,
            onebot_api_url: default_onebot_api_url(),
            onebot_access_token: None,
            onebot_listen_addr: default_onebot_listen_addr(),
            db_endpoint: default_db_endpoint(),
            db_username: String::new(),
            db_password: String::new(),
            db_namespace: default_db_namespace(),
            db_database: default_db_database(),
            session_capacity: default_session_capacity(),
            mcp_config_path: default_mcp_config_path(),
            mcp_connect_timeout_ms: default_mcp_connect_timeout_ms(),
            mcp_ping_interval_ms: default_mcp_ping_interval_ms(),
            mcp_auto_reconnect: true,
            mcp_max_retries: default_mcp_max_retries(),
            mcp_retry_delay_ms: default_mcp_retry_delay_ms(),
            mcp_tool_call_timeout_ms: default_mcp_tool_call_timeout_ms(),
        }
    }
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(
            config::Environment::default()
                .prefix("KR_BOT")
                .list_separator(",")
                .with_list_parse_key("blocked_accounts")
                .with_list_parse_key("makeup_workdays")
                .try_parsing(true),
        );

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Res<()> {
        if self.openai_temperature < 0.0 || self.openai_temperature > 2.0 {
            return Err(anyhow::anyhow!("OpenAI temperature must be between 0 and 2."));
        }

        if self.openai_max_tokens < 1 || self.openai_max_tokens > 128000 {
            return Err(anyhow::anyhow!("OpenAI max tokens must be between 1 and 128000."));
        }

        if self.session_capacity < 2 {
            return Err(anyhow::anyhow!("Session capacity must be at least 2."));
        }

        if self.mcp_tool_call_timeout_ms == 0 {
            return Err(anyhow::anyhow!("MCP tool call timeout must be greater than zero."));
        }

        Ok(())
    }
}

impl ConfigInner {
    pub fn openai_timeout(&self) -> Duration {
        Duration::from_secs(self.openai_timeout_secs)
    }

    pub fn mcp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.mcp_connect_timeout_ms)
    }

    pub fn mcp_ping_interval(&self) -> Duration {
        Duration::from_millis(self.mcp_ping_interval_ms)
    }

    pub fn mcp_retry_delay(&self) -> Duration {
        Duration::from_millis(self.mcp_retry_delay_ms)
    }

    pub fn mcp_tool_call_timeout(&self) -> Duration {
        Duration::from_millis(self.mcp_tool_call_timeout_ms)
    }
}

// Tests.
