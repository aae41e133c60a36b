//! Runtime services and shared state for kr-bot.

use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    interaction::{
        builtin::{builtin_handlers, builtin_rules},
        dispatcher::Dispatcher,
        dynamic::DynamicRuleStore,
        orchestrator::Orchestrator,
    },
    service::{
        chat::ChatClient,
        db::DbClient,
        directive::DirectiveStore,
        llm::LlmClient,
        mcp::{
            get_servers_from_mcp_json, load_mcp_json,
            manager::{ToolManager, ToolPolicy},
            transport::ToolTransportClient,
        },
        session::SessionStore,
    },
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds every service client, the tool manager, and the dispatcher.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The database client instance.
    pub db: DbClient,
    /// The LLM client instance.
    pub llm: LlmClient,
    /// The chat client instance.
    pub chat: ChatClient,
    /// The tool-connection manager.
    pub tools: ToolManager,
    /// The dispatcher every inbound event goes through.
    pub dispatcher: Dispatcher,
}

impl Runtime {
    /// Create a new runtime instance with the configured backends.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the database.
        let db = DbClient::from_config(&config).await?;

        // Initialize the LLM client.
        let llm = LlmClient::openai(&config);

        // Initialize the chat client.
        let chat = ChatClient::onebot(&config)?;

        // Initialize the tool endpoints.
        let tools = ToolManager::new(ToolTransportClient::rmcp(), ToolPolicy::from_config(&config));
        let servers = get_servers_from_mcp_json(load_mcp_json(&config.mcp_config_path)?)?;
        tools.connect_all(servers).await;

        Self::from_parts(config, db, llm, chat, tools).await
    }

    /// Wire a runtime from already-built clients: register the built-in rules and load the
    /// dynamic ones.
    #[instrument(skip_all)]
    pub async fn from_parts(config: Config, db: DbClient, llm: LlmClient, chat: ChatClient, tools: ToolManager) -> Res<Self> {
        let sessions = SessionStore::new(db.clone(), config.session_capacity);
        let orchestrator = Orchestrator::new(llm.clone(), sessions, DirectiveStore::new(db.clone()), tools.clone(), config.clone());
        let dispatcher = Dispatcher::new(DynamicRuleStore::new(db.clone()), builtin_handlers(), orchestrator, chat.clone());

        for rule in builtin_rules() {
            dispatcher.registry().register_static_rule(rule);
        }

        let dynamic = dispatcher.reload_dynamic_rules().await?;

        info!("Registered {} static and {} dynamic rules.", dispatcher.registry().static_len(), dynamic);

        Ok(Self {
            config,
            db,
            llm,
            chat,
            tools,
            dispatcher,
        })
    }

    /// Run the chat listener until it stops, then close every tool endpoint.
    pub async fn start(&self) -> Void {
        let result = self.chat.start(self.dispatcher.clone()).await;

        self.tools.disconnect_all().await;

        result
    }
}
