//! Connection lifecycle of tool endpoints, and the aggregate tool catalog.
//!
//! Every endpoint moves through
//! `Disconnected -> Connecting -> Connected -> (HealthCheckFailed -> ReconnectScheduled -> Connecting) | Disconnected`.
//! Health checks and reconnect backoff run on their own tasks, cancelled through the
//! endpoint's [`CancellationToken`] whenever the endpoint is disconnected or replaced.

use std::{collections::HashMap, ops::Deref, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::base::{
    config::Config,
    error::BotError,
    types::{Res, Void},
};

use super::{
    McpServer,
    transport::{RemoteTool, ToolSession, ToolTransportClient},
};

// Types.

/// Connection policy shared by all endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolPolicy {
    pub connect_timeout: Duration,
    /// Zero disables health checks.
    pub ping_interval: Duration,
    pub auto_reconnect: bool,
    pub max_retries: u32,
    /// Attempt `n` waits `n * retry_delay`.
    pub retry_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(10),
            auto_reconnect: true,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl ToolPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.mcp_connect_timeout(),
            ping_interval: config.mcp_ping_interval(),
            auto_reconnect: config.mcp_auto_reconnect,
            max_retries: config.mcp_max_retries,
            retry_delay: config.mcp_retry_delay(),
            call_timeout: config.mcp_tool_call_timeout(),
        }
    }
}

/// Lifecycle state of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointState {
    Disconnected,
    Connecting,
    Connected,
    HealthCheckFailed,
    ReconnectScheduled,
}

/// A tool in the aggregate catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Identity of the endpoint that serves the tool.
    pub endpoint: String,
    /// The tool's name on its endpoint.
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Fields the input schema lists as `required`.
    pub required: Vec<String>,
}

impl ToolDefinition {
    pub fn from_remote(endpoint: &str, tool: RemoteTool) -> Self {
        let required = tool
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            endpoint: endpoint.to_string(),
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
            required,
        }
    }

    /// `endpoint.name`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.endpoint, self.name)
    }
}

/// Point-in-time view of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStatus {
    pub name: String,
    pub state: EndpointState,
    pub retry_count: u32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub tool_count: usize,
}

/// The caller-facing shape of a tool call.  Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallResult {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
}

struct Endpoint {
    server: McpServer,
    state: EndpointState,
    session: Option<Arc<dyn ToolSession>>,
    tools: Vec<ToolDefinition>,
    last_health_check: Option<DateTime<Utc>>,
    retry_count: u32,
    cancel: CancellationToken,
}

impl Endpoint {
    fn new(server: McpServer) -> Self {
        Self {
            server,
            state: EndpointState::Disconnected,
            session: None,
            tools: Vec::new(),
            last_health_check: None,
            retry_count: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Drop the session and tools, and stop any background task.
    fn tear_down(&mut self, state: EndpointState) {
        self.cancel.cancel();
        self.state = state;
        self.session = None;
        self.tools.clear();
    }
}

// Structs.

/// Tool-connection manager.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ToolManager {
    inner: Arc<ToolManagerInner>,
}

impl Deref for ToolManager {
    type Target = ToolManagerInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub struct ToolManagerInner {
    transport: ToolTransportClient,
    policy: ToolPolicy,
    endpoints: RwLock<HashMap<String, Endpoint>>,
    catalog: ArcSwap<Vec<ToolDefinition>>,
}

impl ToolManager {
    pub fn new(transport: ToolTransportClient, policy: ToolPolicy) -> Self {
        Self {
            inner: Arc::new(ToolManagerInner {
                transport,
                policy,
                endpoints: RwLock::new(HashMap::new()),
                catalog: ArcSwap::from_pointee(Vec::new()),
            }),
        }
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Connect every server, concurrently.  Failures are logged and leave that endpoint
    /// `Disconnected`; they do not fail the whole batch.
    #[instrument(skip_all)]
    pub async fn connect_all(&self, servers: Vec<McpServer>) {
        let tasks = servers.into_iter().map(|server| {
            let name = server.name.clone();
            async move {
                if let Err(err) = self.connect(server).await {
                    warn!("Tool endpoint `{}` is unavailable: {}", name, err);
                }
            }
        });

        futures::future::join_all(tasks).await;
    }

    /// Establish a session with `server` and fetch its catalog.
    ///
    /// Replaces any endpoint with the same name.  On failure the endpoint stays
    /// `Disconnected` and [`BotError::ConnectionFailed`] is returned.
    #[instrument(skip_all, fields(endpoint = %server.name))]
    pub async fn connect(&self, server: McpServer) -> Void {
        let name = server.name.clone();

        let token = {
            let mut endpoints = self.endpoints.write().await;

            if let Some(previous) = endpoints.get_mut(&name) {
                previous.tear_down(EndpointState::Disconnected);
            }

            let endpoint = Endpoint::new(server);
            let token = endpoint.cancel.clone();
            endpoints.insert(name.clone(), endpoint);
            self.rebuild_catalog(&endpoints);

            token
        };

        self.establish(&name, &token).await
    }

    /// Manually reconnect an endpoint, resetting its retry counter.
    #[instrument(skip(self))]
    pub async fn reconnect(&self, name: &str) -> Void {
        let token = CancellationToken::new();

        {
            let mut endpoints = self.endpoints.write().await;
            let endpoint = endpoints.get_mut(name).ok_or_else(|| BotError::NotConnected(name.to_string()))?;

            endpoint.tear_down(EndpointState::Disconnected);
            endpoint.cancel = token.clone();
            endpoint.retry_count = 0;

            self.rebuild_catalog(&endpoints);
        }

        self.establish(name, &token).await
    }

    /// Close an endpoint's session and stop its background tasks.  The endpoint stays
    /// known, so it can be reconnected.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, name: &str) {
        let mut endpoints = self.endpoints.write().await;

        if let Some(endpoint) = endpoints.get_mut(name) {
            endpoint.tear_down(EndpointState::Disconnected);
            info!("Tool endpoint `{}` disconnected.", name);
        }

        self.rebuild_catalog(&endpoints);
    }

    /// Disconnect every endpoint.
    #[instrument(skip(self))]
    pub async fn disconnect_all(&self) {
        let mut endpoints = self.endpoints.write().await;

        for endpoint in endpoints.values_mut() {
            endpoint.tear_down(EndpointState::Disconnected);
        }

        self.rebuild_catalog(&endpoints);
    }

    /// Snapshot of every endpoint, sorted by name.
    pub async fn status(&self) -> Vec<EndpointStatus> {
        let endpoints = self.endpoints.read().await;

        let mut status = endpoints
            .iter()
            .map(|(name, e)| EndpointStatus {
                name: name.clone(),
                state: e.state,
                retry_count: e.retry_count,
                last_health_check: e.last_health_check,
                tool_count: e.tools.len(),
            })
            .collect::<Vec<_>>();

        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    /// The state of one endpoint, if it is known.
    pub async fn state(&self, name: &str) -> Option<EndpointState> {
        self.endpoints.read().await.get(name).map(|e| e.state)
    }

    /// The current aggregate catalog.
    pub fn tools(&self) -> Arc<Vec<ToolDefinition>> {
        self.catalog.load_full()
    }

    /// Call a tool and always get a [`ToolCallResult`] back.
    #[instrument(skip(self, arguments))]
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolCallResult {
        match self.try_call_tool(name, arguments).await {
            Ok(content) => ToolCallResult { success: true, content, error: None },
            Err(err) => {
                warn!("Tool call `{}` failed: {}", name, err);

                ToolCallResult {
                    success: false,
                    content: String::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Call a tool, surfacing typed failures.
    ///
    /// `name` is either `endpoint.tool`, or a bare tool name that is unique in the catalog.
    /// All validation happens before the endpoint is contacted.  The call itself runs on
    /// its own task; on timeout that task is abandoned, not aborted.
    pub async fn try_call_tool(&self, name: &str, arguments: Value) -> Res<String> {
        let (definition, session) = self.resolve(name).await?;

        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(anyhow::anyhow!("Arguments for `{name}` must be an object, got {other}.")),
        };

        for field in &definition.required {
            if arguments.get(field).is_none_or(Value::is_null) {
                return Err(BotError::MissingArgument {
                    tool: definition.qualified_name(),
                    argument: field.clone(),
                }
                .into());
            }
        }

        debug!("Calling tool `{}`.", definition.qualified_name());

        let local_name = definition.name.clone();
        let call = tokio::spawn(async move { session.call_tool(&local_name, arguments).await }.in_current_span());

        let output = match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(joined) => joined??,
            Err(_) => {
                return Err(BotError::ToolTimeout {
                    tool: definition.qualified_name(),
                    timeout: self.policy.call_timeout,
                }
                .into());
            }
        };

        if output.is_error {
            return Err(anyhow::anyhow!("Tool `{}` reported an error: {}", definition.qualified_name(), output.content));
        }

        Ok(output.content)
    }
}

// Helpers.

impl ToolManager {
    /// Find the tool and the live session that serves it.
    async fn resolve(&self, name: &str) -> Res<(ToolDefinition, Arc<dyn ToolSession>)> {
        let endpoints = self.endpoints.read().await;

        // Endpoint names may contain dots, so the longest matching prefix wins.
        let qualified = endpoints
            .iter()
            .filter_map(|(e, endpoint)| name.strip_prefix(e.as_str()).and_then(|rest| rest.strip_prefix('.')).map(|local| (e, endpoint, local)))
            .max_by_key(|(e, _, _)| e.len());

        let (endpoint_name, endpoint, local_name) = match qualified {
            Some(found) => found,
            None => {
                let catalog = self.catalog.load();
                let mut matches = catalog.iter().filter(|t| t.name == name);

                match (matches.next(), matches.next()) {
                    (Some(tool), None) => {
                        let (e, endpoint) = endpoints.get_key_value(&tool.endpoint).ok_or_else(|| BotError::UnknownTool(name.to_string()))?;
                        (e, endpoint, name)
                    }
                    _ => return Err(BotError::UnknownTool(name.to_string()).into()),
                }
            }
        };

        let (EndpointState::Connected, Some(session)) = (endpoint.state, endpoint.session.clone()) else {
            return Err(BotError::NotConnected(endpoint_name.clone()).into());
        };

        let definition = endpoint.tools.iter().find(|t| t.name == local_name).cloned().ok_or_else(|| BotError::UnknownTool(name.to_string()))?;

        Ok((definition, session))
    }

    /// Open a session and fetch the catalog, bounded by the connect timeout.
    async fn open_session(&self, server: &McpServer) -> Res<(Arc<dyn ToolSession>, Vec<ToolDefinition>)> {
        let open = async {
            let session = self.transport.connect(server).await?;
            let tools = session.list_tools().await?;

            Res::Ok((session, tools))
        };

        let (session, tools) = tokio::time::timeout(self.policy.connect_timeout, open)
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {:?}", self.policy.connect_timeout))??;

        let tools = tools.into_iter().map(|tool| ToolDefinition::from_remote(&server.name, tool)).collect();

        Ok((session, tools))
    }

    /// Drive one connection attempt for a known endpoint.
    async fn establish(&self, name: &str, token: &CancellationToken) -> Void {
        let server = {
            let mut endpoints = self.endpoints.write().await;
            let endpoint = endpoints.get_mut(name).ok_or_else(|| BotError::NotConnected(name.to_string()))?;

            endpoint.state = EndpointState::Connecting;
            endpoint.server.clone()
        };

        let result = self.open_session(&server).await;

        let mut endpoints = self.endpoints.write().await;

        if token.is_cancelled() {
            return Err(BotError::ConnectionFailed {
                endpoint: name.to_string(),
                reason: "connection attempt was superseded".to_string(),
            }
            .into());
        }

        let Some(endpoint) = endpoints.get_mut(name) else {
            return Err(BotError::NotConnected(name.to_string()).into());
        };

        match result {
            Ok((session, tools)) => {
                info!("Tool endpoint `{}` connected with {} tools.", name, tools.len());

                endpoint.state = EndpointState::Connected;
                endpoint.session = Some(session);
                endpoint.tools = tools;
                endpoint.retry_count = 0;
                endpoint.last_health_check = Some(Utc::now());

                self.rebuild_catalog(&endpoints);
                drop(endpoints);

                self.spawn_health_check(name.to_string(), token.clone());

                Ok(())
            }
            Err(err) => {
                endpoint.state = EndpointState::Disconnected;
                endpoint.session = None;
                endpoint.tools.clear();

                self.rebuild_catalog(&endpoints);

                Err(BotError::ConnectionFailed {
                    endpoint: name.to_string(),
                    reason: err.to_string(),
                }
                .into())
            }
        }
    }

    /// Ping the endpoint every `ping_interval` while it stays connected.
    fn spawn_health_check(&self, name: String, token: CancellationToken) {
        if self.policy.ping_interval.is_zero() {
            return;
        }

        let manager = self.clone();
        let period = self.policy.ping_interval;

        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = interval.tick() => {}
                    }

                    let session = {
                        let endpoints = manager.endpoints.read().await;
                        match endpoints.get(&name) {
                            Some(e) if e.state == EndpointState::Connected => e.session.clone(),
                            _ => None,
                        }
                    };

                    let Some(session) = session else { return };

                    let check = tokio::time::timeout(manager.policy.connect_timeout, session.ping())
                        .await
                        .map_err(|_| anyhow::anyhow!("no answer within {:?}", manager.policy.connect_timeout))
                        .and_then(|answer| answer);

                    match check {
                        Ok(()) => {
                            if let Some(endpoint) = manager.endpoints.write().await.get_mut(&name) {
                                endpoint.last_health_check = Some(Utc::now());
                            }
                        }
                        Err(err) => {
                            warn!("Health check of tool endpoint `{}` failed: {}", name, err);
                            manager.on_health_check_failed(&name, &token).await;
                            return;
                        }
                    }
                }
            }
            .in_current_span(),
        );
    }

    async fn on_health_check_failed(&self, name: &str, token: &CancellationToken) {
        {
            let mut endpoints = self.endpoints.write().await;

            if token.is_cancelled() {
                return;
            }

            let Some(endpoint) = endpoints.get_mut(name) else { return };

            endpoint.state = EndpointState::HealthCheckFailed;
            endpoint.session = None;
            endpoint.tools.clear();

            if !self.policy.auto_reconnect {
                endpoint.state = EndpointState::Disconnected;
            }

            self.rebuild_catalog(&endpoints);
        }

        if self.policy.auto_reconnect {
            self.spawn_reconnect(name.to_string(), token.clone());
        }
    }

    /// Retry with linear backoff until connected, cancelled, or out of attempts.
    fn spawn_reconnect(&self, name: String, token: CancellationToken) {
        let manager = self.clone();

        tokio::spawn(
            async move {
                loop {
                    let attempt = {
                        let mut endpoints = manager.endpoints.write().await;

                        if token.is_cancelled() {
                            return;
                        }

                        let Some(endpoint) = endpoints.get_mut(&name) else { return };

                        if endpoint.retry_count >= manager.policy.max_retries {
                            warn!("Tool endpoint `{}` gave up after {} reconnect attempts.", name, endpoint.retry_count);
                            endpoint.state = EndpointState::Disconnected;
                            return;
                        }

                        endpoint.retry_count += 1;
                        endpoint.state = EndpointState::ReconnectScheduled;
                        endpoint.retry_count
                    };

                    let delay = manager.policy.retry_delay * attempt;
                    info!("Reconnecting tool endpoint `{}` in {:?} (attempt {}/{}).", name, delay, attempt, manager.policy.max_retries);

                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }

                    match manager.establish(&name, &token).await {
                        Ok(()) => return,
                        Err(err) => warn!("Reconnect attempt {} for `{}` failed: {}", attempt, name, err),
                    }
                }
            }
            .in_current_span(),
        );
    }

    /// Rebuild the catalog from scratch out of every connected endpoint.
    fn rebuild_catalog(&self, endpoints: &HashMap<String, Endpoint>) {
        let mut catalog = endpoints
            .values()
            .filter(|e| e.state == EndpointState::Connected)
            .flat_map(|e| e.tools.iter().cloned())
            .collect::<Vec<_>>();

        catalog.sort_by_key(ToolDefinition::qualified_name);

        self.catalog.store(Arc::new(catalog));
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::{
        base::error::BotErrorExt,
        service::mcp::fake::{manager, server},
    };

    #[tokio::test(start_paused = true)]
    async fn test_connect_builds_qualified_catalog() {
        let (manager, _) = manager();

        manager.connect(server("fake")).await.unwrap();

        let names = manager.tools().iter().map(ToolDefinition::qualified_name).collect::<Vec<_>>();

        assert_eq!(names, vec!["fake.echo", "fake.get_weather"]);
        assert_eq!(manager.state("fake").await, Some(EndpointState::Connected));
        assert_eq!(manager.tools()[0].required, vec!["message".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_stays_disconnected() {
        let (manager, state) = manager();
        state.refuse_connect.store(true, Ordering::SeqCst);

        let err = manager.connect(server("fake")).await.unwrap_err();

        assert!(matches!(err.bot_error(), Some(BotError::ConnectionFailed { .. })));
        assert_eq!(manager.state("fake").await, Some(EndpointState::Disconnected));
        assert!(manager.tools().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_tool_qualified_and_unqualified() {
        let (manager, _) = manager();
        manager.connect(server("fake")).await.unwrap();

        let qualified = manager.call_tool("fake.echo", json!({ "message": "hi" })).await;
        let unqualified = manager.call_tool("echo", json!({ "message": "hi" })).await;

        assert!(qualified.success);
        assert_eq!(qualified.content, r#"echo: {"message":"hi"}"#);
        assert_eq!(qualified, unqualified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_argument_fails_before_any_call() {
        let (manager, state) = manager();
        manager.connect(server("fake")).await.unwrap();

        let err = manager.try_call_tool("fake.get_weather", json!({ "unit": "celsius" })).await.unwrap_err();

        assert_eq!(
            err.bot_error(),
            Some(&BotError::MissingArgument {
                tool: "fake.get_weather".to_string(),
                argument: "city".to_string(),
            })
        );
        assert_eq!(state.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_tool_and_not_connected() {
        let (manager, _) = manager();
        manager.connect(server("fake")).await.unwrap();

        let unknown = manager.try_call_tool("fake.nope", json!({})).await.unwrap_err();
        assert_eq!(unknown.bot_error(), Some(&BotError::UnknownTool("fake.nope".to_string())));

        manager.disconnect("fake").await;

        let disconnected = manager.try_call_tool("fake.echo", json!({ "message": "hi" })).await.unwrap_err();
        assert_eq!(disconnected.bot_error(), Some(&BotError::NotConnected("fake".to_string())));
        assert!(manager.tools().is_empty());

        let result = manager.call_tool("fake.echo", json!({ "message": "hi" })).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let (manager, state) = manager();
        manager.connect(server("fake")).await.unwrap();
        *state.call_delay.lock().unwrap() = Duration::from_secs(60);

        let err = manager.try_call_tool("fake.echo", json!({ "message": "hi" })).await.unwrap_err();

        assert_eq!(
            err.bot_error(),
            Some(&BotError::ToolTimeout {
                tool: "fake.echo".to_string(),
                timeout: Duration::from_secs(30),
            })
        );
        assert_eq!(state.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_failure_reconnects_and_resets_retries() {
        let (manager, state) = manager();
        manager.connect(server("fake")).await.unwrap();

        // The next ping fails, and the first reconnect attempt as well.
        state.fail_ping.store(true, Ordering::SeqCst);
        state.refuse_connect.store(true, Ordering::SeqCst);

        // Ping at 10s fails, attempt 1 runs at 12s and fails, attempt 2 is due at 16s.
        tokio::time::sleep(Duration::from_secs(13)).await;

        let status = manager.status().await;
        assert_eq!(status[0].state, EndpointState::ReconnectScheduled);
        assert_eq!(status[0].retry_count, 2);

        state.fail_ping.store(false, Ordering::SeqCst);
        state.refuse_connect.store(false, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = manager.status().await;
        assert_eq!(status[0].state, EndpointState::Connected);
        assert_eq!(status[0].retry_count, 0);
        assert_eq!(manager.tools().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_retries() {
        let (manager, state) = manager();
        manager.connect(server("fake")).await.unwrap();

        state.fail_ping.store(true, Ordering::SeqCst);
        state.refuse_connect.store(true, Ordering::SeqCst);

        // Ping at 10s, then attempts at 12s, 16s, and 22s.
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(manager.state("fake").await, Some(EndpointState::Disconnected));
        assert_eq!(state.connects.load(Ordering::SeqCst), 1 + 3);

        // Nothing else is scheduled.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(state.connects.load(Ordering::SeqCst), 4);

        // A manual reconnect starts over.
        state.fail_ping.store(false, Ordering::SeqCst);
        state.refuse_connect.store(false, Ordering::SeqCst);
        manager.reconnect("fake").await.unwrap();

        assert_eq!(manager.state("fake").await, Some(EndpointState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_ping_counts_as_a_failed_health_check() {
        let (manager, state) = manager();
        manager.connect(server("fake")).await.unwrap();

        *state.ping_delay.lock().unwrap() = Duration::from_secs(3600);

        // The ping at 10s is still pending at 39s.
        tokio::time::sleep(Duration::from_secs(39)).await;
        assert_eq!(manager.state("fake").await, Some(EndpointState::Connected));

        // It gives up at 40s, and the first reconnect is due at 42s.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let status = manager.status().await;
        assert_eq!(status[0].state, EndpointState::ReconnectScheduled);
        assert_eq!(status[0].retry_count, 1);
        assert!(manager.tools().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_names_with_dots() {
        let (manager, _) = manager();
        manager.connect(server("weather.api")).await.unwrap();
        manager.connect(server("weather")).await.unwrap();

        let dotted = manager.try_call_tool("weather.api.get_weather", json!({ "city": "北京" })).await.unwrap();
        let plain = manager.try_call_tool("weather.get_weather", json!({ "city": "北京" })).await.unwrap();

        assert_eq!(dotted, r#"get_weather: {"city":"北京"}"#);
        assert_eq!(plain, dotted);

        manager.disconnect("weather.api").await;

        let err = manager.try_call_tool("weather.api.get_weather", json!({ "city": "北京" })).await.unwrap_err();
        assert_eq!(err.bot_error(), Some(&BotError::NotConnected("weather.api".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_catalog_is_rebuilt_when_an_endpoint_leaves() {
        let (manager, _) = manager();
        manager.connect(server("a")).await.unwrap();
        manager.connect(server("b")).await.unwrap();

        assert_eq!(manager.tools().len(), 4);

        // Unqualified names are ambiguous with two endpoints.
        let err = manager.try_call_tool("echo", json!({ "message": "hi" })).await.unwrap_err();
        assert_eq!(err.bot_error(), Some(&BotError::UnknownTool("echo".to_string())));

        manager.disconnect("a").await;

        let names = manager.tools().iter().map(ToolDefinition::qualified_name).collect::<Vec<_>>();
        assert_eq!(names, vec!["b.echo", "b.get_weather"]);

        manager.disconnect_all().await;
        assert!(manager.tools().is_empty());
    }
}
