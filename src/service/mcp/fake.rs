//! An in-process tool endpoint for tests, with switches for every failure mode.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::base::types::{Res, Void};

use super::{
    McpServer, McpServerConfig,
    manager::{ToolManager, ToolPolicy},
    transport::{RemoteTool, ToolOutput, ToolSession, ToolTransport, ToolTransportClient},
};

/// Shared switches and counters for the fake endpoint.
#[derive(Default)]
pub struct FakeState {
    pub refuse_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fail_calls: AtomicBool,
    pub connects: AtomicUsize,
    pub calls: AtomicUsize,
    pub call_delay: Mutex<Duration>,
    pub ping_delay: Mutex<Duration>,
}

pub struct FakeTransport {
    state: Arc<FakeState>,
}

struct FakeSession {
    state: Arc<FakeState>,
}

#[async_trait]
impl ToolTransport for FakeTransport {
    async fn connect(&self, _server: &McpServer) -> Res<Arc<dyn ToolSession>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        if self.state.refuse_connect.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connection refused"));
        }

        Ok(Arc::new(FakeSession { state: self.state.clone() }))
    }
}

#[async_trait]
impl ToolSession for FakeSession {
    async fn list_tools(&self) -> Res<Vec<RemoteTool>> {
        Ok(vec![
            RemoteTool {
                name: "echo".to_string(),
                description: "Echo a message.".to_string(),
                input_schema: json!({ "type": "object", "required": ["message"] }),
            },
            RemoteTool {
                name: "get_weather".to_string(),
                description: "Weather for a city.".to_string(),
                input_schema: json!({ "type": "object", "required": ["city"] }),
            },
        ])
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Res<ToolOutput> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.call_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.state.fail_calls.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("tool refused the call"));
        }

        Ok(ToolOutput {
            content: format!("{name}: {}", Value::Object(arguments)),
            is_error: false,
        })
    }

    async fn ping(&self) -> Void {
        let delay = *self.state.ping_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("ping failed"));
        }

        Ok(())
    }
}

/// A remote server descriptor; the fake transport ignores the URL.
pub fn server(name: &str) -> McpServer {
    McpServer {
        name: name.to_string(),
        config: McpServerConfig::Remote {
            url: "http://127.0.0.1:9000/mcp".to_string(),
            headers: None,
        },
    }
}

/// A manager with the default policy over a fresh fake transport.
pub fn manager() -> (ToolManager, Arc<FakeState>) {
    let state = Arc::new(FakeState::default());
    let transport = ToolTransportClient::new(Arc::new(FakeTransport { state: state.clone() }));

    (ToolManager::new(transport, ToolPolicy::default()), state)
}
