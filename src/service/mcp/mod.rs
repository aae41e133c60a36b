//! Tool endpoints over the Model Context Protocol (MCP).
//!
//! - [`McpServer`] descriptors are read from an `mcp.json` file.
//! - [`transport`] opens live sessions to those endpoints.
//! - [`manager`] owns their connection lifecycle and the aggregate tool catalog.

#[cfg(test)]
pub mod fake;
pub mod manager;
pub mod transport;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::serde_as;
use tracing::warn;

use crate::base::types::Res;

// Types.

/// Struct that represents a server in the MCP configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    pub name: String,
    pub config: McpServerConfig,
}

/// Enum that represents the configuration of an MCP server, which can be either local or remote.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    /// A child process speaking MCP over stdio.
    Local {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(alias = "env")]
        #[serde_as(as = "Option<serde_with::Map<_, _>>")]
        envs: Option<Vec<(String, String)>>,
    },
    /// A streamable-HTTP endpoint.
    Remote {
        url: String,
        #[serde_as(as = "Option<serde_with::Map<_, _>>")]
        headers: Option<Vec<(String, String)>>,
    },
}

// Helpers.

/// Load the server objects from an `mcp.json` file.
///
/// Both the `servers` and the `mcpServers` keys are accepted, and merged.  A missing file
/// yields no servers.
pub fn load_mcp_json(path: &str) -> Res<Map<String, Value>> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("No MCP configuration found at `{}`.", path);
            return Ok(Map::new());
        }
        Err(err) => return Err(err.into()),
    };

    let json = serde_json::from_str::<Value>(&json)?;

    let mut json_servers = Map::new();
    for key in ["servers", "mcpServers"] {
        if let Some(Value::Object(servers)) = json.get(key) {
            json_servers.extend(servers.clone());
        }
    }

    Ok(json_servers)
}

/// Parse the server objects of an `mcp.json` file into descriptors.
pub fn get_servers_from_mcp_json(json_servers: Map<String, Value>) -> Res<Vec<McpServer>> {
    json_servers
        .into_iter()
        .map(|(name, value)| {
            let config = serde_json::from_value::<McpServerConfig>(value).map_err(|err| anyhow::anyhow!("Invalid MCP server `{name}`: {err}"))?;
            Ok(McpServer { name, config })
        })
        .collect::<Res<Vec<_>>>()
}

// Tests.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_load_mcp_json() {
        let json = load_mcp_json("tests/mcp.json").unwrap();

        assert_eq!(json.len(), 2);
        assert!(json.contains_key("everything"));

        let everything = json.get("everything").unwrap();
        assert_eq!(everything["command"], "npx");
        assert_eq!(everything["args"], json!(["-y", "@modelcontextprotocol/server-everything"]));
    }

    #[test]
    fn test_missing_mcp_json_is_empty() {
        let json = load_mcp_json("tests/does-not-exist.json").unwrap();

        assert!(json.is_empty());
    }

    #[test]
    fn test_get_servers_from_mcp_json() {
        let json = load_mcp_json("tests/mcp.json").unwrap();
        let mut servers = get_servers_from_mcp_json(json).unwrap();
        servers.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].name, "everything");
        assert!(matches!(servers[0].config, McpServerConfig::Local { .. }));
        assert_eq!(servers[1].name, "weather");
        assert!(matches!(servers[1].config, McpServerConfig::Remote { .. }));
    }

    #[test]
    fn test_env_and_headers_accept_maps() {
        let local: McpServerConfig = serde_json::from_value(json!({
            "command": "weather-server",
            "env": { "API_KEY": "k" }
        }))
        .unwrap();

        let remote: McpServerConfig = serde_json::from_value(json!({
            "url": "http://localhost:9000/mcp",
            "headers": { "Authorization": "Bearer t" }
        }))
        .unwrap();

        assert_eq!(
            local,
            McpServerConfig::Local {
                command: "weather-server".to_string(),
                args: vec![],
                envs: Some(vec![("API_KEY".to_string(), "k".to_string())]),
            }
        );
        assert_eq!(
            remote,
            McpServerConfig::Remote {
                url: "http://localhost:9000/mcp".to_string(),
                headers: Some(vec![("Authorization".to_string(), "Bearer t".to_string())]),
            }
        );
    }
}
