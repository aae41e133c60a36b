//! OneBot v11 integration over HTTP.
//!
//! Inbound events arrive on an HTTP webhook (the OneBot "HTTP POST" mode), and
//! replies go out through the OneBot HTTP API (`send_group_msg` / `send_private_msg`).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        types::{ContentType, ConversationKey, Reply, Res, Void},
    },
    interaction::{chat_event::handle_chat_event, dispatcher::Dispatcher, normalizer::RawEvent},
};

use super::{ChatClient, GenericChatClient};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

// Extra methods on `ChatClient` applied by the onebot implementation.

impl ChatClient {
    /// Creates a new OneBot chat client.
    pub fn onebot(config: &Config) -> Res<Self> {
        let client = OneBotChatClient::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Types.

/// The envelope every OneBot API call answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    message: String,
}

// Structs.

/// OneBot client implementation.
#[derive(Clone)]
struct OneBotChatClient {
    client: reqwest::Client,
    api_url: String,
    listen_addr: String,
}

impl OneBotChatClient {
    /// Create a new OneBot chat client.
    #[instrument(name = "OneBotChatClient::new", skip_all)]
    fn new(config: &Config) -> Res<Self> {
        let mut header_map = HeaderMap::new();

        if let Some(token) = config.onebot_access_token.as_deref().filter(|t| !t.is_empty()) {
            header_map.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        }

        let client = reqwest::Client::builder().default_headers(header_map).timeout(SEND_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_url: config.onebot_api_url.trim_end_matches('/').to_string(),
            listen_addr: config.onebot_listen_addr.clone(),
        })
    }
}

#[async_trait]
impl GenericChatClient for OneBotChatClient {
    async fn start(&self, dispatcher: Dispatcher) -> Void {
        let app = Router::new().route("/", post(receive_event)).with_state(dispatcher);

        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;

        info!("OneBot webhook listening on {}", self.listen_addr);

        axum::serve(listener, app).await?;

        Ok(())
    }

    #[instrument(skip(self, reply))]
    async fn send_reply(&self, conversation: &ConversationKey, reply: &Reply) -> Void {
        let (action, body) = send_request(conversation, reply);

        let response = self.client.post(format!("{}/{}", self.api_url, action)).json(&body).send().await?.error_for_status()?;
        let response = response.json::<ApiResponse>().await?;

        if response.retcode != 0 {
            return Err(anyhow::anyhow!("OneBot `{}` failed with retcode {} ({}): {}", action, response.retcode, response.status, response.message));
        }

        Ok(())
    }
}

// Helpers.

/// Webhook handler: accept the event and dispatch it on its own task.
async fn receive_event(State(dispatcher): State<Dispatcher>, Json(event): Json<RawEvent>) -> StatusCode {
    handle_chat_event(event, dispatcher);

    StatusCode::NO_CONTENT
}

/// The OneBot message string for a reply.  Images become CQ image codes.
pub fn outgoing_message(reply: &Reply) -> String {
    match reply.content_type {
        ContentType::Text => reply.content.clone(),
        ContentType::Image => format!("[CQ:image,file={}]", reply.content),
    }
}

/// The API action and request body that deliver `reply` to `conversation`.
///
/// Text is sent with `auto_escape`, so CQ codes inside it reach the chat as plain text.
pub fn send_request(conversation: &ConversationKey, reply: &Reply) -> (&'static str, Value) {
    let message = outgoing_message(reply);
    let auto_escape = reply.content_type == ContentType::Text;

    match conversation {
        ConversationKey::Group(group_id) => ("send_group_msg", json!({ "group_id": group_id, "message": message, "auto_escape": auto_escape })),
        ConversationKey::Private(user_id) => ("send_private_msg", json!({ "user_id": user_id, "message": message, "auto_escape": auto_escape })),
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::base::config::ConfigInner;

    type Seen = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

    /// A fake OneBot API that records every call and answers with `retcode`.
    async fn fake_api(retcode: i64) -> (String, Seen) {
        let seen: Seen = Arc::default();

        let record = {
            let seen = seen.clone();
            move |axum::extract::Path(action): axum::extract::Path<String>, headers: HeaderMap, Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    let auth = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()).map(str::to_string);
                    seen.lock().unwrap().push((action, auth, body));
                    Json(json!({ "status": "ok", "retcode": retcode, "data": null }))
                }
            }
        };

        let app = Router::new().route("/{action}", post(record));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        (url, seen)
    }

    fn config(api_url: &str, token: Option<&str>) -> Config {
        Config {
            inner: Arc::new(ConfigInner {
                onebot_api_url: format!("{api_url}/"),
                onebot_access_token: token.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_send_request_shapes() {
        let (action, body) = send_request(&ConversationKey::Group(777), &Reply::text("hi"));
        assert_eq!(action, "send_group_msg");
        assert_eq!(body, json!({ "group_id": 777, "message": "hi", "auto_escape": true }));

        let (action, body) = send_request(&ConversationKey::Private(42), &Reply::image("https://example.com/a.png"));
        assert_eq!(action, "send_private_msg");
        assert_eq!(body, json!({ "user_id": 42, "message": "[CQ:image,file=https://example.com/a.png]", "auto_escape": false }));
    }

    #[test]
    fn test_cq_codes_in_text_are_escaped() {
        let (_, body) = send_request(&ConversationKey::Group(1), &Reply::text("[CQ:at,qq=all] hi"));

        assert_eq!(body["message"], "[CQ:at,qq=all] hi");
        assert_eq!(body["auto_escape"], true);
    }

    #[tokio::test]
    async fn test_send_reply_posts_to_api_with_token() {
        let (url, seen) = fake_api(0).await;
        let client = ChatClient::onebot(&config(&url, Some("secret"))).unwrap();

        client.send_reply(&ConversationKey::Group(777), &Reply::text("pong")).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "send_group_msg");
        assert_eq!(seen[0].1.as_deref(), Some("Bearer secret"));
        assert_eq!(seen[0].2, json!({ "group_id": 777, "message": "pong", "auto_escape": true }));
    }

    #[tokio::test]
    async fn test_send_reply_reports_api_failure() {
        let (url, _seen) = fake_api(100).await;
        let client = ChatClient::onebot(&config(&url, None)).unwrap();

        let err = client.send_reply(&ConversationKey::Private(42), &Reply::text("hi")).await.unwrap_err();

        assert!(err.to_string().contains("retcode 100"));
    }
}
