//! Integration with OpenAI-compatible chat-completion services.
//!
//! Any provider that speaks the `/chat/completions` API works, selected with
//! `openai_base_url`.

use std::{sync::Arc, time::Duration};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::base::{
    config::Config,
    types::{ChatMessage, ChatRole, Res},
};

use super::{GenericLlmClient, LlmClient};

// Extra methods on `LlmClient` applied by the openai implementation.

impl LlmClient {
    pub fn openai(config: &Config) -> Self {
        let client = OpenAiLlmClient::new(config);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// OpenAI LLM client implementation.
#[derive(Clone)]
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    config: Config,
}

impl OpenAiLlmClient {
    /// Create a new OpenAI LLM client.
    #[instrument(name = "OpenAiLlmClient::new", skip_all)]
    pub fn new(config: &Config) -> Self {
        let cfg = OpenAIConfig::new().with_api_key(config.openai_api_key.clone()).with_api_base(config.openai_base_url.clone());

        Self {
            client: Client::with_config(cfg),
            config: config.clone(),
        }
    }

    /// Build the completion request for a conversation.
    fn build_request(&self, messages: &[ChatMessage]) -> Res<CreateChatCompletionRequest> {
        let messages = messages.iter().map(to_request_message).collect::<Res<Vec<_>>>()?;

        Ok(CreateChatCompletionRequestArgs::default()
            .model(self.config.openai_model.clone())
            .messages(messages)
            .temperature(self.config.openai_temperature)
            .max_completion_tokens(self.config.openai_max_tokens)
            .build()?)
    }

    /// Helper function to make OpenAI API calls with retry logic and timeout handling.
    async fn call_openai_api(&self, request: CreateChatCompletionRequest) -> Res<CreateChatCompletionResponse> {
        const MAX_RETRIES: u32 = 3;
        const RETRY_DELAY_MS: u64 = 1000;

        let per_call = self.config.openai_timeout();
        let mut retries = 0;

        loop {
            let result = timeout(per_call, self.client.chat().create(request.clone())).await;

            match result {
                Ok(Ok(response)) => {
                    info!("OpenAI API call succeeded after {} attempts", retries + 1);
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("OpenAI API call failed after {MAX_RETRIES} retries: {err}"));
                    }
                    retries += 1;
                    warn!("OpenAI API call failed, retrying {retries}/{MAX_RETRIES}: {err}");

                    let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("OpenAI API call timed out after {MAX_RETRIES} attempts"));
                    }
                    retries += 1;
                    warn!("OpenAI API call timed out, retrying {retries}/{MAX_RETRIES}");

                    let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl GenericLlmClient for OpenAiLlmClient {
    #[instrument(name = "OpenAiLlmClient::complete", skip_all, fields(turns = messages.len()))]
    async fn complete(&self, messages: &[ChatMessage]) -> Res<String> {
        let request = self.build_request(messages)?;
        let response = self.call_openai_api(request).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("OpenAI response contained no message content."))?;

        Ok(text)
    }
}

// Helpers.

fn to_request_message(message: &ChatMessage) -> Res<ChatCompletionRequestMessage> {
    let message = match message.role {
        ChatRole::System => ChatCompletionRequestSystemMessageArgs::default().content(message.content.clone()).build()?.into(),
        ChatRole::User => ChatCompletionRequestUserMessageArgs::default().content(message.content.clone()).build()?.into(),
        ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default().content(message.content.clone()).build()?.into(),
    };

    Ok(message)
}

// Tests.
