//! OpenAI-compatible LLM providers via the `async-openai` crate.
//!
//! [`OpenAiProvider`] talks to the OpenAI API (or any compatible proxy
//! through a base URL override); [`AzureOpenAiProvider`] talks to an
//! Azure OpenAI deployment. Both share the same request translation.

use async_openai::Client;
use async_openai::config::{AzureConfig, OpenAIConfig};
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionStreamResponse,
};
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::ports::{LlmProvider, TextStream};

use super::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};

/// Azure API version used for chat completions.
const AZURE_API_VERSION: &str = "2024-06-01";

/// Converts our message type to the OpenAI SDK type.
fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
    match msg.role {
        Role::System => ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
            content: async_openai::types::ChatCompletionRequestSystemMessageContent::Text(
                msg.content.clone(),
            ),
            name: None,
        }),
        Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: async_openai::types::ChatCompletionRequestUserMessageContent::Text(
                msg.content.clone(),
            ),
            name: None,
        }),
        Role::Assistant => {
            #[allow(deprecated)]
            ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                content: Some(
                    async_openai::types::ChatCompletionRequestAssistantMessageContent::Text(
                        msg.content.clone(),
                    ),
                ),
                name: None,
                tool_calls: None,
                refusal: None,
                audio: None,
                function_call: None,
            })
        }
    }
}

/// Builds an OpenAI chat completion request from our generic request.
fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
    let messages: Vec<_> = request.messages.iter().map(convert_message).collect();

    CreateChatCompletionRequest {
        model: request.model.clone(),
        messages,
        temperature: request.temperature,
        max_completion_tokens: request.max_tokens,
        stream: if request.stream { Some(true) } else { None },
        ..Default::default()
    }
}

/// Extracts our response type from the SDK response.
fn convert_response(
    response: async_openai::types::CreateChatCompletionResponse,
) -> ChatResponse {
    let choice = response.choices.first();

    let content = choice
        .and_then(|c| c.message.content.as_ref())
        .cloned()
        .unwrap_or_default();

    let finish_reason = choice.and_then(|c| {
        c.finish_reason
            .as_ref()
            .map(|fr| format!("{fr:?}").to_lowercase())
    });

    let usage = response
        .usage
        .map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

    ChatResponse {
        content,
        usage,
        finish_reason,
    }
}

/// Maps a streaming SDK event to a text delta.
fn convert_stream_item(
    result: std::result::Result<CreateChatCompletionStreamResponse, async_openai::error::OpenAIError>,
) -> Result<String> {
    match result {
        Ok(response) => Ok(response
            .choices
            .first()
            .and_then(|c| c.delta.content.as_ref())
            .cloned()
            .unwrap_or_default()),
        Err(e) => Err(Error::Llm(format!("stream failed: {e}"))),
    }
}

/// OpenAI chat completion provider.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiProvider {
    /// Creates a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when no API key is configured.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::validation("openai llm provider requires an API key"))?;

        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(Error::validation("llm model is not configured"));
        }
        Ok(())
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let openai_request = build_request(request);
        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(|e| Error::Llm(format!("chat completion failed: {e}")))?;
        Ok(convert_response(response))
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<TextStream> {
        let mut stream_request = request.clone();
        stream_request.stream = true;
        let openai_request = build_request(&stream_request);

        let stream = self
            .client
            .chat()
            .create_stream(openai_request)
            .await
            .map_err(|e| Error::Llm(format!("stream start failed: {e}")))?;

        Ok(Box::pin(stream.map(convert_stream_item)))
    }
}

/// Azure OpenAI chat completion provider.
///
/// The configured model name doubles as the Azure deployment id; the
/// base URL is the resource endpoint.
pub struct AzureOpenAiProvider {
    client: Client<AzureConfig>,
    model: String,
}

impl std::fmt::Debug for AzureOpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureOpenAiProvider")
            .field("deployment", &self.model)
            .finish()
    }
}

impl AzureOpenAiProvider {
    /// Creates a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the API key or endpoint URL
    /// is missing.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| Error::validation("azure llm provider requires an API key"))?;
        let endpoint = config
            .base_url
            .as_deref()
            .ok_or_else(|| Error::validation("azure llm provider requires a base URL"))?;

        let azure_config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_api_key(api_key)
            .with_deployment_id(&config.model)
            .with_api_version(AZURE_API_VERSION);

        Ok(Self {
            client: Client::with_config(azure_config),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for AzureOpenAiProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn validate_config(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(Error::validation("azure deployment id is not configured"));
        }
        Ok(())
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let openai_request = build_request(request);
        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(|e| Error::Llm(format!("chat completion failed: {e}")))?;
        Ok(convert_response(response))
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<TextStream> {
        let mut stream_request = request.clone();
        stream_request.stream = true;
        let openai_request = build_request(&stream_request);

        let stream = self
            .client
            .chat()
            .create_stream(openai_request)
            .await
            .map_err(|e| Error::Llm(format!("stream start failed: {e}")))?;

        Ok(Box::pin(stream.map(convert_stream_item)))
    }
}
