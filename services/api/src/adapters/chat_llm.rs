//! services/api/src/adapters/chat_llm.rs
//!
//! This module contains the adapter for the conversational LLM.
//! It implements the `ChatModelService` port from the `core` crate against
//! any OpenAI-compatible chat completions endpoint.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use chat_core::ports::{ChatMessage, ChatModelService, PortError, PortResult, Role, TextStream};
use futures::StreamExt;
use tracing::debug;

/// Upper bound on reply length.
const MAX_COMPLETION_TOKENS: u32 = 1000;
const TEMPERATURE: f32 = 0.7;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ChatModelService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiChatAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiChatAdapter {
    /// Creates a new `OpenAiChatAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn build_request(&self, messages: &[ChatMessage]) -> PortResult<CreateChatCompletionRequest> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(to_request_messages(messages)?)
            .max_completion_tokens(MAX_COMPLETION_TOKENS)
            .temperature(TEMPERATURE)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

fn to_request_messages(messages: &[ChatMessage]) -> PortResult<Vec<ChatCompletionRequestMessage>> {
    messages
        .iter()
        .map(|message| {
            let content = message.content.clone();
            let built: Result<ChatCompletionRequestMessage, OpenAIError> = match message.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(content)
                    .build()
                    .map(Into::into),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(content)
                    .build()
                    .map(Into::into),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(content)
                    .build()
                    .map(Into::into),
            };
            built.map_err(|e| PortError::Unexpected(e.to_string()))
        })
        .collect()
}

//=========================================================================================
// `ChatModelService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatModelService for OpenAiChatAdapter {
    async fn complete(&self, messages: &[ChatMessage]) -> PortResult<String> {
        let request = self.build_request(messages)?;
        debug!(model = %self.model, messages = messages.len(), "Requesting chat completion.");

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        // Extract the text content from the first choice in the response.
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| {
                PortError::Unexpected("Chat LLM response contained no text content.".to_string())
            })
    }

    async fn complete_streaming(&self, messages: &[ChatMessage]) -> PortResult<TextStream> {
        let request = self.build_request(messages)?;
        debug!(model = %self.model, messages = messages.len(), "Requesting streamed chat completion.");

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let fragments = stream.map(|chunk| match chunk {
            Ok(chunk) => Ok(chunk
                .choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect::<String>()),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        });
        Ok(Box::pin(fragments))
    }
}
