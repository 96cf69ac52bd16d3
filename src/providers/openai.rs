//! OpenAI-compatible Chat Completions provider
//!
//! Speaks the `/chat/completions` API in two URL layouts:
//!
//! - Azure, when `api_version` is configured:
//!   `POST {api_base}/openai/deployments/{deployment}/chat/completions?api-version={v}`
//!   authenticated with an `api-key` header.
//! - Plain, otherwise: `POST {api_base}/chat/completions` with
//!   `Authorization: Bearer` and `model = deployment`.

use crate::config::ProviderConfig;
use crate::error::{HostError, Result};
use crate::providers::{CompletionResponse, Message, Provider, TokenUsage, ToolDescriptor};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request body for `/chat/completions`
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Response from `/chat/completions`
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

/// One choice; only the first is used
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Token usage block
#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

/// Completion provider for OpenAI and Azure OpenAI endpoints
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
    url: String,
}

impl OpenAiProvider {
    /// Create a new provider from configuration
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Config`] if the HTTP client cannot be built or
    /// the Azure layout is requested without a deployment.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::config::ProviderConfig;
    /// use mcphost::providers::OpenAiProvider;
    ///
    /// let provider = OpenAiProvider::new(ProviderConfig::default()).unwrap();
    /// assert_eq!(provider.url(), "https://api.openai.com/v1/chat/completions");
    /// ```
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("mcphost/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HostError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base = config.api_base.trim_end_matches('/');
        let url = match &config.api_version {
            Some(version) => {
                if config.deployment.trim().is_empty() {
                    return Err(HostError::Config(
                        "Azure mode requires provider.deployment".to_string(),
                    )
                    .into());
                }
                format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    base, config.deployment, version
                )
            }
            None => format!("{}/chat/completions", base),
        };

        tracing::info!(
            "Initialized completion provider: url={}, deployment={}",
            url,
            config.deployment
        );

        Ok(Self {
            client,
            config,
            url,
        })
    }

    /// Endpoint URL requests are sent to
    pub fn url(&self) -> &str {
        &self.url
    }

    fn is_azure(&self) -> bool {
        self.config.api_version.is_some()
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionResponse> {
        let request = ChatRequest {
            model: (!self.is_azure()).then_some(self.config.deployment.as_str()),
            messages,
            tools: tools.iter().map(ToolDescriptor::to_function_tool).collect(),
            temperature: self.config.temperature,
        };

        tracing::debug!(
            "Sending completion request: {} messages, {} tools",
            messages.len(),
            request.tools.len()
        );

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = if self.is_azure() {
                builder.header("api-key", key)
            } else {
                builder.bearer_auth(key)
            };
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("Completion request failed: {}", e);
            HostError::CompletionEndpoint(format!("request failed: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Completion endpoint returned error {}: {}", status, error_text);
            return Err(HostError::CompletionEndpoint(format!(
                "endpoint returned {}: {}",
                status, error_text
            ))
            .into());
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse completion response: {}", e);
            HostError::CompletionEndpoint(format!("failed to parse response: {}", e))
        })?;

        let usage = body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));
        let choice = body.choices.into_iter().next().ok_or_else(|| {
            HostError::CompletionEndpoint("response contained no choices".to_string())
        })?;

        tracing::debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            tool_calls = choice.message.requested_tool_calls().len(),
            "completion received"
        );

        let mut message = choice.message;
        if message.tool_calls.as_ref().is_some_and(|calls| calls.is_empty()) {
            message.tool_calls = None;
        }

        Ok(match usage {
            Some(usage) => CompletionResponse::with_usage(message, usage),
            None => CompletionResponse::new(message),
        })
    }

    fn name(&self) -> &str {
        if self.is_azure() {
            "azure-openai"
        } else {
            "openai"
        }
    }
}
