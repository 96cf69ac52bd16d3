//! Provider module for mcphost
//!
//! This module contains the completion endpoint abstraction, the
//! conversation message model, and the OpenAI-compatible implementation.

pub mod base;
pub mod openai;

pub use base::{
    trim_unanswered_tool_calls, CompletionResponse, ContentItem, FunctionCall, ImageRef, Message,
    MessageContent, Provider, TokenUsage, ToolCall, ToolDescriptor,
};
pub use openai::OpenAiProvider;

use crate::config::ProviderConfig;
use crate::error::Result;

/// Create the completion provider described by configuration
///
/// # Errors
///
/// Returns error if provider initialization fails
pub fn create_provider(config: &ProviderConfig) -> Result<Box<dyn Provider>> {
    if config.api_key.is_none() {
        tracing::warn!("No API key configured; set OPENAI_API_KEY if the endpoint requires one");
    }
    Ok(Box::new(OpenAiProvider::new(config.clone())?))
}
