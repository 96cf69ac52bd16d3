//! Base provider trait and common conversation types
//!
//! This module defines the [`Provider`] trait that completion endpoints
//! implement, together with the message model shared by the host, the
//! session store and the tool sessions. Messages serialize to the Chat
//! Completions wire shape so that a persisted session can be replayed
//! verbatim.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role names used on the wire.
pub const ROLE_SYSTEM: &str = "system";
/// Role of messages typed by the user.
pub const ROLE_USER: &str = "user";
/// Role of model replies.
pub const ROLE_ASSISTANT: &str = "assistant";
/// Role of tool results.
pub const ROLE_TOOL: &str = "tool";

/// One item of tool output as presented to the model.
///
/// # Examples
///
/// ```
/// use mcphost::providers::ContentItem;
///
/// let item = ContentItem::image_url("data:image/png;base64,AAAA");
/// let json = serde_json::to_value(&item).unwrap();
/// assert_eq!(json["type"], "image_url");
/// assert_eq!(json["image_url"]["url"], "data:image/png;base64,AAAA");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A reference to an image, usually a `data:` URL.
    ImageUrl {
        /// Image location.
        image_url: ImageRef,
    },
}

/// Image location wrapper matching the `image_url` content part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// URL or `data:` URI.
    pub url: String,
}

impl ContentItem {
    /// Text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Image reference item.
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageRef { url: url.into() },
        }
    }
}

/// Message content: a plain string, or content parts for tool results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Ordered content parts.
    Parts(Vec<ContentItem>),
}

impl MessageContent {
    /// Text rendering for display: parts are joined by newlines and images
    /// are shown as `[image]`.
    pub fn as_display_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentItem::Text { text } => text.clone(),
                    ContentItem::ImageUrl { .. } => "[image]".to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Message structure for conversation
///
/// Represents a message in the conversation with the completion endpoint.
/// Messages can be from the user, assistant, system, or tool results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (user, assistant, system, tool)
    pub role: String,
    /// Content of the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    /// Tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call ID (for tool result messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::providers::Message;
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_USER.to_string(),
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_ASSISTANT.to_string(),
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_SYSTEM.to_string(),
            content: Some(MessageContent::Text(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates an assistant message that requests tool calls
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ROLE_ASSISTANT.to_string(),
            content: content.map(MessageContent::Text),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Creates a tool result message carrying content parts
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::providers::{ContentItem, Message};
    ///
    /// let msg = Message::tool_result("call_1", vec![ContentItem::text("42")]);
    /// assert_eq!(msg.role, "tool");
    /// assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    /// ```
    pub fn tool_result(tool_call_id: impl Into<String>, items: Vec<ContentItem>) -> Self {
        Self {
            role: ROLE_TOOL.to_string(),
            content: Some(MessageContent::Parts(items)),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Creates a tool result message reporting a failure to the model
    pub fn tool_error(tool_call_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            role: ROLE_TOOL.to_string(),
            content: Some(MessageContent::Text(format!("Error: {}", error))),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Tool calls requested by this message, empty when there are none.
    pub fn requested_tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// Display text of the content, if any.
    pub fn text(&self) -> Option<String> {
        self.content.as_ref().map(MessageContent::as_display_text)
    }
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// Function arguments as a JSON string
    #[serde(default)]
    pub arguments: String,
}

/// Tool call requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id echoed back in the tool result
    pub id: String,
    /// Always `function`
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    /// The function to call
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Build a function tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Parse the JSON argument string. An empty string means `{}`.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the model produced invalid JSON.
    pub fn parsed_arguments(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(raw)
    }
}

/// A tool as advertised to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its server
    pub name: String,
    /// Human-readable description; empty when the server gave none
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameter_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Chat Completions `tools` entry for this descriptor.
    pub fn to_function_tool(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameter_schema,
            }
        })
    }
}

/// Token usage reported by the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub prompt_tokens: usize,
    /// Completion tokens
    pub completion_tokens: usize,
    /// Total tokens
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Create usage with the total computed.
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Completion response with message and optional token usage
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The response message from the model
    pub message: Message,
    /// Optional token usage information
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    /// Create a new CompletionResponse
    ///
    /// # Examples
    ///
    /// ```
    /// use mcphost::providers::{CompletionResponse, Message};
    ///
    /// let response = CompletionResponse::new(Message::assistant("Hello!"));
    /// assert_eq!(response.message.role, "assistant");
    /// assert!(response.usage.is_none());
    /// ```
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
        }
    }

    /// Create a new CompletionResponse with token usage
    pub fn with_usage(message: Message, usage: TokenUsage) -> Self {
        Self {
            message,
            usage: Some(usage),
        }
    }
}

/// Completion endpoint abstraction
///
/// # Examples
///
/// ```no_run
/// use mcphost::providers::{CompletionResponse, Message, Provider, ToolDescriptor};
/// use mcphost::error::Result;
/// use async_trait::async_trait;
///
/// struct Canned;
///
/// #[async_trait]
/// impl Provider for Canned {
///     async fn complete(
///         &self,
///         _messages: &[Message],
///         _tools: &[ToolDescriptor],
///     ) -> Result<CompletionResponse> {
///         Ok(CompletionResponse::new(Message::assistant("Response")))
///     }
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Complete a conversation given its full history and the merged tool
    /// list.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::HostError::CompletionEndpoint`] if the call
    /// fails or the response cannot be understood.
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<CompletionResponse>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "provider"
    }
}

/// Drop a trailing assistant tool-call message whose calls are not all
/// answered, together with the partial tool results after it.
///
/// Returns how many messages were removed. Histories that end in a complete
/// turn are left untouched.
///
/// # Examples
///
/// ```
/// use mcphost::providers::{trim_unanswered_tool_calls, Message, ToolCall};
///
/// let mut messages = vec![
///     Message::user("list files"),
///     Message::assistant_with_tools(None, vec![ToolCall::new("c1", "ls", "{}")]),
/// ];
/// assert_eq!(trim_unanswered_tool_calls(&mut messages), 1);
/// assert_eq!(messages.len(), 1);
/// ```
pub fn trim_unanswered_tool_calls(messages: &mut Vec<Message>) -> usize {
    use std::collections::HashSet;

    let Some(last_assistant) = messages.iter().rposition(|m| m.role == ROLE_ASSISTANT) else {
        return 0;
    };

    let requested: HashSet<&str> = messages[last_assistant]
        .requested_tool_calls()
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    if requested.is_empty() {
        return 0;
    }

    let answered: HashSet<&str> = messages[last_assistant + 1..]
        .iter()
        .filter(|m| m.role == ROLE_TOOL)
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    if requested.is_subset(&answered) {
        return 0;
    }

    let removed = messages.len() - last_assistant;
    messages.truncate(last_assistant);
    removed
}
