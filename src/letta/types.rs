//! Wire types for the Letta API, trimmed to what the bridge exercises.

use serde::{Deserialize, Serialize};

/// Embedding configuration attached to an agent or folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Endpoint type (openai, huggingface, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_endpoint_type: Option<String>,
    /// Optional endpoint URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_endpoint: Option<String>,
    /// Embedding dimension.
    pub embedding_dim: u32,
    /// Chunk size for text splitting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_chunk_size: Option<u32>,
}

/// State of a Letta agent as returned by the agents endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Stable agent identifier (`agent-<uuid>`).
    pub id: String,
    /// Mutable display name.
    pub name: String,
    /// The agent's own embedding configuration, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_config: Option<EmbeddingConfig>,
}

/// Query parameters for the agents list endpoint.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ListAgentsParams {
    /// Cursor: return agents after this id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Maximum number of items to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user.
    User,
    /// System-injected context.
    System,
    /// Agent response.
    Assistant,
}

/// One part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An inline image.
    Image {
        /// Where the image data comes from.
        source: ImageSource,
    },
}

/// Source of inline image data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Base64-encoded bytes.
    Base64 {
        /// MIME type of the encoded image.
        media_type: String,
        /// The base64 payload.
        data: String,
    },
}

/// Message content: either a plain string or multimodal parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageCreateContent {
    /// Simple text body.
    Text(String),
    /// Multimodal content parts.
    Parts(Vec<ContentPart>),
}

/// A message to create on an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreate {
    /// Author role.
    pub role: MessageRole,
    /// Message content.
    pub content: MessageCreateContent,
}

impl MessageCreate {
    /// A plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageCreateContent::Text(text.into()),
        }
    }

    /// A multimodal user message.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageCreateContent::Parts(parts),
        }
    }
}

/// Request body for the messages create endpoint.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateMessagesRequest {
    /// The messages to send.
    pub messages: Vec<MessageCreate>,
}

/// A tool invocation embedded in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    #[serde(default)]
    pub name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    pub arguments: String,
    /// Identifier correlating call and return.
    #[serde(default)]
    pub tool_call_id: String,
}

/// Result status of a tool return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolReturnStatus {
    /// The tool ran successfully.
    Success,
    /// The tool failed.
    Error,
    /// Anything the server may add later.
    #[serde(other)]
    #[default]
    Unknown,
}

/// A single message from a blocking response, discriminated by
/// `message_type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "message_type")]
pub enum LettaMessage {
    /// Agent-internal reasoning.
    #[serde(rename = "reasoning_message")]
    Reasoning {
        /// The reasoning text.
        #[serde(default)]
        reasoning: String,
    },
    /// A request to execute a tool.
    #[serde(rename = "tool_call_message")]
    ToolCall {
        /// The tool being invoked.
        tool_call: ToolCall,
    },
    /// The result of a tool execution.
    #[serde(rename = "tool_return_message")]
    ToolReturn {
        /// Raw tool output.
        #[serde(default)]
        tool_return: String,
        /// Whether the tool succeeded.
        #[serde(default)]
        status: ToolReturnStatus,
    },
    /// The agent's user-facing response.
    #[serde(rename = "assistant_message")]
    Assistant {
        /// Response content (string or content-part array).
        content: serde_json::Value,
    },
    /// A message from the user (appears in history listings).
    #[serde(rename = "user_message")]
    User {
        /// Message content (string or content-part array).
        content: serde_json::Value,
    },
    /// Anything else; preserved but unprocessed.
    #[serde(other)]
    Other,
}

/// Response from a blocking message create.
#[derive(Debug, Clone, Deserialize)]
pub struct LettaResponse {
    /// All step messages produced during the turn.
    #[serde(default)]
    pub messages: Vec<LettaMessage>,
}

/// Flatten a Letta content value (string or `[{type: text, text}]` array)
/// into plain text, joining parts with spaces.
pub fn content_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// One raw chunk of the step stream, before normalization.
///
/// The server multiplexes many shapes over one SSE channel; every field the
/// bridge cares about is optional here and the chunk parser decides what the
/// event means from `message_type`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StepChunk {
    /// Discriminator for the chunk shape.
    #[serde(default)]
    pub message_type: String,
    /// Reasoning text (`reasoning_message`).
    pub reasoning: Option<String>,
    /// Tool invocation (`tool_call_message`).
    pub tool_call: Option<ToolCall>,
    /// Tool invocations awaiting approval (`approval_request_message`).
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool output (`tool_return_message`).
    pub tool_return: Option<String>,
    /// Tool status (`tool_return_message`).
    pub status: Option<String>,
    /// Assistant content (`assistant_message`).
    pub content: Option<serde_json::Value>,
    /// Stop reason (`stop_reason`).
    pub stop_reason: Option<String>,
    /// Completion token count (`usage_statistics`).
    pub completion_tokens: Option<u64>,
    /// Prompt token count (`usage_statistics`).
    pub prompt_tokens: Option<u64>,
    /// Total token count (`usage_statistics`).
    pub total_tokens: Option<u64>,
    /// Step count (`usage_statistics`).
    pub step_count: Option<u64>,
    /// Error message (`error_message`).
    pub message: Option<String>,
    /// Error type (`error_message`).
    pub error_type: Option<String>,
    /// Error detail (`error_message`).
    pub detail: Option<String>,
}

/// A memory block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Label (e.g. `human`, `persona`).
    pub label: String,
    /// Block content.
    #[serde(default)]
    pub value: String,
    /// Optional size limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Request body for block updates.
#[derive(Debug, Clone, Serialize, Default)]
pub struct UpdateBlockRequest {
    /// New value, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// New label, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A Letta folder (called "source" on older servers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    /// Folder identifier.
    pub id: String,
    /// Folder name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Request body for folder creation.
#[derive(Debug, Clone, Serialize)]
pub struct CreateFolderRequest {
    /// Folder name.
    pub name: String,
    /// Folder description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Embedding configuration for indexing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_config: Option<EmbeddingConfig>,
}

/// Indexing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Queued for processing.
    Pending,
    /// Being parsed.
    Parsing,
    /// Being embedded.
    Embedding,
    /// Fully indexed.
    Completed,
    /// Processing failed.
    Error,
    /// Anything the server may add later.
    #[serde(other)]
    #[default]
    Unknown,
}

impl ProcessingStatus {
    /// Whether the status is terminal (no further polling needed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Metadata for a file inside a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderFile {
    /// File identifier.
    pub id: String,
    /// Original file name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Indexing state.
    #[serde(default)]
    pub processing_status: ProcessingStatus,
}

/// Response to a file upload; local servers return a job, cloud returns the
/// file record directly.
#[derive(Debug, Clone, Deserialize)]
pub struct FileUploadResponse {
    /// File or job identifier.
    #[serde(alias = "job_id")]
    pub id: String,
}

/// One entry from the agent message history endpoint, used for room seeding.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    /// Message shape discriminator.
    #[serde(default)]
    pub message_type: String,
    /// Message content (string or content-part array).
    #[serde(default)]
    pub content: serde_json::Value,
}

impl HistoryMessage {
    /// The flattened text of the message.
    pub fn text(&self) -> String {
        content_text(&self.content)
    }
}

/// History listing response; either a bare array or `{"items": [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryPage {
    /// Paginated object form.
    Object {
        /// The messages.
        items: Vec<HistoryMessage>,
    },
    /// Bare array form.
    Array(Vec<HistoryMessage>),
}

impl HistoryPage {
    /// The messages regardless of response shape.
    pub fn into_items(self) -> Vec<HistoryMessage> {
        match self {
            Self::Object { items } => items,
            Self::Array(items) => items,
        }
    }
}
