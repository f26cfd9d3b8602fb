//! Normalized step-stream events and the chunk parser.

use crate::letta::types::{content_text, StepChunk, ToolCall, ToolReturnStatus};

/// Token usage reported at the end of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageStats {
    /// Completion tokens.
    pub completion_tokens: u64,
    /// Prompt tokens.
    pub prompt_tokens: u64,
    /// Total tokens.
    pub total_tokens: u64,
    /// Agent steps taken.
    pub step_count: u64,
}

/// A normalized streaming event, one per agent step.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Agent-internal reasoning.
    Reasoning {
        /// The reasoning text.
        content: String,
    },
    /// The agent is invoking a tool.
    ToolCall {
        /// Tool name.
        tool_name: String,
        /// JSON-encoded arguments.
        arguments: String,
    },
    /// A tool finished.
    ToolReturn {
        /// Tool name (the last one called).
        tool_name: String,
        /// Raw tool output.
        content: String,
        /// Whether the tool succeeded.
        status: ToolReturnStatus,
    },
    /// The agent's user-facing response.
    Assistant {
        /// Response text.
        content: String,
    },
    /// The stream ended.
    Stop {
        /// Why it ended.
        reason: String,
    },
    /// Token usage statistics.
    Usage(UsageStats),
    /// Something went wrong mid-stream.
    Error {
        /// Human-readable message.
        message: String,
        /// Machine-readable kind (e.g. `timeout`).
        error_type: String,
        /// Extra detail, if any.
        detail: Option<String>,
    },
    /// Keepalive.
    Ping,
    /// One or more tool calls await user approval.
    ApprovalRequest {
        /// The tools needing approval.
        tool_calls: Vec<ToolCall>,
    },
}

impl StreamEvent {
    /// Whether this event shows as a progress message (deletable).
    pub fn is_progress(&self) -> bool {
        matches!(self, Self::ToolCall { .. } | Self::ToolReturn { .. })
    }

    /// Whether this is the final response of the turn.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    /// Whether this is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Whether this requires user action before the turn can proceed.
    pub fn is_approval_request(&self) -> bool {
        matches!(self, Self::ApprovalRequest { .. })
    }

    /// A synthetic timeout error event.
    pub fn timeout(seconds: u64) -> Self {
        Self::Error {
            message: format!("Request timed out after {seconds} seconds"),
            error_type: "timeout".to_string(),
            detail: None,
        }
    }

    /// Format the event as a short single-line Matrix progress message.
    pub fn format_progress(&self) -> String {
        match self {
            Self::ToolCall { tool_name, .. } => format!("🔧 {tool_name}..."),
            Self::ToolReturn {
                tool_name, status, ..
            } => {
                if *status == ToolReturnStatus::Success {
                    format!("✅ {tool_name}")
                } else {
                    format!("❌ {tool_name} (failed)")
                }
            }
            Self::Reasoning { content } => {
                let truncated: String = content.chars().take(50).collect();
                if content.chars().count() > 50 {
                    format!("💭 {truncated}...")
                } else {
                    format!("💭 {truncated}")
                }
            }
            Self::ApprovalRequest { tool_calls } => {
                if tool_calls.is_empty() {
                    "⏳ **Approval Required**".to_string()
                } else {
                    let names: Vec<&str> =
                        tool_calls.iter().map(|tc| tc.name.as_str()).collect();
                    format!("⏳ **Approval Required**: {}", names.join(", "))
                }
            }
            Self::Assistant { content } => content.clone(),
            Self::Error { message, .. } => message.clone(),
            _ => String::new(),
        }
    }

    /// Format the full approval body: header plus one indented block per
    /// tool with its name, truncated call id, and truncated arguments.
    pub fn format_approval_body(&self) -> String {
        let Self::ApprovalRequest { tool_calls } = self else {
            return self.format_progress();
        };

        let mut body = self.format_progress();
        if tool_calls.is_empty() {
            return body;
        }

        body.push_str("\n\nTools awaiting approval:");
        for tc in tool_calls {
            let id: String = tc.tool_call_id.chars().take(20).collect();
            let mut args: String = tc.arguments.chars().take(200).collect();
            if tc.arguments.chars().count() > 200 {
                args.push_str("...");
            }
            body.push_str(&format!("\n- **{}** (`{}...`)", tc.name, id));
            if !args.is_empty() {
                body.push_str(&format!("\n  ```\n  {args}\n  ```"));
            }
        }
        body
    }
}

/// Maps raw step chunks to normalized events.
///
/// Stateful: the name of the most recent tool call is remembered so tool
/// returns, which do not repeat it, can be labelled.
#[derive(Debug, Default)]
pub struct ChunkParser {
    include_reasoning: bool,
    last_tool_name: Option<String>,
}

impl ChunkParser {
    /// Create a parser; reasoning events are dropped unless requested.
    pub fn new(include_reasoning: bool) -> Self {
        Self {
            include_reasoning,
            last_tool_name: None,
        }
    }

    /// Parse one chunk. Returns `None` for chunk types the bridge ignores.
    pub fn parse(&mut self, chunk: &StepChunk) -> Option<StreamEvent> {
        match chunk.message_type.as_str() {
            "ping" => Some(StreamEvent::Ping),
            "reasoning_message" => {
                if !self.include_reasoning {
                    return None;
                }
                Some(StreamEvent::Reasoning {
                    content: chunk.reasoning.clone().unwrap_or_default(),
                })
            }
            "tool_call_message" => {
                let tool_call = chunk.tool_call.clone().unwrap_or(ToolCall {
                    name: "unknown".to_string(),
                    arguments: String::new(),
                    tool_call_id: String::new(),
                });
                self.last_tool_name = Some(tool_call.name.clone());
                Some(StreamEvent::ToolCall {
                    tool_name: tool_call.name,
                    arguments: tool_call.arguments,
                })
            }
            "tool_return_message" => Some(StreamEvent::ToolReturn {
                tool_name: self
                    .last_tool_name
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                content: chunk.tool_return.clone().unwrap_or_default(),
                status: match chunk.status.as_deref() {
                    Some("success") => ToolReturnStatus::Success,
                    Some("error") => ToolReturnStatus::Error,
                    _ => ToolReturnStatus::Unknown,
                },
            }),
            "assistant_message" => Some(StreamEvent::Assistant {
                content: chunk
                    .content
                    .as_ref()
                    .map(content_text)
                    .unwrap_or_default(),
            }),
            "stop_reason" => Some(StreamEvent::Stop {
                reason: chunk
                    .stop_reason
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
            "usage_statistics" => Some(StreamEvent::Usage(UsageStats {
                completion_tokens: chunk.completion_tokens.unwrap_or(0),
                prompt_tokens: chunk.prompt_tokens.unwrap_or(0),
                total_tokens: chunk.total_tokens.unwrap_or(0),
                step_count: chunk.step_count.unwrap_or(0),
            })),
            "error_message" => Some(StreamEvent::Error {
                message: chunk
                    .message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string()),
                error_type: chunk
                    .error_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                detail: chunk.detail.clone().filter(|d| !d.is_empty()),
            }),
            "approval_request_message" => {
                let tool_calls = match (&chunk.tool_calls, &chunk.tool_call) {
                    (Some(calls), _) if !calls.is_empty() => calls.clone(),
                    (_, Some(call)) => vec![call.clone()],
                    _ => Vec::new(),
                };
                Some(StreamEvent::ApprovalRequest { tool_calls })
            }
            other => {
                tracing::debug!(message_type = other, "ignoring unknown chunk type");
                None
            }
        }
    }
}
