//! Inbound message dispatch: classification, target resolution, prompt
//! shaping, Letta invocation, and response delivery as the agent identity.

use crate::config::localpart;
use crate::dedupe::EventDedupe;
use crate::error::{BridgeError, BridgeResult};
use crate::letta::types::{content_text, LettaMessage, MessageCreate};
use crate::letta::LettaClient;
use crate::matrix::types::{MatrixEvent, RoomMessageContent};
use crate::matrix::{HomeserverClient, TypingGuard};
use crate::media::{MediaArtifact, MediaHandler};
use crate::prompt;
use crate::store::{AgentUserMapping, MappingStore};
use crate::streaming::{RoomSink, StepStream, StreamingMessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The agent a message resolved to, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Letta agent id.
    pub agent_id: String,
    /// Current agent name.
    pub agent_name: String,
    /// Which strategy found it (`room`, `member`, or `default`).
    pub via: &'static str,
}

/// Sends and redacts as one agent identity within one turn.
struct AgentSink {
    homeserver: Arc<HomeserverClient>,
    token: String,
}

#[async_trait]
impl RoomSink for AgentSink {
    async fn send(&self, room_id: &str, body: &str) -> BridgeResult<String> {
        self.homeserver.send_text(room_id, body, &self.token).await
    }

    async fn delete(&self, room_id: &str, event_id: &str) -> BridgeResult<()> {
        self.homeserver
            .redact(room_id, event_id, Some("progress update superseded"), &self.token)
            .await?;
        Ok(())
    }

    async fn edit(&self, room_id: &str, event_id: &str, body: &str) -> BridgeResult<()> {
        let content = RoomMessageContent::text(body).replacing(event_id);
        self.homeserver
            .send_message(room_id, &content, &self.token)
            .await?;
        Ok(())
    }
}

/// Routes every inbound Matrix event.
pub struct MessageDispatcher {
    homeserver: Arc<HomeserverClient>,
    letta: Arc<LettaClient>,
    store: Arc<MappingStore>,
    dedupe: Arc<EventDedupe>,
    media: Arc<MediaHandler>,
    bot_user_id: String,
    bot_token: String,
    server_name: String,
    default_agent_id: Option<String>,
    streaming_enabled: bool,
    streaming_timeout: Duration,
    startup_ms: u64,
}

impl MessageDispatcher {
    /// Create a dispatcher.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        homeserver: Arc<HomeserverClient>,
        letta: Arc<LettaClient>,
        store: Arc<MappingStore>,
        dedupe: Arc<EventDedupe>,
        media: Arc<MediaHandler>,
        bot_user_id: String,
        bot_token: String,
        server_name: String,
        default_agent_id: Option<String>,
        streaming_enabled: bool,
        streaming_timeout: Duration,
        startup_ms: u64,
    ) -> Self {
        Self {
            homeserver,
            letta,
            store,
            dedupe,
            media,
            bot_user_id,
            bot_token,
            server_name,
            default_agent_id,
            streaming_enabled,
            streaming_timeout,
            startup_ms,
        }
    }

    /// Entry point for every event from the sync loop. Never propagates
    /// errors; per-event failures are logged and, where useful, reported
    /// into the room.
    pub async fn handle_event(&self, event: MatrixEvent) {
        if let Some(mapping) = self.filter(&event).await {
            let result = if event.is_media() {
                self.handle_media_event(&event, &mapping).await
            } else if event.msgtype == "m.text" {
                self.handle_text_event(&event, &mapping).await
            } else {
                Ok(())
            };

            if let Err(error) = result {
                tracing::error!(
                    event_id = %event.event_id,
                    room_id = %event.room_id,
                    sender = %event.sender,
                    error = %error,
                    "event dispatch failed"
                );
                self.report_error(&event.room_id, &error).await;
            }
        }
    }

    /// The short-circuit filter chain. Returns the room's mapping when the
    /// event should be processed.
    async fn filter(&self, event: &MatrixEvent) -> Option<AgentUserMapping> {
        if self.dedupe.check_and_insert(&event.event_id) {
            tracing::debug!(event_id = %event.event_id, "duplicate event, skipping");
            return None;
        }
        if event.sender == self.bot_user_id {
            return None;
        }
        // Boot replay guard: nothing from before process start is processed.
        if event.origin_server_ts < self.startup_ms {
            tracing::debug!(event_id = %event.event_id, "event predates startup, skipping");
            return None;
        }
        if event.is_historical() {
            tracing::debug!(event_id = %event.event_id, "seeded history message, skipping");
            return None;
        }

        let mapping = match self.store.get_by_room_id(&event.room_id).await {
            Some(mapping) => mapping,
            None => {
                // Relay and bridge rooms stay silent.
                tracing::debug!(room_id = %event.room_id, "no agent mapping for room, skipping");
                return None;
            }
        };

        if event.sender == mapping.matrix_user_id {
            tracing::debug!(sender = %event.sender, "message from the room's own agent, skipping");
            return None;
        }

        Some(mapping)
    }

    /// Resolve which agent should receive a message in this room.
    pub async fn resolve_target(&self, room_id: &str) -> Option<ResolvedTarget> {
        if let Some(mapping) = self.store.get_by_room_id(room_id).await {
            return Some(ResolvedTarget {
                agent_id: mapping.agent_id,
                agent_name: mapping.agent_name,
                via: "room",
            });
        }

        if let Ok(members) = self.homeserver.joined_members(room_id, &self.bot_token).await {
            let suffix = format!(":{}", self.server_name);
            for member in members {
                if member.starts_with("@agent_") && member.ends_with(&suffix) {
                    if let Some(mapping) = self.store.get_by_user_id(&member).await {
                        return Some(ResolvedTarget {
                            agent_id: mapping.agent_id,
                            agent_name: mapping.agent_name,
                            via: "member",
                        });
                    }
                }
            }
        }

        self.default_agent_id.as_ref().map(|agent_id| {
            tracing::info!(room_id, "falling back to default agent");
            ResolvedTarget {
                agent_id: agent_id.clone(),
                agent_name: "default".to_string(),
                via: "default",
            }
        })
    }

    /// Wrap the body with routing context based on who sent it.
    async fn shape_prompt(&self, event: &MatrixEvent, room_mapping: &AgentUserMapping) -> String {
        // Inter-agent metadata from the MCP tool wins; otherwise a sender
        // that is itself a mapped agent identity counts.
        let (from_id, from_name) = match (event.from_agent_id(), event.from_agent_name()) {
            (Some(id), Some(name)) => (Some(id.to_string()), Some(name.to_string())),
            _ => match self.store.get_by_user_id(&event.sender).await {
                Some(sender_mapping)
                    if sender_mapping.matrix_user_id != room_mapping.matrix_user_id =>
                {
                    (
                        Some(sender_mapping.agent_id),
                        Some(sender_mapping.agent_name),
                    )
                }
                _ => (None, None),
            },
        };

        if let (Some(from_id), Some(from_name)) = (from_id, from_name) {
            tracing::info!(
                sender = %event.sender,
                from_agent = %from_name,
                "inter-agent message"
            );
            return prompt::inter_agent_message(&event.body, &from_name, &from_id);
        }

        if prompt::is_opencode_sender(&event.sender) {
            tracing::info!(sender = %event.sender, "message from OpenCode identity");
            return prompt::opencode_message(&event.body, &event.sender);
        }

        event.body.clone()
    }

    async fn handle_text_event(
        &self,
        event: &MatrixEvent,
        mapping: &AgentUserMapping,
    ) -> BridgeResult<()> {
        let target = self
            .resolve_target(&event.room_id)
            .await
            .ok_or_else(|| BridgeError::config("no agent resolvable for room"))?;

        tracing::info!(
            event_id = %event.event_id,
            room_id = %event.room_id,
            sender = %event.sender,
            agent_id = %target.agent_id,
            via = target.via,
            "dispatching message"
        );

        let body = self.shape_prompt(event, mapping).await;
        self.dispatch_to_agent(event, mapping, &target.agent_id, vec![MessageCreate::user(body)])
            .await
    }

    async fn handle_media_event(
        &self,
        event: &MatrixEvent,
        mapping: &AgentUserMapping,
    ) -> BridgeResult<()> {
        let artifact = match self.media.handle(event, Some(mapping.agent_id.as_str())).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return Ok(()),
            Err(error) => {
                // Media failures are user-visible one-liners, never fatal.
                self.report_error(&event.room_id, &error).await;
                return Ok(());
            }
        };

        match artifact {
            MediaArtifact::Multimodal(parts) => {
                self.dispatch_to_agent(
                    event,
                    mapping,
                    &mapping.agent_id,
                    vec![MessageCreate::user_parts(parts)],
                )
                .await
            }
            MediaArtifact::Transcript(text) | MediaArtifact::ExtractedText { text, .. } => {
                self.dispatch_to_agent(
                    event,
                    mapping,
                    &mapping.agent_id,
                    vec![MessageCreate::user(text)],
                )
                .await
            }
            MediaArtifact::IndexedFile { status, .. } => {
                let note = if status == crate::letta::types::ProcessingStatus::Completed {
                    format!("✅ File {} uploaded successfully and indexed", event.body)
                } else {
                    format!("⚠️ File processing did not complete for {}", event.body)
                };
                self.send_note(&event.room_id, mapping, &note).await;
                Ok(())
            }
        }
    }

    /// Call Letta (streaming or blocking) and deliver the response as the
    /// agent's own identity.
    async fn dispatch_to_agent(
        &self,
        event: &MatrixEvent,
        mapping: &AgentUserMapping,
        agent_id: &str,
        messages: Vec<MessageCreate>,
    ) -> BridgeResult<()> {
        let agent_session = self
            .homeserver
            .login(localpart(&mapping.matrix_user_id), &mapping.matrix_password)
            .await
            .ok();

        let typing = agent_session.as_ref().map(|session| {
            TypingGuard::start(
                self.homeserver.clone(),
                event.room_id.clone(),
                mapping.matrix_user_id.clone(),
                session.access_token.clone(),
            )
        });

        let result = if self.streaming_enabled {
            self.dispatch_streaming(event, agent_id, messages, agent_session.as_ref())
                .await
        } else {
            self.dispatch_blocking(event, mapping, agent_id, messages)
                .await
        };

        if let Some(typing) = typing {
            typing.stop().await;
        }
        result
    }

    async fn dispatch_streaming(
        &self,
        event: &MatrixEvent,
        agent_id: &str,
        messages: Vec<MessageCreate>,
        agent_session: Option<&crate::matrix::Session>,
    ) -> BridgeResult<()> {
        let chunks = self.letta.messages().stream(agent_id, messages).await?;
        let mut stream = StepStream::new(
            chunks,
            self.streaming_timeout,
            crate::streaming::DEFAULT_IDLE_TIMEOUT,
        );

        // Fall back to speaking as the bot when the agent login failed.
        let sink: Box<dyn RoomSink> = match agent_session {
            Some(session) => Box::new(AgentSink {
                homeserver: self.homeserver.clone(),
                token: session.access_token.clone(),
            }),
            None => Box::new(AgentSink {
                homeserver: self.homeserver.clone(),
                token: self.bot_token.clone(),
            }),
        };

        let mut handler = StreamingMessageHandler::new(sink.as_ref(), &event.room_id, false);
        while let Some(stream_event) = stream.next_event().await {
            handler.handle(&stream_event).await;
        }
        handler.cleanup().await;
        Ok(())
    }

    async fn dispatch_blocking(
        &self,
        event: &MatrixEvent,
        mapping: &AgentUserMapping,
        agent_id: &str,
        messages: Vec<MessageCreate>,
    ) -> BridgeResult<()> {
        let response = self.letta.messages().create(agent_id, messages).await?;
        let reply = assemble_response(&response.messages);
        if reply.is_empty() {
            tracing::warn!(agent_id, "agent returned no assistant content");
            return Ok(());
        }

        if self
            .send_as_agent(&event.room_id, mapping, &reply)
            .await
            .is_none()
        {
            tracing::warn!(room_id = %event.room_id, "send as agent failed, falling back to bot");
            self.homeserver
                .send_text(&event.room_id, &reply, &self.bot_token)
                .await?;
        }
        Ok(())
    }

    /// Deliver a message as the room's agent identity. Returns the event id
    /// on success.
    pub async fn send_as_agent(
        &self,
        room_id: &str,
        mapping: &AgentUserMapping,
        body: &str,
    ) -> Option<String> {
        let session = match self
            .homeserver
            .login(localpart(&mapping.matrix_user_id), &mapping.matrix_password)
            .await
        {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(user_id = %mapping.matrix_user_id, error = %error, "agent login failed");
                return None;
            }
        };

        match self
            .homeserver
            .send_text(room_id, body, &session.access_token)
            .await
        {
            Ok(event_id) => Some(event_id),
            Err(error) => {
                tracing::error!(room_id, error = %error, "send as agent failed");
                None
            }
        }
    }

    /// Redact an event as the room's agent identity.
    pub async fn redact_as_agent(
        &self,
        room_id: &str,
        mapping: &AgentUserMapping,
        event_id: &str,
    ) -> bool {
        let session = match self
            .homeserver
            .login(localpart(&mapping.matrix_user_id), &mapping.matrix_password)
            .await
        {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(user_id = %mapping.matrix_user_id, error = %error, "agent login failed");
                return false;
            }
        };

        self.homeserver
            .redact(room_id, event_id, None, &session.access_token)
            .await
            .is_ok()
    }

    /// Post a short note into the room, preferring the agent identity.
    async fn send_note(&self, room_id: &str, mapping: &AgentUserMapping, note: &str) {
        if self.send_as_agent(room_id, mapping, note).await.is_none() {
            if let Err(error) = self.homeserver.send_text(room_id, note, &self.bot_token).await {
                tracing::error!(room_id, error = %error, "failed to send note");
            }
        }
    }

    /// Surface a dispatch failure to the room as a short ⚠️ message.
    async fn report_error(&self, room_id: &str, error: &BridgeError) {
        let body = match error {
            BridgeError::ConversationBusy { .. } => {
                "⚠️ The agent is busy with another conversation. Please try again in a moment."
                    .to_string()
            }
            BridgeError::FileUpload { message } => format!("⚠️ {message}"),
            other => {
                let text = other.to_string();
                let brief: String = text.chars().take(100).collect();
                format!("⚠️ Sorry, I encountered an error while processing your message: {brief}")
            }
        };

        let delivered = match self.store.get_by_room_id(room_id).await {
            Some(mapping) => self.send_as_agent(room_id, &mapping, &body).await.is_some(),
            None => false,
        };
        if !delivered {
            if let Err(error) = self.homeserver.send_text(room_id, &body, &self.bot_token).await {
                tracing::error!(room_id, error = %error, "failed to deliver error message");
            }
        }
    }
}

/// Assemble the user-visible reply from a blocking response: every
/// assistant message plus inter-agent sends, joined with spaces.
pub fn assemble_response(messages: &[LettaMessage]) -> String {
    let mut parts = Vec::new();
    for message in messages {
        match message {
            LettaMessage::Assistant { content } => {
                let text = content_text(content);
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            LettaMessage::ToolCall { tool_call } if tool_call.name == "matrix_agent_message" => {
                if let Ok(args) = serde_json::from_str::<serde_json::Value>(&tool_call.arguments) {
                    if let Some(text) = args.get("message").and_then(|m| m.as_str()) {
                        parts.push(format!("[Sent to another agent]: {text}"));
                    }
                }
            }
            _ => {}
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::letta::types::{ToolCall, ToolReturnStatus};

    #[test]
    fn test_assemble_response_joins_assistant_messages() {
        let messages = vec![
            LettaMessage::Reasoning {
                reasoning: "hmm".into(),
            },
            LettaMessage::Assistant {
                content: serde_json::json!("First part."),
            },
            LettaMessage::ToolReturn {
                tool_return: "ok".into(),
                status: ToolReturnStatus::Success,
            },
            LettaMessage::Assistant {
                content: serde_json::json!("Second part."),
            },
        ];
        assert_eq!(assemble_response(&messages), "First part. Second part.");
    }

    #[test]
    fn test_assemble_response_includes_inter_agent_sends() {
        let messages = vec![
            LettaMessage::ToolCall {
                tool_call: ToolCall {
                    name: "matrix_agent_message".into(),
                    arguments: r#"{"message":"please review the draft"}"#.into(),
                    tool_call_id: "tc1".into(),
                },
            },
            LettaMessage::Assistant {
                content: serde_json::json!("Forwarded."),
            },
        ];
        assert_eq!(
            assemble_response(&messages),
            "[Sent to another agent]: please review the draft Forwarded."
        );
    }

    #[test]
    fn test_assemble_response_ignores_other_tools() {
        let messages = vec![LettaMessage::ToolCall {
            tool_call: ToolCall {
                name: "web_search".into(),
                arguments: r#"{"message":"not this"}"#.into(),
                tool_call_id: "tc1".into(),
            },
        }];
        assert_eq!(assemble_response(&messages), "");
    }

    #[test]
    fn test_assemble_response_flattens_content_parts() {
        let messages = vec![LettaMessage::Assistant {
            content: serde_json::json!([
                {"type": "text", "text": "a"},
                {"type": "text", "text": "b"}
            ]),
        }];
        assert_eq!(assemble_response(&messages), "a b");
    }
}
