//! Matrix-side handling of stream events.
//!
//! Handlers receive a narrow [`RoomSink`] interface instead of callables:
//! send, delete, edit, and an optional distinct final-send. The production
//! implementation wraps send-as-agent and redact-as-agent; tests provide a
//! recording fake.

use super::events::StreamEvent;
use crate::error::BridgeResult;
use async_trait::async_trait;
use tokio::time::{Duration, Instant};

/// Minimum spacing between in-place edits of the live progress message.
const EDIT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Outbound message operations scoped to one room identity.
#[async_trait]
pub trait RoomSink: Send + Sync {
    /// Send a message, returning its event id.
    async fn send(&self, room_id: &str, body: &str) -> BridgeResult<String>;

    /// Delete (redact) a previously sent message.
    async fn delete(&self, room_id: &str, event_id: &str) -> BridgeResult<()>;

    /// Replace the body of a previously sent message.
    async fn edit(&self, room_id: &str, event_id: &str, body: &str) -> BridgeResult<()>;

    /// Send the final response. Defaults to [`RoomSink::send`]; override to
    /// attach rich reply context.
    async fn send_final(&self, room_id: &str, body: &str) -> BridgeResult<String> {
        self.send(room_id, body).await
    }
}

/// Progress-then-final handler.
///
/// Tool activity posts as individual progress messages that stay visible as
/// an activity trail; with `delete_progress` each one is removed when the
/// next event arrives.
pub struct StreamingMessageHandler<'a> {
    sink: &'a dyn RoomSink,
    room_id: String,
    delete_progress: bool,
    progress_event_id: Option<String>,
}

impl<'a> StreamingMessageHandler<'a> {
    /// Create a handler for one turn in one room.
    pub fn new(sink: &'a dyn RoomSink, room_id: impl Into<String>, delete_progress: bool) -> Self {
        Self {
            sink,
            room_id: room_id.into(),
            delete_progress,
            progress_event_id: None,
        }
    }

    /// Handle one stream event, returning the id of any message sent.
    pub async fn handle(&mut self, event: &StreamEvent) -> Option<String> {
        if self.delete_progress
            && (event.is_progress() || event.is_final() || event.is_error())
        {
            if let Some(event_id) = self.progress_event_id.take() {
                if let Err(error) = self.sink.delete(&self.room_id, &event_id).await {
                    tracing::warn!(error = %error, "failed to delete progress message");
                }
            }
        }

        match event {
            StreamEvent::Ping
            | StreamEvent::Stop { .. }
            | StreamEvent::Usage(_)
            | StreamEvent::Reasoning { .. } => None,
            StreamEvent::ToolCall { .. } | StreamEvent::ToolReturn { .. } => {
                let body = event.format_progress();
                match self.sink.send(&self.room_id, &body).await {
                    Ok(event_id) => {
                        if self.delete_progress {
                            self.progress_event_id = Some(event_id.clone());
                        }
                        Some(event_id)
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to send progress message");
                        None
                    }
                }
            }
            StreamEvent::Assistant { content } => {
                match self.sink.send_final(&self.room_id, content).await {
                    Ok(event_id) => Some(event_id),
                    Err(error) => {
                        tracing::error!(error = %error, "failed to send final message");
                        None
                    }
                }
            }
            StreamEvent::Error {
                message, detail, ..
            } => {
                let mut body = format!("⚠️ {message}");
                if let Some(detail) = detail {
                    body.push('\n');
                    body.push_str(detail);
                }
                self.sink.send(&self.room_id, &body).await.ok()
            }
            StreamEvent::ApprovalRequest { .. } => {
                let body = event.format_approval_body();
                tracing::info!(room_id = %self.room_id, "sending approval request to room");
                self.sink.send(&self.room_id, &body).await.ok()
            }
        }
    }

    /// Remove any still-outstanding progress message.
    pub async fn cleanup(&mut self) {
        if !self.delete_progress {
            return;
        }
        if let Some(event_id) = self.progress_event_id.take() {
            if let Err(error) = self.sink.delete(&self.room_id, &event_id).await {
                tracing::warn!(error = %error, "failed to clean up progress message");
            }
        }
    }
}

/// Consolidating handler: one message edited in place as progress arrives,
/// replaced by the final assistant body.
pub struct LiveEditStreamingHandler<'a> {
    sink: &'a dyn RoomSink,
    room_id: String,
    event_id: Option<String>,
    lines: Vec<String>,
    last_edit: Option<Instant>,
}

impl<'a> LiveEditStreamingHandler<'a> {
    /// Create a handler for one turn in one room.
    pub fn new(sink: &'a dyn RoomSink, room_id: impl Into<String>) -> Self {
        Self {
            sink,
            room_id: room_id.into(),
            event_id: None,
            lines: Vec::new(),
            last_edit: None,
        }
    }

    /// Handle one stream event.
    pub async fn handle(&mut self, event: &StreamEvent) -> Option<String> {
        match event {
            StreamEvent::Ping
            | StreamEvent::Stop { .. }
            | StreamEvent::Usage(_)
            | StreamEvent::Reasoning { .. } => None,
            StreamEvent::Assistant { content } => self.send_final(content).await,
            StreamEvent::Error { message, .. } => {
                let error_line = format!("⚠️ {message}");
                if self.event_id.is_some() {
                    self.lines.push(error_line);
                    self.flush_edit().await;
                    self.event_id.clone()
                } else {
                    self.sink.send(&self.room_id, &error_line).await.ok()
                }
            }
            _ if event.is_progress() || event.is_approval_request() => {
                self.lines.push(event.format_progress());

                if self.event_id.is_none() {
                    let body = self.lines.join("\n");
                    match self.sink.send(&self.room_id, &body).await {
                        Ok(event_id) => {
                            self.event_id = Some(event_id.clone());
                            self.last_edit = Some(Instant::now());
                            return Some(event_id);
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "failed to send live progress message");
                            return None;
                        }
                    }
                }

                let due = self
                    .last_edit
                    .map_or(true, |at| at.elapsed() >= EDIT_DEBOUNCE);
                if due {
                    self.flush_edit().await;
                }
                self.event_id.clone()
            }
            _ => None,
        }
    }

    async fn send_final(&mut self, content: &str) -> Option<String> {
        if let (Some(event_id), false) = (self.event_id.clone(), self.lines.is_empty()) {
            let body = format!("{}\n\n{}", self.lines.join("\n"), content);
            if let Err(error) = self.sink.edit(&self.room_id, &event_id, &body).await {
                tracing::warn!(error = %error, "failed to edit in final response");
            }
            self.event_id = None;
            self.lines.clear();
            return Some(event_id);
        }

        let sent = self.sink.send_final(&self.room_id, content).await.ok();
        self.event_id = None;
        self.lines.clear();
        sent
    }

    async fn flush_edit(&mut self) {
        let Some(event_id) = self.event_id.clone() else {
            return;
        };
        let body = self.lines.join("\n");
        if let Err(error) = self.sink.edit(&self.room_id, &event_id, &body).await {
            tracing::warn!(error = %error, "failed to edit live progress message");
        }
        self.last_edit = Some(Instant::now());
    }

    /// Flush any pending lines that a debounce held back.
    pub async fn cleanup(&mut self) {
        if self.event_id.is_some() && !self.lines.is_empty() {
            self.flush_edit().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::letta::types::ToolReturnStatus;
    use std::sync::Mutex;

    /// Records every sink operation for assertions.
    #[derive(Default)]
    struct RecordingSink {
        ops: Mutex<Vec<String>>,
        counter: Mutex<u32>,
    }

    impl RecordingSink {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RoomSink for RecordingSink {
        async fn send(&self, _room_id: &str, body: &str) -> BridgeResult<String> {
            let mut counter = self.counter.lock().unwrap();
            *counter += 1;
            let event_id = format!("$ev{}", *counter);
            self.ops.lock().unwrap().push(format!("send:{body}"));
            Ok(event_id)
        }

        async fn delete(&self, _room_id: &str, event_id: &str) -> BridgeResult<()> {
            self.ops.lock().unwrap().push(format!("delete:{event_id}"));
            Ok(())
        }

        async fn edit(&self, _room_id: &str, event_id: &str, body: &str) -> BridgeResult<()> {
            self.ops
                .lock()
                .unwrap()
                .push(format!("edit:{event_id}:{body}"));
            Ok(())
        }

        async fn send_final(&self, _room_id: &str, body: &str) -> BridgeResult<String> {
            let mut counter = self.counter.lock().unwrap();
            *counter += 1;
            self.ops.lock().unwrap().push(format!("final:{body}"));
            Ok(format!("$ev{}", *counter))
        }
    }

    fn tool_call() -> StreamEvent {
        StreamEvent::ToolCall {
            tool_name: "send_message".into(),
            arguments: String::new(),
        }
    }

    fn tool_return() -> StreamEvent {
        StreamEvent::ToolReturn {
            tool_name: "send_message".into(),
            content: String::new(),
            status: ToolReturnStatus::Success,
        }
    }

    #[tokio::test]
    async fn test_progress_then_final_trail() {
        let sink = RecordingSink::default();
        let mut handler = StreamingMessageHandler::new(&sink, "!room:s", false);

        handler.handle(&StreamEvent::Ping).await;
        handler.handle(&tool_call()).await;
        handler.handle(&tool_return()).await;
        handler
            .handle(&StreamEvent::Assistant {
                content: "It is 10:42 UTC.".into(),
            })
            .await;
        handler
            .handle(&StreamEvent::Stop {
                reason: "end_turn".into(),
            })
            .await;
        handler.cleanup().await;

        assert_eq!(
            sink.ops(),
            vec![
                "send:🔧 send_message...",
                "send:✅ send_message",
                "final:It is 10:42 UTC.",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_progress_mode() {
        let sink = RecordingSink::default();
        let mut handler = StreamingMessageHandler::new(&sink, "!room:s", true);

        handler.handle(&tool_call()).await;
        handler.handle(&tool_return()).await;
        handler
            .handle(&StreamEvent::Assistant { content: "done".into() })
            .await;
        handler.cleanup().await;

        assert_eq!(
            sink.ops(),
            vec![
                "send:🔧 send_message...",
                "delete:$ev1",
                "send:✅ send_message",
                "delete:$ev2",
                "final:done",
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_removes_outstanding_progress() {
        let sink = RecordingSink::default();
        let mut handler = StreamingMessageHandler::new(&sink, "!room:s", true);
        handler.handle(&tool_call()).await;
        handler.cleanup().await;
        assert_eq!(sink.ops(), vec!["send:🔧 send_message...", "delete:$ev1"]);
    }

    #[tokio::test]
    async fn test_error_event_formats_with_detail() {
        let sink = RecordingSink::default();
        let mut handler = StreamingMessageHandler::new(&sink, "!room:s", false);
        handler
            .handle(&StreamEvent::Error {
                message: "Request timed out after 120 seconds".into(),
                error_type: "timeout".into(),
                detail: Some("upstream gateway".into()),
            })
            .await;
        assert_eq!(
            sink.ops(),
            vec!["send:⚠️ Request timed out after 120 seconds\nupstream gateway"]
        );
    }

    #[tokio::test]
    async fn test_approval_request_posts_block() {
        let sink = RecordingSink::default();
        let mut handler = StreamingMessageHandler::new(&sink, "!room:s", false);
        handler
            .handle(&StreamEvent::ApprovalRequest {
                tool_calls: vec![crate::letta::types::ToolCall {
                    name: "rm_rf".into(),
                    arguments: "{\"path\": \"/\"}".into(),
                    tool_call_id: "call_abcdef".into(),
                }],
            })
            .await;
        let ops = sink.ops();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].contains("⏳ **Approval Required**: rm_rf"));
        assert!(ops[0].contains("Tools awaiting approval:"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_edit_consolidates() {
        let sink = RecordingSink::default();
        let mut handler = LiveEditStreamingHandler::new(&sink, "!room:s");

        handler.handle(&tool_call()).await;
        // Within the debounce window: the line is buffered, no edit yet.
        handler.handle(&tool_return()).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        handler
            .handle(&StreamEvent::Assistant { content: "answer".into() })
            .await;

        let ops = sink.ops();
        assert_eq!(ops[0], "send:🔧 send_message...");
        assert_eq!(
            ops.last().unwrap(),
            "edit:$ev1:🔧 send_message...\n✅ send_message\n\nanswer"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_edit_debounce_coalesces_edits() {
        let sink = RecordingSink::default();
        let mut handler = LiveEditStreamingHandler::new(&sink, "!room:s");

        handler.handle(&tool_call()).await;
        handler.handle(&tool_return()).await; // buffered, debounced
        handler.handle(&tool_call()).await; // still debounced
        handler.cleanup().await; // flushes the buffer

        let ops = sink.ops();
        assert_eq!(ops.len(), 2);
        assert!(ops[1].starts_with("edit:$ev1:"));
    }

    #[tokio::test]
    async fn test_live_edit_final_without_progress_sends_directly() {
        let sink = RecordingSink::default();
        let mut handler = LiveEditStreamingHandler::new(&sink, "!room:s");
        handler
            .handle(&StreamEvent::Assistant { content: "just text".into() })
            .await;
        assert_eq!(sink.ops(), vec!["final:just text"]);
    }
}
