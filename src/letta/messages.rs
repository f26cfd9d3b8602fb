//! Message API endpoints: blocking dispatch and the SSE step stream.

use super::client::{LettaClient, BLOCKING_MESSAGE_TIMEOUT};
use super::types::{
    CreateMessagesRequest, HistoryPage, LettaResponse, MessageCreate, StepChunk,
};
use crate::error::{BridgeError, BridgeResult};
use crate::retry::{retry_conversation_busy, retry_with_config, RetryConfig};
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use futures::Stream;
use std::pin::Pin;

/// A lazy, non-restartable sequence of raw step chunks. One stream per turn.
pub type ChunkStream = Pin<Box<dyn Stream<Item = BridgeResult<StepChunk>> + Send>>;

/// Request body for the streaming endpoint.
#[derive(Debug, serde::Serialize)]
struct StreamRequest<'a> {
    messages: &'a [MessageCreate],
    stream_tokens: bool,
    include_pings: bool,
}

/// Message API operations.
#[derive(Debug)]
pub struct MessageApi<'a> {
    client: &'a LettaClient,
}

impl<'a> MessageApi<'a> {
    /// Create a new message API instance.
    pub fn new(client: &'a LettaClient) -> Self {
        Self { client }
    }

    /// Send messages to an agent and wait for the complete turn.
    ///
    /// Transient failures back off exponentially (1 s, 2 s, 4 s, capped at
    /// 60 s, three attempts). A busy conversation is retried on its own
    /// 1/2/4 s schedule and surfaces
    /// [`BridgeError::ConversationBusy`] on exhaustion.
    pub async fn create(
        &self,
        agent_id: &str,
        messages: Vec<MessageCreate>,
    ) -> BridgeResult<LettaResponse> {
        let path = format!("v1/agents/{}/messages", agent_id);
        let request = CreateMessagesRequest { messages };
        let dispatch_retry = RetryConfig::letta_dispatch();

        retry_conversation_busy(agent_id, || {
            let path = path.clone();
            let request = &request;
            let dispatch_retry = &dispatch_retry;
            async move {
                retry_with_config(dispatch_retry, || async {
                    self.client
                        .post_with_timeout(&path, request, Some(BLOCKING_MESSAGE_TIMEOUT))
                        .await
                })
                .await
            }
        })
        .await
    }

    /// Open a step stream for one turn.
    ///
    /// Each SSE event is a complete step message; token streaming is off and
    /// keepalive pings are requested so the driver can distinguish a live
    /// but idle stream from a dead one.
    pub async fn stream(
        &self,
        agent_id: &str,
        messages: Vec<MessageCreate>,
    ) -> BridgeResult<ChunkStream> {
        let url = self
            .client
            .base_url()
            .join(&format!("v1/agents/{}/messages/stream", agent_id))?;

        let mut headers = reqwest::header::HeaderMap::new();
        self.client.auth().apply_to_headers(&mut headers)?;
        headers.insert(
            "Accept",
            "text/event-stream"
                .parse()
                .map_err(|_| BridgeError::config("Failed to parse Accept header"))?,
        );

        let request = StreamRequest {
            messages: &messages,
            stream_tokens: false,
            include_pings: true,
        };

        let response = self
            .client
            .http()
            .post(url.clone())
            .headers(headers)
            .json(&request)
            // The stream stays open for the whole turn; the driver owns the
            // deadline, not the per-request timeout.
            .timeout(std::time::Duration::from_secs(24 * 60 * 60))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await?;
            return Err(BridgeError::from_letta_response(
                status,
                body,
                None,
                Some(url),
                Some("POST".to_string()),
            ));
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|result| async move {
                match result {
                    Ok(event) => {
                        if event.data.is_empty() || event.data == "[DONE]" {
                            return None;
                        }
                        match serde_json::from_str::<StepChunk>(&event.data) {
                            Ok(chunk) => Some(Ok(chunk)),
                            Err(e) => {
                                tracing::debug!(error = %e, "skipping unparseable SSE event");
                                None
                            }
                        }
                    }
                    Err(e) => Some(Err(BridgeError::streaming_with_source(
                        "SSE stream error",
                        e,
                    ))),
                }
            });

        Ok(Box::pin(stream))
    }

    /// Fetch recent conversation history for an agent.
    pub async fn history(&self, agent_id: &str) -> BridgeResult<HistoryPage> {
        self.client
            .get(&format!("v1/agents/{}/messages", agent_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::letta::client::LettaClientConfig;

    #[test]
    fn test_message_api_creation() {
        let config = LettaClientConfig::new("http://localhost:8283").unwrap();
        let client = LettaClient::new(config).unwrap();
        let _api = MessageApi::new(&client);
    }

    #[test]
    fn test_stream_request_shape() {
        let messages = vec![MessageCreate::user("hi")];
        let request = StreamRequest {
            messages: &messages,
            stream_tokens: false,
            include_pings: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream_tokens"], false);
        assert_eq!(json["include_pings"], true);
        assert_eq!(json["messages"][0]["content"], "hi");
    }
}
