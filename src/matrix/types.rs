//! Wire types for the Matrix Client-Server API, trimmed to what the bridge
//! exercises.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Login request body for `m.login.password`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Always `m.login.password`.
    #[serde(rename = "type")]
    pub login_type: String,
    /// Who is logging in.
    pub identifier: LoginIdentifier,
    /// Account password.
    pub password: String,
}

impl LoginRequest {
    /// Password login for the given full user id or localpart.
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login_type: "m.login.password".to_string(),
            identifier: LoginIdentifier {
                id_type: "m.id.user".to_string(),
                user: user.into(),
            },
            password: password.into(),
        }
    }
}

/// The `identifier` stanza of a password login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginIdentifier {
    /// Always `m.id.user`.
    #[serde(rename = "type")]
    pub id_type: String,
    /// User id or localpart.
    pub user: String,
}

/// An authenticated session returned by login or registration.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    /// Bearer token for subsequent calls.
    pub access_token: String,
    /// Fully-qualified user id the token belongs to.
    #[serde(default)]
    pub user_id: String,
}

/// Registration request body with the no-challenge auth stanza.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    /// Desired localpart.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Dummy auth, accepted by servers with open registration.
    pub auth: DummyAuth,
}

impl RegisterRequest {
    /// Build a registration request for the given localpart.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            auth: DummyAuth {
                auth_type: "m.login.dummy".to_string(),
            },
        }
    }
}

/// The `m.login.dummy` auth stanza.
#[derive(Debug, Clone, Serialize)]
pub struct DummyAuth {
    /// Always `m.login.dummy`.
    #[serde(rename = "type")]
    pub auth_type: String,
}

/// One entry of a room's `initial_state`.
#[derive(Debug, Clone, Serialize)]
pub struct InitialStateEvent {
    /// State event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// State key, usually empty.
    pub state_key: String,
    /// Event content.
    pub content: Value,
}

/// Initial state shared by every room the bridge creates: guests forbidden,
/// history visible to members.
pub fn standard_initial_state() -> Vec<InitialStateEvent> {
    vec![
        InitialStateEvent {
            event_type: "m.room.guest_access".to_string(),
            state_key: String::new(),
            content: serde_json::json!({"guest_access": "forbidden"}),
        },
        InitialStateEvent {
            event_type: "m.room.history_visibility".to_string(),
            state_key: String::new(),
            content: serde_json::json!({"history_visibility": "shared"}),
        },
    ]
}

/// Room creation request body.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CreateRoomRequest {
    /// Room display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Room topic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Creation preset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    /// Users invited at creation time.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invite: Vec<String>,
    /// Whether the room is a direct chat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_direct: Option<bool>,
    /// Extra `m.room.create` content (e.g. `{"type": "m.space"}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_content: Option<Value>,
    /// Power-level overrides applied at creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_level_content_override: Option<Value>,
    /// Initial state events.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub initial_state: Vec<InitialStateEvent>,
}

/// Response from room creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomResponse {
    /// Id of the new room.
    pub room_id: String,
}

/// Response carrying an event id (send, redact, state PUT).
#[derive(Debug, Clone, Deserialize)]
pub struct EventIdResponse {
    /// Id of the accepted event.
    pub event_id: String,
}

/// Response from the joined-rooms endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinedRoomsResponse {
    /// Room ids the account has joined.
    pub joined_rooms: Vec<String>,
}

/// Response from the joined-members endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinedMembersResponse {
    /// Member info keyed by user id.
    pub joined: Map<String, Value>,
}

/// Response from the join endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinResponse {
    /// Id of the joined room.
    pub room_id: String,
}

/// Profile display-name response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DisplayNameResponse {
    /// The display name, if set.
    #[serde(default)]
    pub displayname: Option<String>,
}

/// Content of an `m.room.message` event sent by the bridge.
///
/// `extra` carries bridge-private fields such as `m.letta_historical` and
/// relation markers; it is flattened into the event content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomMessageContent {
    /// Message type, `m.text` for everything the bridge sends.
    pub msgtype: String,
    /// Plain-text body.
    pub body: String,
    /// Additional content fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoomMessageContent {
    /// A plain text message.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            msgtype: "m.text".to_string(),
            body: body.into(),
            extra: Map::new(),
        }
    }

    /// Mark this message as seeded history so dispatch skips it on replay.
    pub fn historical(mut self) -> Self {
        self.extra
            .insert("m.letta_historical".to_string(), Value::Bool(true));
        self.extra.insert(
            "m.relates_to".to_string(),
            serde_json::json!({"rel_type": "m.annotation"}),
        );
        self
    }

    /// Turn this message into a replacement (edit) of an earlier event.
    pub fn replacing(mut self, event_id: &str) -> Self {
        let body = self.body.clone();
        self.extra.insert(
            "m.new_content".to_string(),
            serde_json::json!({"msgtype": "m.text", "body": body}),
        );
        self.extra.insert(
            "m.relates_to".to_string(),
            serde_json::json!({"rel_type": "m.replace", "event_id": event_id}),
        );
        self.body = format!("* {}", self.body);
        self
    }
}

/// An inbound timeline event, flattened for dispatch.
#[derive(Debug, Clone)]
pub struct MatrixEvent {
    /// Event id.
    pub event_id: String,
    /// Room the event arrived in.
    pub room_id: String,
    /// Sender user id.
    pub sender: String,
    /// Server timestamp in milliseconds.
    pub origin_server_ts: u64,
    /// Message type from the content (`m.text`, `m.image`, ...).
    pub msgtype: String,
    /// Plain-text body from the content.
    pub body: String,
    /// Full event content as received.
    pub content: Value,
}

impl MatrixEvent {
    /// Whether the event carries the seeded-history marker.
    pub fn is_historical(&self) -> bool {
        self.content
            .get("m.letta_historical")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Whether this is a media message (`m.file`, `m.image`, `m.audio`).
    pub fn is_media(&self) -> bool {
        matches!(self.msgtype.as_str(), "m.file" | "m.image" | "m.audio")
    }

    /// The agent id injected by the inter-agent MCP tool, if present.
    pub fn from_agent_id(&self) -> Option<&str> {
        self.content.get("m.letta.from_agent_id")?.as_str()
    }

    /// The agent name injected by the inter-agent MCP tool, if present.
    pub fn from_agent_name(&self) -> Option<&str> {
        self.content.get("m.letta.from_agent_name")?.as_str()
    }

    /// The `mxc://` URL for media messages.
    pub fn media_url(&self) -> Option<&str> {
        self.content.get("url")?.as_str()
    }

    /// The `info` block of a media message.
    pub fn media_info(&self) -> Option<&Value> {
        self.content.get("info")
    }
}

/// Subset of the sync response the bridge consumes.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncResponse {
    /// Token to pass as `since` on the next call.
    pub next_batch: String,
    /// Per-room updates.
    #[serde(default)]
    pub rooms: SyncRooms,
}

/// The `rooms` section of a sync response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncRooms {
    /// Rooms the account is joined to.
    #[serde(default)]
    pub join: Map<String, Value>,
}

impl SyncResponse {
    /// Flatten all joined-room timeline message events.
    pub fn message_events(&self) -> Vec<MatrixEvent> {
        let mut events = Vec::new();
        for (room_id, room) in &self.rooms.join {
            let Some(timeline_events) = room
                .get("timeline")
                .and_then(|t| t.get("events"))
                .and_then(|e| e.as_array())
            else {
                continue;
            };
            for raw in timeline_events {
                if raw.get("type").and_then(|t| t.as_str()) != Some("m.room.message") {
                    continue;
                }
                let Some(event_id) = raw.get("event_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                let Some(sender) = raw.get("sender").and_then(|v| v.as_str()) else {
                    continue;
                };
                let content = raw.get("content").cloned().unwrap_or(Value::Null);
                events.push(MatrixEvent {
                    event_id: event_id.to_string(),
                    room_id: room_id.clone(),
                    sender: sender.to_string(),
                    origin_server_ts: raw
                        .get("origin_server_ts")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                    msgtype: content
                        .get("msgtype")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    body: content
                        .get("body")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    content,
                });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_request_shape() {
        let req = LoginRequest::password("@letta:example.org", "secret");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "m.login.password");
        assert_eq!(json["identifier"]["type"], "m.id.user");
        assert_eq!(json["identifier"]["user"], "@letta:example.org");
        assert_eq!(json["password"], "secret");
    }

    #[test]
    fn test_register_request_shape() {
        let req = RegisterRequest::new("agent_abc", "pw");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["auth"]["type"], "m.login.dummy");
        assert_eq!(json["username"], "agent_abc");
    }

    #[test]
    fn test_standard_initial_state() {
        let state = standard_initial_state();
        assert_eq!(state.len(), 2);
        assert_eq!(state[0].event_type, "m.room.guest_access");
        assert_eq!(state[0].content["guest_access"], "forbidden");
        assert_eq!(state[1].content["history_visibility"], "shared");
    }

    #[test]
    fn test_historical_marker() {
        let content = RoomMessageContent::text("[History] hello").historical();
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["m.letta_historical"], true);
        assert_eq!(json["m.relates_to"]["rel_type"], "m.annotation");
        assert_eq!(json["msgtype"], "m.text");
    }

    #[test]
    fn test_replacement_content() {
        let content = RoomMessageContent::text("updated").replacing("$orig");
        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["body"], "* updated");
        assert_eq!(json["m.new_content"]["body"], "updated");
        assert_eq!(json["m.relates_to"]["rel_type"], "m.replace");
        assert_eq!(json["m.relates_to"]["event_id"], "$orig");
    }

    #[test]
    fn test_sync_event_extraction() {
        let raw = serde_json::json!({
            "next_batch": "s1",
            "rooms": {
                "join": {
                    "!room:example.org": {
                        "timeline": {
                            "events": [
                                {
                                    "type": "m.room.message",
                                    "event_id": "$e1",
                                    "sender": "@user:example.org",
                                    "origin_server_ts": 1700000000000u64,
                                    "content": {"msgtype": "m.text", "body": "hi"}
                                },
                                {
                                    "type": "m.room.member",
                                    "event_id": "$e2",
                                    "sender": "@user:example.org",
                                    "content": {}
                                }
                            ]
                        }
                    }
                }
            }
        });
        let sync: SyncResponse = serde_json::from_value(raw).unwrap();
        let events = sync.message_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "$e1");
        assert_eq!(events[0].room_id, "!room:example.org");
        assert_eq!(events[0].body, "hi");
        assert_eq!(events[0].origin_server_ts, 1_700_000_000_000);
        assert!(!events[0].is_media());
    }

    #[test]
    fn test_event_helpers() {
        let event = MatrixEvent {
            event_id: "$e".into(),
            room_id: "!r:s".into(),
            sender: "@u:s".into(),
            origin_server_ts: 1,
            msgtype: "m.image".into(),
            body: "photo.jpg".into(),
            content: serde_json::json!({
                "msgtype": "m.image",
                "body": "photo.jpg",
                "url": "mxc://s/abc",
                "info": {"mimetype": "image/jpeg", "size": 1024},
                "m.letta.from_agent_id": "agent-1",
                "m.letta.from_agent_name": "Scout"
            }),
        };
        assert!(event.is_media());
        assert!(!event.is_historical());
        assert_eq!(event.media_url(), Some("mxc://s/abc"));
        assert_eq!(event.from_agent_id(), Some("agent-1"));
        assert_eq!(event.from_agent_name(), Some("Scout"));
    }
}
