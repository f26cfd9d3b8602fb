//! Dispatch-path integration tests: routing, identity, filters, and prompt
//! shaping, against mock Matrix and Letta servers.

use letta_matrix_bridge::config::EmbeddingDefaults;
use letta_matrix_bridge::dedupe::EventDedupe;
use letta_matrix_bridge::dispatch::MessageDispatcher;
use letta_matrix_bridge::letta::LettaClient;
use letta_matrix_bridge::matrix::types::MatrixEvent;
use letta_matrix_bridge::matrix::HomeserverClient;
use letta_matrix_bridge::media::document::{
    DocumentExtractor, DocumentParseConfig, DocumentPipeline, ExtractError, RawExtraction,
    WorkerPool,
};
use letta_matrix_bridge::media::MediaHandler;
use letta_matrix_bridge::store::{AgentUserMapping, MappingStore};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MERIDIAN_ID: &str = "agent-597b5756-2915-4560-ba6b-91005f085166";
const MERIDIAN_USER: &str = "@agent_597b5756_2915_4560_ba6b_91005f085166:example.org";
const MERIDIAN_ROOM: &str = "!8I9YBvbr4KpXNedbph:example.org";

/// Startup bound used by every test; events carry later timestamps unless a
/// test exercises the replay guard.
const STARTUP_MS: u64 = 1_700_000_000_000;

struct NoopExtractor;

impl DocumentExtractor for NoopExtractor {
    fn extract(&self, _data: &[u8], _filename: &str) -> Result<RawExtraction, ExtractError> {
        Err(ExtractError::NoText)
    }
}

struct Harness {
    matrix: MockServer,
    letta: MockServer,
    store: Arc<MappingStore>,
    dispatcher: MessageDispatcher,
}

async fn harness() -> Harness {
    let matrix = MockServer::start().await;
    let letta = MockServer::start().await;

    let homeserver =
        Arc::new(HomeserverClient::new(url::Url::parse(&matrix.uri()).unwrap()).unwrap());
    let letta_client = Arc::new(LettaClient::connect(letta.uri(), None).unwrap());
    let store = Arc::new(MappingStore::new("/nonexistent"));
    let pool = WorkerPool::default();
    let documents = DocumentPipeline::new(
        DocumentParseConfig::default(),
        Arc::new(NoopExtractor),
        None,
        pool.clone(),
    );
    let media = Arc::new(MediaHandler::new(
        homeserver.clone(),
        letta_client.clone(),
        "bot-tok".to_string(),
        EmbeddingDefaults::default(),
        documents,
        None,
        pool,
    ));

    let dispatcher = MessageDispatcher::new(
        homeserver,
        letta_client,
        store.clone(),
        Arc::new(EventDedupe::new()),
        media,
        "@letta:example.org".to_string(),
        "bot-tok".to_string(),
        "example.org".to_string(),
        None,
        false,
        Duration::from_secs(120),
        STARTUP_MS,
    );

    Harness {
        matrix,
        letta,
        store,
        dispatcher,
    }
}

fn mapping(index: usize) -> AgentUserMapping {
    AgentUserMapping {
        agent_id: format!("agent-{index:04}"),
        agent_name: format!("Agent {index}"),
        matrix_user_id: format!("@agent_{index:04}:example.org"),
        matrix_password: "pw".to_string(),
        created: true,
        room_id: Some(format!("!room{index}:example.org")),
        room_created: true,
        invitation_status: None,
    }
}

fn meridian() -> AgentUserMapping {
    AgentUserMapping {
        agent_id: MERIDIAN_ID.to_string(),
        agent_name: "Meridian".to_string(),
        matrix_user_id: MERIDIAN_USER.to_string(),
        matrix_password: "meridian-pw".to_string(),
        created: true,
        room_id: Some(MERIDIAN_ROOM.to_string()),
        room_created: true,
        invitation_status: None,
    }
}

fn text_event(event_id: &str, room_id: &str, sender: &str, body: &str) -> MatrixEvent {
    MatrixEvent {
        event_id: event_id.to_string(),
        room_id: room_id.to_string(),
        sender: sender.to_string(),
        origin_server_ts: STARTUP_MS + 5_000,
        msgtype: "m.text".to_string(),
        body: body.to_string(),
        content: serde_json::json!({"msgtype": "m.text", "body": body}),
    }
}

async fn mount_agent_side_effects(matrix: &MockServer) {
    // Agent logins.
    Mock::given(method("POST"))
        .and(path("/_matrix/client/v3/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "agent-tok",
            "user_id": MERIDIAN_USER
        })))
        .mount(matrix)
        .await;
    // Typing indicator traffic.
    Mock::given(method("PUT"))
        .and(path_regex(r"^/_matrix/client/v3/rooms/.+/typing/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(matrix)
        .await;
    // Message sends.
    Mock::given(method("PUT"))
        .and(path_regex(r"^/_matrix/client/v3/rooms/.+/send/.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "event_id": "$reply"
        })))
        .mount(matrix)
        .await;
}

#[tokio::test]
async fn test_routing_resolves_exact_agent_among_many() {
    let h = harness().await;
    mount_agent_side_effects(&h.matrix).await;

    // 56 mappings; Meridian is one of them, nowhere near the front.
    for i in 0..55 {
        h.store.upsert(mapping(i)).await;
    }
    h.store.upsert(meridian()).await;

    // Only Meridian's endpoint exists; any other dispatch would 404.
    Mock::given(method("POST"))
        .and(path(format!("/v1/agents/{MERIDIAN_ID}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [
                {"message_type": "assistant_message", "content": "Hello from Meridian"}
            ]
        })))
        .expect(1)
        .mount(&h.letta)
        .await;

    h.dispatcher
        .handle_event(text_event("$e1", MERIDIAN_ROOM, "@user:example.org", "Hello"))
        .await;

    // Exactly one Letta dispatch, to exactly Meridian's id.
    let letta_requests = h.letta.received_requests().await.unwrap();
    let posts: Vec<_> = letta_requests
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .collect();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].url.path(), format!("/v1/agents/{MERIDIAN_ID}/messages"));

    // The reply went out through Meridian's own session.
    let matrix_requests = h.matrix.received_requests().await.unwrap();
    let send = matrix_requests
        .iter()
        .find(|r| r.url.path().contains("/send/m.room.message/"))
        .expect("reply sent");
    assert_eq!(
        send.headers.get("authorization").unwrap(),
        "Bearer agent-tok"
    );
    let body: serde_json::Value = serde_json::from_slice(&send.body).unwrap();
    assert_eq!(body["body"], "Hello from Meridian");

    // The agent authenticated with its own derived localpart.
    let login = matrix_requests
        .iter()
        .find(|r| r.url.path() == "/_matrix/client/v3/login")
        .expect("agent login");
    let body: serde_json::Value = serde_json::from_slice(&login.body).unwrap();
    assert_eq!(
        body["identifier"]["user"],
        "agent_597b5756_2915_4560_ba6b_91005f085166"
    );
}

#[tokio::test]
async fn test_boot_replay_guard() {
    let h = harness().await;
    h.store.upsert(meridian()).await;

    // No Letta mock mounted: any dispatch attempt would error loudly, and
    // received_requests stays empty.
    let mut event = text_event("$old", MERIDIAN_ROOM, "@user:example.org", "ancient");
    event.origin_server_ts = STARTUP_MS - 1;
    h.dispatcher.handle_event(event).await;

    assert!(h.letta.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_events_dispatch_once() {
    let h = harness().await;
    mount_agent_side_effects(&h.matrix).await;
    h.store.upsert(meridian()).await;

    Mock::given(method("POST"))
        .and(path(format!("/v1/agents/{MERIDIAN_ID}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [
                {"message_type": "assistant_message", "content": "once"}
            ]
        })))
        .expect(1)
        .mount(&h.letta)
        .await;

    let event = text_event("$dup", MERIDIAN_ROOM, "@user:example.org", "Hello");
    h.dispatcher.handle_event(event.clone()).await;
    h.dispatcher.handle_event(event).await;
}

#[tokio::test]
async fn test_historical_and_relay_and_self_are_silent() {
    let h = harness().await;
    h.store.upsert(meridian()).await;

    // Seeded history replay.
    let mut historical = text_event("$h", MERIDIAN_ROOM, "@user:example.org", "[History] old");
    historical.content = serde_json::json!({
        "msgtype": "m.text",
        "body": "[History] old",
        "m.letta_historical": true
    });
    h.dispatcher.handle_event(historical).await;

    // Relay room without a mapping.
    h.dispatcher
        .handle_event(text_event("$r", "!relay:example.org", "@user:example.org", "hi"))
        .await;

    // The room's own agent (self-loop guard).
    h.dispatcher
        .handle_event(text_event("$s", MERIDIAN_ROOM, MERIDIAN_USER, "my own reply"))
        .await;

    // The bridge bot itself.
    h.dispatcher
        .handle_event(text_event("$b", MERIDIAN_ROOM, "@letta:example.org", "bot"))
        .await;

    assert!(h.letta.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_inter_agent_prompt_wrapping() {
    let h = harness().await;
    mount_agent_side_effects(&h.matrix).await;
    h.store.upsert(meridian()).await;
    h.store
        .upsert(AgentUserMapping {
            agent_id: "agent-scout".to_string(),
            agent_name: "Scout".to_string(),
            matrix_user_id: "@agent_scout:example.org".to_string(),
            matrix_password: "pw".to_string(),
            created: true,
            room_id: Some("!scout:example.org".to_string()),
            room_created: true,
            invitation_status: None,
        })
        .await;

    Mock::given(method("POST"))
        .and(path(format!("/v1/agents/{MERIDIAN_ID}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [
                {"message_type": "assistant_message", "content": "ack"}
            ]
        })))
        .expect(1)
        .mount(&h.letta)
        .await;

    // Scout posts into Meridian's room, with an already-prefixed body.
    h.dispatcher
        .handle_event(text_event(
            "$ia",
            MERIDIAN_ROOM,
            "@agent_scout:example.org",
            "[Inter-Agent Message from Scout]\nplease check the weather",
        ))
        .await;

    let posts = h.letta.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&posts[0].body).unwrap();
    let content = body["messages"][0]["content"].as_str().unwrap();
    assert!(content.starts_with("[INTER-AGENT MESSAGE from Scout]"));
    assert!(content.contains("please check the weather"));
    assert!(content.contains("SYSTEM NOTE (INTER-AGENT COMMUNICATION)"));
    // The original prefix was stripped; no nested headers.
    assert_eq!(content.matches("[Inter-Agent Message from").count(), 0);
    assert_eq!(content.matches("[INTER-AGENT MESSAGE from").count(), 1);
}

#[tokio::test]
async fn test_opencode_prompt_wrapping() {
    let h = harness().await;
    mount_agent_side_effects(&h.matrix).await;
    h.store.upsert(meridian()).await;

    Mock::given(method("POST"))
        .and(path(format!("/v1/agents/{MERIDIAN_ID}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "messages": [
                {"message_type": "assistant_message", "content": "@oc_ci:example.org done"}
            ]
        })))
        .expect(1)
        .mount(&h.letta)
        .await;

    h.dispatcher
        .handle_event(text_event(
            "$oc",
            MERIDIAN_ROOM,
            "@oc_ci:example.org",
            "deploy finished?",
        ))
        .await;

    let posts = h.letta.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&posts[0].body).unwrap();
    let content = body["messages"][0]["content"].as_str().unwrap();
    assert!(content.starts_with("[MESSAGE FROM OPENCODE USER]"));
    assert!(content.contains("deploy finished?"));
    assert!(content.contains("@mention (@oc_ci:example.org)"));
}

#[tokio::test]
async fn test_conversation_busy_reports_to_room() {
    let h = harness().await;
    mount_agent_side_effects(&h.matrix).await;
    h.store.upsert(meridian()).await;

    // Always busy; the dispatcher exhausts its retries.
    Mock::given(method("POST"))
        .and(path(format!("/v1/agents/{MERIDIAN_ID}/messages")))
        .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
            "detail": "CONVERSATION_BUSY"
        })))
        .mount(&h.letta)
        .await;

    // The busy schedule sleeps 1 s, 2 s, 4 s for real before exhausting.
    h.dispatcher
        .handle_event(text_event("$busy", MERIDIAN_ROOM, "@user:example.org", "hello?"))
        .await;

    let sends: Vec<serde_json::Value> = h
        .matrix
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().contains("/send/"))
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    let bodies: Vec<&str> = sends.iter().filter_map(|b| b["body"].as_str()).collect();
    assert!(bodies
        .iter()
        .any(|b| b.starts_with("⚠️") && b.contains("busy")));
}
