//! Media ingestion integration: image, document, voice, and folder-upload
//! branches against mock servers.

use base64::Engine as _;
use letta_matrix_bridge::config::EmbeddingDefaults;
use letta_matrix_bridge::letta::LettaClient;
use letta_matrix_bridge::matrix::types::MatrixEvent;
use letta_matrix_bridge::matrix::HomeserverClient;
use letta_matrix_bridge::media::document::{
    DocumentExtractor, DocumentParseConfig, DocumentPipeline, ExtractError, RawExtraction,
    WorkerPool,
};
use letta_matrix_bridge::media::transcribe::{TranscribeError, Transcriber};
use letta_matrix_bridge::media::{MediaArtifact, MediaHandler};
use letta_matrix_bridge::letta::types::{ContentPart, ImageSource, ProcessingStatus};
use std::sync::Arc;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TextExtractor;

impl DocumentExtractor for TextExtractor {
    fn extract(&self, data: &[u8], _filename: &str) -> Result<RawExtraction, ExtractError> {
        Ok(RawExtraction {
            text: String::from_utf8_lossy(data).to_string(),
            page_count: Some(1),
        })
    }
}

struct EchoTranscriber;

#[async_trait::async_trait]
impl Transcriber for EchoTranscriber {
    async fn transcribe(
        &self,
        _data: bytes::Bytes,
        _filename: &str,
    ) -> Result<String, TranscribeError> {
        Ok("hello from voice".to_string())
    }
}

async fn handler(
    matrix: &MockServer,
    letta: &MockServer,
    config: DocumentParseConfig,
) -> MediaHandler {
    let homeserver =
        Arc::new(HomeserverClient::new(url::Url::parse(&matrix.uri()).unwrap()).unwrap());
    let letta_client = Arc::new(LettaClient::connect(letta.uri(), None).unwrap());
    let pool = WorkerPool::default();
    let documents = DocumentPipeline::new(config, Arc::new(TextExtractor), None, pool.clone());
    MediaHandler::new(
        homeserver,
        letta_client,
        "bot-tok".to_string(),
        EmbeddingDefaults::default(),
        documents,
        Some(Arc::new(EchoTranscriber)),
        pool,
    )
}

fn media_event(msgtype: &str, body: &str, filename: &str, mime: &str, size: u64) -> MatrixEvent {
    MatrixEvent {
        event_id: "$upload".to_string(),
        room_id: "!room:example.org".to_string(),
        sender: "@user:example.org".to_string(),
        origin_server_ts: 1_700_000_000_000,
        msgtype: msgtype.to_string(),
        body: body.to_string(),
        content: serde_json::json!({
            "msgtype": msgtype,
            "body": body,
            "url": "mxc://example.org/media123",
            "info": {"filename": filename, "mimetype": mime, "size": size}
        }),
    }
}

async fn mount_download(matrix: &MockServer, bytes: &'static [u8]) {
    Mock::given(method("GET"))
        .and(path(
            "/_matrix/client/v1/media/download/example.org/media123",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(matrix)
        .await;
}

#[tokio::test]
async fn test_image_with_caption_builds_multimodal_prompt() {
    let matrix = MockServer::start().await;
    let letta = MockServer::start().await;
    mount_download(&matrix, b"jpeg-bytes").await;

    let handler = handler(&matrix, &letta, DocumentParseConfig::default()).await;
    let event = media_event("m.image", "What is this?", "photo.jpg", "image/jpeg", 2048);
    let artifact = handler.handle(&event, Some("agent-1")).await.unwrap().unwrap();

    let MediaArtifact::Multimodal(parts) = artifact else {
        panic!("expected multimodal artifact");
    };
    assert_eq!(parts.len(), 2);

    let ContentPart::Text { text } = &parts[0] else {
        panic!("expected text part first");
    };
    assert_eq!(
        text,
        "[Image Upload: photo.jpg]\n\n\
         The user shared an image and asked: \"What is this?\"\n\n\
         Please analyze the image and respond to the user's question."
    );

    let ContentPart::Image { source } = &parts[1] else {
        panic!("expected image part second");
    };
    let ImageSource::Base64 { media_type, data } = source;
    assert_eq!(media_type, "image/jpeg");
    assert_eq!(
        data,
        &base64::engine::general_purpose::STANDARD.encode(b"jpeg-bytes")
    );
}

#[tokio::test]
async fn test_image_from_opencode_sender_gets_instruction() {
    let matrix = MockServer::start().await;
    let letta = MockServer::start().await;
    mount_download(&matrix, b"png-bytes").await;

    let handler = handler(&matrix, &letta, DocumentParseConfig::default()).await;
    let mut event = media_event("m.image", "screenshot.png", "screenshot.png", "image/png", 10);
    event.sender = "@oc_ci:example.org".to_string();

    let artifact = handler.handle(&event, Some("agent-1")).await.unwrap().unwrap();
    let MediaArtifact::Multimodal(parts) = artifact else {
        panic!("expected multimodal artifact");
    };
    let ContentPart::Text { text } = &parts[0] else {
        panic!("expected text part");
    };
    assert!(text.starts_with("[MESSAGE FROM OPENCODE USER]"));
    assert!(text.contains("[Image Upload: screenshot.png]"));
    assert!(text.contains("@oc_ci:example.org"));
}

#[tokio::test]
async fn test_voice_message_transcription() {
    let matrix = MockServer::start().await;
    let letta = MockServer::start().await;
    mount_download(&matrix, b"ogg-bytes").await;

    let handler = handler(&matrix, &letta, DocumentParseConfig::default()).await;
    let event = media_event("m.audio", "voice.ogg", "voice.ogg", "audio/ogg", 512);
    let artifact = handler.handle(&event, Some("agent-1")).await.unwrap().unwrap();

    assert_eq!(
        artifact,
        MediaArtifact::Transcript("[Voice message]: hello from voice".to_string())
    );
}

#[tokio::test]
async fn test_document_extraction_formats_for_agent() {
    let matrix = MockServer::start().await;
    let letta = MockServer::start().await;
    mount_download(
        &matrix,
        b"Quarterly numbers look strong across all regions this year.",
    )
    .await;

    let handler = handler(&matrix, &letta, DocumentParseConfig::default()).await;
    let event = media_event(
        "m.file",
        "Can you summarize?",
        "report.txt",
        "text/plain",
        64,
    );
    let artifact = handler.handle(&event, Some("agent-1")).await.unwrap().unwrap();

    let MediaArtifact::ExtractedText {
        text,
        filename,
        pages,
        was_ocr,
    } = artifact
    else {
        panic!("expected extracted text artifact");
    };
    assert_eq!(filename, "report.txt");
    assert_eq!(pages, Some(1));
    assert!(!was_ocr);
    assert!(text.starts_with("[Document: report.txt] (1 pages)"));
    assert!(text.contains("asked: \"Can you summarize?\""));
    assert!(text.contains("Quarterly numbers look strong"));
}

#[tokio::test]
async fn test_oversized_file_rejected() {
    let matrix = MockServer::start().await;
    let letta = MockServer::start().await;

    let handler = handler(&matrix, &letta, DocumentParseConfig::default()).await;
    let event = media_event(
        "m.file",
        "huge.pdf",
        "huge.pdf",
        "application/pdf",
        50 * 1024 * 1024 + 1,
    );
    let error = handler.handle(&event, Some("agent-1")).await.unwrap_err();
    let text = error.to_string();
    assert!(text.contains("too large"));
    // Nothing was downloaded.
    assert!(matrix.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_room_without_agent_is_skipped() {
    let matrix = MockServer::start().await;
    let letta = MockServer::start().await;

    let handler = handler(&matrix, &letta, DocumentParseConfig::default()).await;
    let event = media_event("m.image", "photo.jpg", "photo.jpg", "image/jpeg", 10);
    let artifact = handler.handle(&event, None).await.unwrap();
    assert!(artifact.is_none());
    assert!(matrix.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_generic_upload_creates_folder_and_polls() {
    let matrix = MockServer::start().await;
    let letta = MockServer::start().await;
    mount_download(&matrix, b"raw document bytes").await;

    // Extraction disabled: documents fall through to the folder flow.
    let config = DocumentParseConfig {
        enabled: false,
        ..Default::default()
    };
    let handler = handler(&matrix, &letta, config).await;

    let folder_name = "matrix-room-example.org";
    Mock::given(method("GET"))
        .and(path("/v1/folders"))
        .and(query_param("name", folder_name))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&letta)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/agents/agent-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "agent-1",
            "name": "Meridian",
            "embedding_config": {
                "embedding_model": "custom/embedder",
                "embedding_endpoint_type": "openai",
                "embedding_dim": 2560,
                "embedding_chunk_size": 300
            }
        })))
        .mount(&letta)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/folders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "folder-9",
            "name": folder_name
        })))
        .expect(1)
        .mount(&letta)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/folders/folder-9/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "file-7"
        })))
        .expect(1)
        .mount(&letta)
        .await;
    Mock::given(method("PATCH"))
        .and(path_regex(r"^/v1/agents/agent-1/folders/attach/folder-9$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&letta)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/folders/folder-9/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": "file-7", "file_name": "notes.txt", "processing_status": "completed"}
        ])))
        .mount(&letta)
        .await;

    let event = media_event("m.file", "notes.txt", "notes.txt", "text/plain", 18);
    let artifact = handler.handle(&event, Some("agent-1")).await.unwrap().unwrap();

    assert_eq!(
        artifact,
        MediaArtifact::IndexedFile {
            source_id: "folder-9".to_string(),
            file_id: "file-7".to_string(),
            status: ProcessingStatus::Completed,
        }
    );

    // Folder creation used the agent's own embedding config.
    let requests = letta.received_requests().await.unwrap();
    let create = requests
        .iter()
        .find(|r| r.method.as_str() == "POST" && r.url.path() == "/v1/folders")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();
    assert_eq!(body["embedding_config"]["embedding_model"], "custom/embedder");
    assert_eq!(body["embedding_config"]["embedding_dim"], 2560);
}
