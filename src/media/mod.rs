//! Media ingestion: Matrix attachments become typed artifacts for the
//! dispatcher.
//!
//! Images become multimodal prompts, audio becomes a transcript, documents
//! become extracted text, and everything else is uploaded into a per-room
//! Letta folder and indexed.

pub mod document;
pub mod transcribe;

use crate::config::EmbeddingDefaults;
use crate::error::{BridgeError, BridgeResult};
use crate::letta::types::{ContentPart, CreateFolderRequest, EmbeddingConfig, ImageSource, ProcessingStatus};
use crate::letta::LettaClient;
use crate::matrix::types::MatrixEvent;
use crate::matrix::HomeserverClient;
use crate::prompt;
use base64::Engine as _;
use bytes::Bytes;
use document::{format_document_for_agent, DocumentPipeline, WorkerPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use transcribe::{format_voice_message, TranscribeError, Transcriber};

/// Attachment size cap: 50 MiB.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Total budget for waiting on folder indexing.
const INDEX_POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Delay between indexing polls.
const INDEX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive poll failures tolerated before giving up.
const INDEX_POLL_MAX_ERRORS: u32 = 3;

/// Extensions accepted when the MIME type carries no information.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".pdf", ".txt", ".md", ".markdown", ".json", ".docx", ".doc", ".pptx", ".ppt", ".xlsx",
    ".xls", ".csv", ".html", ".htm", ".xhtml", ".epub", ".rtf", ".odt", ".jpg", ".jpeg", ".png",
    ".gif", ".webp", ".bmp", ".tiff", ".tif", ".ogg", ".oga", ".mp3", ".m4a", ".wav", ".webm",
    ".flac", ".aac",
];

/// Extensions whose content the document pipeline can handle.
const PARSEABLE_EXTENSIONS: &[&str] = &[
    ".pdf", ".docx", ".doc", ".pptx", ".ppt", ".xlsx", ".xls", ".csv", ".txt", ".md",
    ".markdown", ".html", ".htm", ".xhtml", ".json", ".epub", ".rtf", ".odt",
];

fn extension_of(filename: &str) -> Option<String> {
    let lower = filename.to_ascii_lowercase();
    lower.rfind('.').map(|idx| lower[idx..].to_string())
}

fn mime_allowed(mime: &str) -> bool {
    matches!(
        mime,
        "application/pdf"
            | "text/plain"
            | "text/markdown"
            | "text/x-markdown"
            | "application/json"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/msword"
            | "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            | "application/vnd.ms-powerpoint"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel"
            | "text/csv"
            | "text/html"
            | "application/xhtml+xml"
            | "application/epub+zip"
            | "image/jpeg"
            | "image/jpg"
            | "image/png"
            | "image/gif"
            | "image/webp"
            | "image/bmp"
            | "image/tiff"
            | "audio/ogg"
            | "audio/mpeg"
            | "audio/mp4"
            | "audio/wav"
            | "audio/x-wav"
            | "audio/webm"
            | "audio/flac"
            | "audio/aac"
            | "application/octet-stream"
    )
}

/// The MIME type implied by a file extension, for normalizing
/// `application/octet-stream` uploads.
fn mime_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        ".md" | ".markdown" => "text/markdown",
        ".txt" => "text/plain",
        ".pdf" => "application/pdf",
        ".json" => "application/json",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".bmp" => "image/bmp",
        ".tiff" | ".tif" => "image/tiff",
        ".ogg" | ".oga" => "audio/ogg",
        ".mp3" => "audio/mpeg",
        ".m4a" => "audio/mp4",
        ".wav" => "audio/wav",
        ".webm" => "audio/webm",
        ".flac" => "audio/flac",
        ".aac" => "audio/aac",
        ".docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".doc" => "application/msword",
        ".pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ".ppt" => "application/vnd.ms-powerpoint",
        ".xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xls" => "application/vnd.ms-excel",
        ".csv" => "text/csv",
        ".html" | ".htm" => "text/html",
        ".xhtml" => "application/xhtml+xml",
        ".epub" => "application/epub+zip",
        _ => return None,
    })
}

/// Whether a file should go through document text extraction.
pub fn is_parseable_document(mime: &str, filename: &str) -> bool {
    let by_extension = extension_of(filename)
        .is_some_and(|ext| PARSEABLE_EXTENSIONS.contains(&ext.as_str()));
    match mime {
        "application/octet-stream" => by_extension,
        _ if mime.starts_with("image/") || mime.starts_with("audio/") => false,
        _ => mime_allowed(mime) || by_extension,
    }
}

/// Metadata pulled from a media event.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    /// `mxc://` URL of the content.
    pub mxc_url: String,
    /// File name (from `info.filename`, or `body` when it carries an
    /// allowlisted extension).
    pub file_name: String,
    /// MIME type, normalized by extension for octet-stream uploads.
    pub mime: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Room the file arrived in.
    pub room_id: String,
    /// Uploading user.
    pub sender: String,
    /// Server timestamp in milliseconds.
    pub timestamp: u64,
    /// Event id of the upload.
    pub event_id: String,
    /// Caption, when `body` is not a file name.
    pub caption: Option<String>,
}

/// Extract media metadata from an event. Returns `None` for events without
/// an `mxc://` URL.
pub fn extract_metadata(event: &MatrixEvent) -> Option<FileMetadata> {
    if !event.is_media() {
        return None;
    }
    let mxc_url = event.media_url()?.to_string();
    let info = event.media_info();

    let info_filename = info
        .and_then(|i| i.get("filename"))
        .and_then(|f| f.as_str())
        .map(|f| f.to_string());

    let body = event.body.clone();
    let body_is_filename = extension_of(&body)
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()));

    // `body` is the filename when it looks like one; otherwise it is a
    // caption whenever it differs from the real filename.
    let (file_name, caption) = match (info_filename, body_is_filename) {
        (_, true) => (body, None),
        (Some(name), false) => {
            if body != name && !body.is_empty() {
                (name, Some(body))
            } else {
                (name, None)
            }
        }
        (None, false) => (body, None),
    };

    Some(FileMetadata {
        mxc_url,
        file_name,
        mime: info
            .and_then(|i| i.get("mimetype"))
            .and_then(|m| m.as_str())
            .unwrap_or("application/octet-stream")
            .to_string(),
        size: info
            .and_then(|i| i.get("size"))
            .and_then(|s| s.as_u64())
            .unwrap_or(0),
        room_id: event.room_id.clone(),
        sender: event.sender.clone(),
        timestamp: event.origin_server_ts,
        event_id: event.event_id.clone(),
        caption,
    })
}

/// Validate size and type, normalizing the MIME type for octet-stream
/// uploads. Returns a user-facing rejection message on failure.
pub fn validate(metadata: &mut FileMetadata) -> Result<(), String> {
    if metadata.size > MAX_FILE_SIZE {
        let size_mb = metadata.size as f64 / (1024.0 * 1024.0);
        let max_mb = MAX_FILE_SIZE / (1024 * 1024);
        return Err(format!(
            "File '{}' is too large ({size_mb:.1}MB). Maximum size is {max_mb}MB.",
            metadata.file_name
        ));
    }

    if !mime_allowed(&metadata.mime) {
        return Err(format!(
            "File type '{}' is not supported.",
            metadata.mime
        ));
    }

    if metadata.mime == "application/octet-stream" {
        let ext = extension_of(&metadata.file_name).unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(format!(
                "File extension '{ext}' is not supported for unknown MIME type."
            ));
        }
        if let Some(mime) = mime_for_extension(&ext) {
            metadata.mime = mime.to_string();
        }
    }

    Ok(())
}

/// The typed outcome of ingesting one attachment.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaArtifact {
    /// An image, ready to send as a multimodal prompt.
    Multimodal(Vec<ContentPart>),
    /// A transcribed voice message, formatted for the agent.
    Transcript(String),
    /// Extracted document text, formatted for the agent.
    ExtractedText {
        /// The agent-facing message (header, content, instructions).
        text: String,
        /// Original file name.
        filename: String,
        /// Page count, where known.
        pages: Option<u32>,
        /// Whether OCR produced the text.
        was_ocr: bool,
    },
    /// A file uploaded into the room's Letta folder.
    IndexedFile {
        /// Folder (source) id.
        source_id: String,
        /// File id inside the folder.
        file_id: String,
        /// Terminal indexing status.
        status: ProcessingStatus,
    },
}

/// Downloads, classifies, and converts Matrix attachments.
pub struct MediaHandler {
    homeserver: Arc<HomeserverClient>,
    letta: Arc<LettaClient>,
    bot_token: String,
    embedding: EmbeddingDefaults,
    documents: DocumentPipeline,
    transcriber: Option<Arc<dyn Transcriber>>,
    pool: WorkerPool,
    folder_cache: Mutex<HashMap<String, String>>,
}

impl MediaHandler {
    /// Create a media handler.
    pub fn new(
        homeserver: Arc<HomeserverClient>,
        letta: Arc<LettaClient>,
        bot_token: String,
        embedding: EmbeddingDefaults,
        documents: DocumentPipeline,
        transcriber: Option<Arc<dyn Transcriber>>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            homeserver,
            letta,
            bot_token,
            embedding,
            documents,
            transcriber,
            pool,
            folder_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest one media event for the room's agent.
    ///
    /// Returns `Ok(None)` when the event is not ingestible here (no
    /// metadata, or the room has no mapped agent; relay rooms are never
    /// auto-ingested). Rejections and failures surface as
    /// [`BridgeError::FileUpload`] with a user-facing message.
    pub async fn handle(
        &self,
        event: &MatrixEvent,
        agent_id: Option<&str>,
    ) -> BridgeResult<Option<MediaArtifact>> {
        let Some(mut metadata) = extract_metadata(event) else {
            tracing::warn!(event_id = %event.event_id, "could not extract file metadata");
            return Ok(None);
        };

        let Some(agent_id) = agent_id else {
            tracing::debug!(room_id = %event.room_id, "no mapped agent, skipping media event");
            return Ok(None);
        };

        validate(&mut metadata).map_err(BridgeError::file_upload)?;

        tracing::info!(
            file = %metadata.file_name,
            mime = %metadata.mime,
            sender = %metadata.sender,
            room_id = %metadata.room_id,
            "processing file upload"
        );

        if metadata.mime.starts_with("audio/") {
            return Ok(Some(self.handle_audio(&metadata).await?));
        }
        if metadata.mime.starts_with("image/") {
            return Ok(Some(self.handle_image(&metadata).await?));
        }
        if self.documents.is_enabled() && is_parseable_document(&metadata.mime, &metadata.file_name)
        {
            return Ok(Some(self.handle_document(&metadata).await?));
        }
        // Anything else (including documents when extraction is off) goes
        // into the room's Letta folder and gets indexed.
        Ok(Some(self.handle_generic(&metadata, agent_id).await?))
    }

    async fn download(&self, metadata: &FileMetadata) -> BridgeResult<Bytes> {
        let (server, media_id) = parse_mxc(&metadata.mxc_url)
            .ok_or_else(|| BridgeError::file_upload(format!("Invalid mxc:// URL: {}", metadata.mxc_url)))?;
        self.homeserver
            .download_media(&server, &media_id, &self.bot_token)
            .await
    }

    async fn handle_audio(&self, metadata: &FileMetadata) -> BridgeResult<MediaArtifact> {
        let data = self.download(metadata).await?;
        let result = match &self.transcriber {
            Some(transcriber) => transcriber.transcribe(data, &metadata.file_name).await,
            None => Err(TranscribeError::NotConfigured),
        };
        if let Err(error) = &result {
            tracing::warn!(file = %metadata.file_name, error = %error, "voice transcription failed");
        }
        Ok(MediaArtifact::Transcript(format_voice_message(result)))
    }

    async fn handle_image(&self, metadata: &FileMetadata) -> BridgeResult<MediaArtifact> {
        let data = self.download(metadata).await?;

        // Encoding megabytes of image data is CPU work; keep it off the
        // event loop.
        let encoded = self
            .pool
            .run(move || base64::engine::general_purpose::STANDARD.encode(&data))
            .await?;

        let mut text = match &metadata.caption {
            Some(caption) => format!(
                "[Image Upload: {}]\n\n\
                 The user shared an image and asked: \"{caption}\"\n\n\
                 Please analyze the image and respond to the user's question.",
                metadata.file_name
            ),
            None => format!(
                "[Image Upload: {}]\n\n\
                 The user has shared an image with you. Please analyze the image and describe what you see.",
                metadata.file_name
            ),
        };

        if prompt::is_opencode_sender(&metadata.sender) {
            text = prompt::opencode_message(&text, &metadata.sender);
        }

        Ok(MediaArtifact::Multimodal(vec![
            ContentPart::Text { text },
            ContentPart::Image {
                source: ImageSource::Base64 {
                    media_type: metadata.mime.clone(),
                    data: encoded,
                },
            },
        ]))
    }

    async fn handle_document(&self, metadata: &FileMetadata) -> BridgeResult<MediaArtifact> {
        let data = self.download(metadata).await?;
        let result = self.documents.parse(data, &metadata.file_name).await;

        if let Err(error) = &result {
            tracing::warn!(file = %metadata.file_name, error = %error, "document extraction failed");
        }

        let mut text =
            format_document_for_agent(&result, &metadata.file_name, metadata.caption.as_deref());
        if prompt::is_opencode_sender(&metadata.sender) {
            text = prompt::opencode_message(&text, &metadata.sender);
        }

        let (pages, was_ocr) = match &result {
            Ok(doc) => (doc.page_count, doc.was_ocr),
            Err(_) => (None, false),
        };
        Ok(MediaArtifact::ExtractedText {
            text,
            filename: metadata.file_name.clone(),
            pages,
            was_ocr,
        })
    }

    /// Generic corpus upload: per-room folder, upload, attach, and poll
    /// until indexing reaches a terminal state.
    async fn handle_generic(
        &self,
        metadata: &FileMetadata,
        agent_id: &str,
    ) -> BridgeResult<MediaArtifact> {
        let data = self.download(metadata).await?;
        let source_id = self.get_or_create_folder(&metadata.room_id, agent_id).await?;

        let upload = self
            .letta
            .folders()
            .upload_file(
                &source_id,
                metadata.file_name.clone(),
                data,
                Some(&metadata.mime),
            )
            .await?;

        if let Err(error) = self.letta.folders().attach(agent_id, &source_id).await {
            tracing::warn!(agent_id, error = %error, "failed to attach folder to agent");
        }

        let status = self.poll_indexing(&source_id, &metadata.file_name).await?;
        Ok(MediaArtifact::IndexedFile {
            source_id,
            file_id: upload.id,
            status,
        })
    }

    /// The Letta folder dedicated to one room's uploads.
    pub fn folder_name_for_room(room_id: &str) -> String {
        let safe = room_id.replace('!', "").replace(':', "-");
        format!("matrix-{safe}")
    }

    async fn get_or_create_folder(&self, room_id: &str, agent_id: &str) -> BridgeResult<String> {
        {
            let cache = self.folder_cache.lock().await;
            if let Some(id) = cache.get(room_id) {
                return Ok(id.clone());
            }
        }

        let name = Self::folder_name_for_room(room_id);
        let existing = self.letta.folders().list(Some(&name)).await?;
        let folder_id = if let Some(folder) = existing.into_iter().find(|f| f.name == name) {
            tracing::info!(folder_id = %folder.id, "found existing folder for room");
            folder.id
        } else {
            let embedding = self.embedding_config(Some(agent_id)).await;
            let folder = self
                .letta
                .folders()
                .create(&CreateFolderRequest {
                    name: name.clone(),
                    description: Some(format!("Files uploaded from Matrix room {room_id}")),
                    embedding_config: Some(embedding),
                })
                .await?;
            tracing::info!(folder_id = %folder.id, "created folder for room");
            folder.id
        };

        self.folder_cache
            .lock()
            .await
            .insert(room_id.to_string(), folder_id.clone());
        Ok(folder_id)
    }

    /// The embedding configuration to index with: the agent's own when
    /// available, the process default otherwise.
    pub async fn embedding_config(&self, agent_id: Option<&str>) -> EmbeddingConfig {
        if let Some(agent_id) = agent_id {
            match self.letta.agents().get(agent_id).await {
                Ok(agent) => {
                    if let Some(config) = agent.embedding_config {
                        tracing::info!(
                            model = %config.embedding_model,
                            dim = config.embedding_dim,
                            "using agent's embedding config"
                        );
                        return config;
                    }
                }
                Err(error) => {
                    tracing::warn!(agent_id, error = %error, "failed to fetch agent embedding config");
                }
            }
        }

        EmbeddingConfig {
            embedding_model: self.embedding.model.clone(),
            embedding_endpoint_type: Some(self.embedding.endpoint_type.clone()),
            embedding_endpoint: self.embedding.endpoint.clone(),
            embedding_dim: self.embedding.dim,
            embedding_chunk_size: Some(self.embedding.chunk_size),
        }
    }

    async fn poll_indexing(
        &self,
        source_id: &str,
        file_name: &str,
    ) -> BridgeResult<ProcessingStatus> {
        let deadline = tokio::time::Instant::now() + INDEX_POLL_TIMEOUT;
        let mut consecutive_errors = 0u32;

        while tokio::time::Instant::now() < deadline {
            match self.letta.folders().list_files(source_id).await {
                Ok(files) => {
                    consecutive_errors = 0;
                    let status = files
                        .iter()
                        .find(|f| f.file_name.as_deref() == Some(file_name))
                        .map(|f| f.processing_status);
                    if let Some(status) = status {
                        if status.is_terminal() {
                            return Ok(status);
                        }
                    }
                }
                Err(error) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        source_id,
                        consecutive_errors,
                        error = %error,
                        "indexing poll failed"
                    );
                    if consecutive_errors >= INDEX_POLL_MAX_ERRORS {
                        return Err(BridgeError::file_upload(format!(
                            "Indexing status checks failed repeatedly for {file_name}"
                        )));
                    }
                }
            }
            tokio::time::sleep(INDEX_POLL_INTERVAL).await;
        }

        Err(BridgeError::file_upload(format!(
            "File processing timed out for {file_name}"
        )))
    }
}

fn parse_mxc(mxc_url: &str) -> Option<(String, String)> {
    let rest = mxc_url.strip_prefix("mxc://")?;
    let (server, media_id) = rest.split_once('/')?;
    if server.is_empty() || media_id.is_empty() {
        return None;
    }
    Some((server.to_string(), media_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_event(msgtype: &str, body: &str, info: serde_json::Value) -> MatrixEvent {
        MatrixEvent {
            event_id: "$media".into(),
            room_id: "!room:example.org".into(),
            sender: "@user:example.org".into(),
            origin_server_ts: 1_700_000_000_000,
            msgtype: msgtype.to_string(),
            body: body.to_string(),
            content: serde_json::json!({
                "msgtype": msgtype,
                "body": body,
                "url": "mxc://example.org/media123",
                "info": info,
            }),
        }
    }

    #[test]
    fn test_parse_mxc() {
        assert_eq!(
            parse_mxc("mxc://example.org/abc123"),
            Some(("example.org".to_string(), "abc123".to_string()))
        );
        assert_eq!(parse_mxc("https://example.org/abc"), None);
        assert_eq!(parse_mxc("mxc://example.org"), None);
        assert_eq!(parse_mxc("mxc:///abc"), None);
    }

    #[test]
    fn test_metadata_filename_from_info() {
        let event = media_event(
            "m.image",
            "What is this?",
            serde_json::json!({"filename": "photo.jpg", "mimetype": "image/jpeg", "size": 2048}),
        );
        let metadata = extract_metadata(&event).unwrap();
        assert_eq!(metadata.file_name, "photo.jpg");
        assert_eq!(metadata.caption.as_deref(), Some("What is this?"));
        assert_eq!(metadata.mime, "image/jpeg");
        assert_eq!(metadata.size, 2048);
    }

    #[test]
    fn test_metadata_body_as_filename() {
        let event = media_event(
            "m.file",
            "report.pdf",
            serde_json::json!({"filename": "other.pdf", "mimetype": "application/pdf"}),
        );
        let metadata = extract_metadata(&event).unwrap();
        // Body carries an allowlisted extension, so it wins and there is no
        // caption.
        assert_eq!(metadata.file_name, "report.pdf");
        assert!(metadata.caption.is_none());
    }

    #[test]
    fn test_metadata_requires_url() {
        let event = MatrixEvent {
            event_id: "$e".into(),
            room_id: "!r:s".into(),
            sender: "@u:s".into(),
            origin_server_ts: 0,
            msgtype: "m.image".into(),
            body: "x".into(),
            content: serde_json::json!({"msgtype": "m.image", "body": "x"}),
        };
        assert!(extract_metadata(&event).is_none());
    }

    #[test]
    fn test_validate_size_boundary() {
        let event = media_event(
            "m.file",
            "big.pdf",
            serde_json::json!({"mimetype": "application/pdf", "size": MAX_FILE_SIZE}),
        );
        let mut metadata = extract_metadata(&event).unwrap();
        assert!(validate(&mut metadata).is_ok());

        metadata.size = MAX_FILE_SIZE + 1;
        let error = validate(&mut metadata).unwrap_err();
        assert!(error.contains("too large"));
        assert!(error.contains("50MB"));
    }

    #[test]
    fn test_validate_normalizes_octet_stream() {
        let event = media_event(
            "m.file",
            "notes.md",
            serde_json::json!({"mimetype": "application/octet-stream", "size": 10}),
        );
        let mut metadata = extract_metadata(&event).unwrap();
        validate(&mut metadata).unwrap();
        assert_eq!(metadata.mime, "text/markdown");
    }

    #[test]
    fn test_validate_rejects_unknown_extension_for_octet_stream() {
        let event = media_event(
            "m.file",
            "payload.exe",
            serde_json::json!({"mimetype": "application/octet-stream", "size": 10}),
        );
        let mut metadata = extract_metadata(&event).unwrap();
        assert!(validate(&mut metadata).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_mime() {
        let event = media_event(
            "m.file",
            "archive.zip",
            serde_json::json!({"mimetype": "application/zip", "size": 10}),
        );
        let mut metadata = extract_metadata(&event).unwrap();
        let error = validate(&mut metadata).unwrap_err();
        assert!(error.contains("not supported"));
    }

    #[test]
    fn test_is_parseable_document() {
        assert!(is_parseable_document("application/pdf", "paper.pdf"));
        assert!(is_parseable_document("application/octet-stream", "notes.md"));
        assert!(!is_parseable_document("application/octet-stream", "data.bin"));
        assert!(!is_parseable_document("image/png", "pic.png"));
        assert!(!is_parseable_document("audio/ogg", "voice.ogg"));
    }

    #[test]
    fn test_folder_name_for_room() {
        assert_eq!(
            MediaHandler::folder_name_for_room("!8I9YBvbr4KpXNedbph:matrix.example.org"),
            "matrix-8I9YBvbr4KpXNedbph-matrix.example.org"
        );
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("A.PDF").as_deref(), Some(".pdf"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some(".gz"));
    }
}
