//! Document text extraction: configuration, quality heuristics, the
//! extractor and OCR interfaces, and the bounded worker pool that keeps
//! CPU-bound conversion off the event loop.

use crate::error::{BridgeError, BridgeResult};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Configuration for document parsing.
#[derive(Debug, Clone)]
pub struct DocumentParseConfig {
    /// Whether extraction runs at all.
    pub enabled: bool,
    /// Per-file size cap in megabytes.
    pub max_file_size_mb: u64,
    /// Per-attempt extraction budget.
    pub timeout: Duration,
    /// Whether the OCR fallback is available.
    pub ocr_enabled: bool,
    /// Render resolution for OCR.
    pub ocr_dpi: u32,
    /// Extracted text beyond this many characters is truncated.
    pub max_text_length: usize,
}

impl Default for DocumentParseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size_mb: 50,
            timeout: Duration::from_secs(120),
            ocr_enabled: true,
            ocr_dpi: 200,
            max_text_length: 50_000,
        }
    }
}

impl DocumentParseConfig {
    /// Read the `DOCUMENT_PARSING_*` environment options.
    pub fn from_env() -> BridgeResult<Self> {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        fn parse<T: std::str::FromStr>(name: &str, default: T) -> BridgeResult<T> {
            match var(name) {
                Some(v) => v.trim().parse().map_err(|_| {
                    BridgeError::config(format!("{name} is not a valid number: {v}"))
                }),
                None => Ok(default),
            }
        }

        let defaults = Self::default();
        Ok(Self {
            enabled: var("DOCUMENT_PARSING_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.enabled),
            max_file_size_mb: parse("DOCUMENT_PARSING_MAX_FILE_SIZE_MB", defaults.max_file_size_mb)?,
            timeout: Duration::from_secs_f64(parse(
                "DOCUMENT_PARSING_TIMEOUT_SECONDS",
                defaults.timeout.as_secs_f64(),
            )?),
            ocr_enabled: var("DOCUMENT_PARSING_OCR_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.ocr_enabled),
            ocr_dpi: parse("DOCUMENT_PARSING_OCR_DPI", defaults.ocr_dpi)?,
            max_text_length: parse("DOCUMENT_PARSING_MAX_TEXT_LENGTH", defaults.max_text_length)?,
        })
    }
}

/// Why extraction produced no usable text.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// Extraction is switched off.
    #[error("Document parsing is disabled")]
    Disabled,
    /// The file exceeds the configured size cap.
    #[error("File too large ({size_mb:.1}MB > {limit_mb}MB limit)")]
    TooLarge {
        /// Actual size in megabytes.
        size_mb: f64,
        /// Configured limit in megabytes.
        limit_mb: u64,
    },
    /// Every attempt hit the per-attempt budget.
    #[error("Parsing timed out after {seconds}s")]
    Timeout {
        /// The budget in seconds.
        seconds: u64,
    },
    /// Extraction ran but produced nothing.
    #[error("No text could be extracted from the document")]
    NoText,
    /// The converter failed.
    #[error("Conversion failed: {0}")]
    Conversion(String),
}

/// Raw output of a document converter.
#[derive(Debug, Clone)]
pub struct RawExtraction {
    /// Extracted text (possibly empty or garbled).
    pub text: String,
    /// Page count, where the format has pages.
    pub page_count: Option<u32>,
}

/// Final result of the extraction pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    /// Extracted (possibly truncated and annotated) text.
    pub text: String,
    /// Page count, where known.
    pub page_count: Option<u32>,
    /// Whether the OCR fallback produced the text.
    pub was_ocr: bool,
}

/// The embedded document converter. CPU-bound and synchronous; the pipeline
/// runs it inside the worker pool.
pub trait DocumentExtractor: Send + Sync {
    /// Convert a document to text.
    fn extract(&self, data: &[u8], filename: &str) -> Result<RawExtraction, ExtractError>;
}

/// The OCR engine used as a fallback for scanned PDFs.
pub trait OcrEngine: Send + Sync {
    /// Render the PDF's pages and OCR them, returning the combined text.
    fn ocr_pdf(&self, data: &[u8], dpi: u32) -> Result<String, ExtractError>;
}

/// Bounded pool for CPU-bound work, so extraction and encoding never stall
/// the event loop. Process-level, at least two permits.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool with the given number of workers (minimum 2).
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(2))),
        }
    }

    /// Run a blocking closure on the pool.
    pub async fn run<F, T>(&self, f: F) -> BridgeResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BridgeError::streaming("worker pool closed"))?;
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| BridgeError::streaming_with_source("worker task panicked", e))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Whether extracted text is too garbled to be useful, which triggers the
/// OCR fallback for PDFs.
///
/// Low quality means any of: empty after trim, shorter than 50 chars, less
/// than half alphanumeric-or-whitespace, or fewer than 5 tokens in over 100
/// characters.
pub fn is_text_low_quality(text: &str) -> bool {
    let stripped = text.trim();
    if stripped.is_empty() {
        return true;
    }
    if stripped.chars().count() < 50 {
        return true;
    }

    let total = stripped.chars().count();
    let readable = stripped
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .count();
    if (readable as f64) / (total as f64) < 0.5 {
        return true;
    }

    let words = stripped.split_whitespace().count();
    if words < 5 && total > 100 {
        return true;
    }

    false
}

/// The extraction pipeline: retried, time-boxed conversion with OCR
/// fallback and truncation.
pub struct DocumentPipeline {
    config: DocumentParseConfig,
    extractor: Arc<dyn DocumentExtractor>,
    ocr: Option<Arc<dyn OcrEngine>>,
    pool: WorkerPool,
}

impl DocumentPipeline {
    /// Create a pipeline over the given collaborators.
    pub fn new(
        config: DocumentParseConfig,
        extractor: Arc<dyn DocumentExtractor>,
        ocr: Option<Arc<dyn OcrEngine>>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            config,
            extractor,
            ocr,
            pool,
        }
    }

    /// Whether extraction is switched on.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Extract text from a document.
    pub async fn parse(&self, data: Bytes, filename: &str) -> Result<ParsedDocument, ExtractError> {
        if !self.config.enabled {
            return Err(ExtractError::Disabled);
        }

        let limit_bytes = self.config.max_file_size_mb * 1024 * 1024;
        if data.len() as u64 > limit_bytes {
            return Err(ExtractError::TooLarge {
                size_mb: data.len() as f64 / (1024.0 * 1024.0),
                limit_mb: self.config.max_file_size_mb,
            });
        }

        let raw = self.convert_with_retry(data.clone(), filename).await?;
        let mut text = raw.text;
        let mut was_ocr = false;

        let is_pdf = filename.to_ascii_lowercase().ends_with(".pdf");
        if self.config.ocr_enabled && is_pdf && is_text_low_quality(&text) {
            tracing::info!(
                filename,
                chars = text.chars().count(),
                "low-quality extraction, attempting OCR fallback"
            );
            match self.run_ocr(data, filename).await {
                Ok(ocr_text) if !ocr_text.trim().is_empty() => {
                    text = ocr_text;
                    was_ocr = true;
                }
                Ok(_) => tracing::warn!(filename, "OCR fallback returned no text"),
                Err(error) => tracing::warn!(filename, error = %error, "OCR fallback failed"),
            }
        }

        if text.trim().is_empty() {
            return Err(ExtractError::NoText);
        }

        let truncated = text.chars().count() > self.config.max_text_length;
        if truncated {
            text = text.chars().take(self.config.max_text_length).collect();
            text.push_str(&format!(
                "\n\n[... truncated at {} characters]",
                self.config.max_text_length
            ));
        }

        Ok(ParsedDocument {
            text,
            page_count: raw.page_count,
            was_ocr,
        })
    }

    async fn convert_with_retry(
        &self,
        data: Bytes,
        filename: &str,
    ) -> Result<RawExtraction, ExtractError> {
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_error = ExtractError::NoText;

        for attempt in 0..MAX_ATTEMPTS {
            let extractor = self.extractor.clone();
            let data = data.clone();
            let name = filename.to_string();
            let work = self.pool.run(move || extractor.extract(&data, &name));

            match tokio::time::timeout(self.config.timeout, work).await {
                Ok(Ok(Ok(raw))) => return Ok(raw),
                Ok(Ok(Err(error))) => {
                    tracing::warn!(filename, attempt = attempt + 1, error = %error, "document conversion failed");
                    last_error = error;
                }
                Ok(Err(error)) => {
                    tracing::warn!(filename, attempt = attempt + 1, error = %error, "document worker failed");
                    last_error = ExtractError::Conversion(error.to_string());
                }
                Err(_) => {
                    tracing::warn!(filename, attempt = attempt + 1, "document conversion timed out");
                    last_error = ExtractError::Timeout {
                        seconds: self.config.timeout.as_secs(),
                    };
                }
            }

            if attempt < MAX_ATTEMPTS - 1 {
                let delay = Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }

    async fn run_ocr(&self, data: Bytes, filename: &str) -> Result<String, ExtractError> {
        let Some(ocr) = self.ocr.clone() else {
            return Err(ExtractError::Conversion("no OCR engine configured".into()));
        };
        let dpi = self.config.ocr_dpi;
        let work = self.pool.run(move || ocr.ocr_pdf(&data, dpi));
        match tokio::time::timeout(self.config.timeout, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => Err(ExtractError::Conversion(error.to_string())),
            Err(_) => {
                tracing::warn!(filename, "OCR timed out");
                Err(ExtractError::Timeout {
                    seconds: self.config.timeout.as_secs(),
                })
            }
        }
    }
}

/// Format an extraction outcome as the agent-facing message.
pub fn format_document_for_agent(
    result: &Result<ParsedDocument, ExtractError>,
    filename: &str,
    caption: Option<&str>,
) -> String {
    let mut header = format!("[Document: {filename}]");
    if let Ok(doc) = result {
        if let Some(pages) = doc.page_count {
            header.push_str(&format!(" ({pages} pages)"));
        }
        if doc.was_ocr {
            header.push_str(" (OCR)");
        }
    }

    match result {
        Err(error) => match caption {
            Some(caption) => format!(
                "{header}\n\n\
                 The user uploaded a document and said: \"{caption}\"\n\n\
                 ⚠️ Document extraction failed: {error}\n\
                 The document could not be read automatically. \
                 Please acknowledge the upload and let the user know."
            ),
            None => format!(
                "{header}\n\n\
                 ⚠️ Document extraction failed: {error}\n\
                 The document could not be read automatically."
            ),
        },
        Ok(doc) => match caption {
            Some(caption) => format!(
                "{header}\n\n\
                 The user uploaded this document and asked: \"{caption}\"\n\n\
                 --- Document Content ---\n\
                 {}\n\
                 --- End Document Content ---\n\n\
                 Please analyze the document and respond to the user's question.",
                doc.text
            ),
            None => format!(
                "{header}\n\n\
                 The user has shared a document with you. Here is the extracted content:\n\n\
                 --- Document Content ---\n\
                 {}\n\
                 --- End Document Content ---\n\n\
                 Please acknowledge receiving the document and summarize its key points.",
                doc.text
            ),
        },
    }
}
