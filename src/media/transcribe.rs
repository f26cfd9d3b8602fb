//! Speech-to-text interface for voice messages.

use bytes::Bytes;

/// Why a transcription attempt produced no text.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscribeError {
    /// The engine failed or is unreachable.
    #[error("{0}")]
    Failed(String),
    /// No engine is configured.
    #[error("transcription is not configured")]
    NotConfigured,
}

/// The speech-to-text engine.
#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio clip to text.
    async fn transcribe(&self, data: Bytes, filename: &str) -> Result<String, TranscribeError>;
}

/// Format a transcription outcome as the agent-facing message body.
pub fn format_voice_message(result: Result<String, TranscribeError>) -> String {
    match result {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                "[Voice message]: (no speech detected)".to_string()
            } else {
                format!("[Voice message]: {text}")
            }
        }
        Err(error) => format!("[Voice message - transcription failed: {error}]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_success() {
        assert_eq!(
            format_voice_message(Ok("hello world".to_string())),
            "[Voice message]: hello world"
        );
    }

    #[test]
    fn test_format_empty_transcript() {
        assert_eq!(
            format_voice_message(Ok("   ".to_string())),
            "[Voice message]: (no speech detected)"
        );
    }

    #[test]
    fn test_format_failure() {
        assert_eq!(
            format_voice_message(Err(TranscribeError::Failed("engine offline".into()))),
            "[Voice message - transcription failed: engine offline]"
        );
    }
}
