//! Deadline-enforcing driver over the raw chunk stream.
//!
//! Two clocks run against the stream: a total deadline for the whole turn
//! and an idle-data deadline reset only by non-ping events. Either expiring
//! yields one synthetic timeout error event and ends the stream.

use super::events::{ChunkParser, StreamEvent};
use crate::letta::ChunkStream;
use futures::StreamExt;
use tokio::time::{Duration, Instant};

/// Default total stream deadline.
pub const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default idle-data deadline.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// A finite, non-restartable sequence of normalized events. One per turn.
pub struct StepStream {
    chunks: Option<ChunkStream>,
    parser: ChunkParser,
    total_timeout: Duration,
    total_deadline: Instant,
    idle_timeout: Duration,
    last_data: Instant,
}

impl StepStream {
    /// Wrap a raw chunk stream with the given deadlines.
    pub fn new(chunks: ChunkStream, total_timeout: Duration, idle_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            chunks: Some(chunks),
            parser: ChunkParser::new(false),
            total_timeout,
            total_deadline: now + total_timeout,
            idle_timeout,
            last_data: now,
        }
    }

    /// Wrap a raw chunk stream with the default deadlines.
    pub fn with_defaults(chunks: ChunkStream) -> Self {
        Self::new(chunks, DEFAULT_TOTAL_TIMEOUT, DEFAULT_IDLE_TIMEOUT)
    }

    /// Include reasoning events instead of dropping them.
    pub fn include_reasoning(mut self) -> Self {
        self.parser = ChunkParser::new(true);
        self
    }

    /// Pull the next normalized event.
    ///
    /// `None` means the stream ended; a timeout produces one final
    /// [`StreamEvent::Error`] and then the stream is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            self.chunks.as_ref()?;

            let now = Instant::now();
            if now >= self.total_deadline {
                tracing::error!("step stream hit total deadline");
                self.chunks = None;
                return Some(StreamEvent::timeout(self.total_timeout.as_secs()));
            }
            let idle_deadline = self.last_data + self.idle_timeout;
            if now >= idle_deadline {
                tracing::error!("step stream idle with no real data, killing stream");
                self.chunks = None;
                return Some(StreamEvent::timeout(self.idle_timeout.as_secs()));
            }

            let wake = self.total_deadline.min(idle_deadline);
            let next = {
                let chunks = self.chunks.as_mut()?;
                tokio::time::timeout_at(wake, chunks.next()).await
            };

            match next {
                // Deadline fired; loop re-checks which one and synthesizes.
                Err(_) => continue,
                Ok(None) => {
                    self.chunks = None;
                    return None;
                }
                Ok(Some(Err(error))) => {
                    tracing::error!(error = %error, "step stream transport error");
                    self.chunks = None;
                    return Some(StreamEvent::Error {
                        message: error.to_string(),
                        error_type: "stream".to_string(),
                        detail: None,
                    });
                }
                Ok(Some(Ok(chunk))) => {
                    let Some(event) = self.parser.parse(&chunk) else {
                        continue;
                    };
                    if event != StreamEvent::Ping {
                        self.last_data = Instant::now();
                    }
                    return Some(event);
                }
            }
        }
    }
}
