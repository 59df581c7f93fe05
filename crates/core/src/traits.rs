use crate::error::{EmbeddingError, ExtractionError, TranscriptionError};
use crate::models::{Frame, SearchEvent, TranscriptSegment};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Extracts the audio track into a standalone file suitable for
    /// transcription. The caller owns the returned file.
    async fn extract_audio(&self, source_path: &Path) -> Result<PathBuf, ExtractionError>;

    async fn sample_frames(
        &self,
        video_id: &str,
        source_path: &Path,
        interval_seconds: u32,
    ) -> Result<Vec<Frame>, ExtractionError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Returns segments ordered by start time.
    async fn transcribe(
        &self,
        video_id: &str,
        audio_path: &Path,
    ) -> Result<Vec<TranscriptSegment>, TranscriptionError>;
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Joint text/image embedding space: queries and frames land in the same
/// space so a text query can rank frames directly.
#[async_trait]
pub trait VisualEmbedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_image(&self, image_path: &Path) -> Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
pub trait SearchHistorySink: Send + Sync {
    /// Best-effort: the engine emits the event and moves on.
    async fn record_search(&self, event: SearchEvent);
}
