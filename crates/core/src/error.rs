use crate::models::{Modality, ProcessingStage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("media tool unavailable: {0}")]
    ToolMissing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcription failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(
        "dimension mismatch for {video_id}/{modality}: space holds {expected}-d vectors, got {actual}"
    )]
    DimensionMismatch {
        video_id: String,
        modality: Modality,
        expected: usize,
        actual: usize,
    },

    #[error("vector norm below epsilon for {video_id}/{modality}, refusing to index")]
    DegenerateVector { video_id: String, modality: Modality },
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("no status recorded for video {0}")]
    NotFound(String),

    #[error("illegal stage transition {from} -> {to} for video {video_id}")]
    InvalidTransition {
        video_id: String,
        from: ProcessingStage,
        to: ProcessingStage,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("audio/frame extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("transcription failed: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("video {0} is already being processed")]
    AlreadyProcessing(String),

    #[error("pipeline cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("video {0} has no completed index")]
    NotIndexed(String),

    #[error("query is empty")]
    EmptyQuery,

    #[error("unsupported search mode: {0}")]
    UnsupportedMode(String),

    #[error("query encoding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
