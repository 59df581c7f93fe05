pub mod collaborators;
pub mod error;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod status;
pub mod traits;

pub use collaborators::{
    EndpointConfig, FfmpegMedia, HttpTextEmbedder, HttpTranscriber, HttpVisualEmbedder,
    SearchHistoryStore,
};
pub use error::{
    EmbeddingError, ExtractionError, IndexError, PipelineError, SearchError, StatusError,
    TranscriptionError,
};
pub use index::VectorIndex;
pub use models::{
    EmbeddingRecord, EmbeddingSource, Frame, Modality, PipelineOptions, ProcessingStage,
    ProcessingStatus, SearchEvent, SearchMode, SearchQuery, SearchResult, TranscriptSegment,
    VideoAsset, VideoInfo,
};
pub use pipeline::{generate_video_id, IngestionCoordinator};
pub use search::SearchEngine;
pub use status::StatusStore;
pub use traits::{MediaExtractor, SearchHistorySink, TextEmbedder, Transcriber, VisualEmbedder};
