use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoAsset {
    pub video_id: String,
    pub source_path: String,
    pub duration_seconds: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptSegment {
    pub video_id: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub video_id: String,
    pub frame_index: u32,
    pub timestamp_seconds: f64,
    pub image_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Visual,
}

impl fmt::Display for Modality {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Text => write!(formatter, "text"),
            Modality::Visual => write!(formatter, "visual"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EmbeddingSource {
    Segment(TranscriptSegment),
    Frame(Frame),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub video_id: String,
    pub modality: Modality,
    pub vector: Vec<f32>,
    pub source: EmbeddingSource,
}

impl EmbeddingRecord {
    /// Start time for segments, timestamp for frames. Ties in query results
    /// break on the smaller key, so earlier moments win.
    pub fn order_key(&self) -> f64 {
        match &self.source {
            EmbeddingSource::Segment(segment) => segment.start_seconds,
            EmbeddingSource::Frame(frame) => frame.timestamp_seconds,
        }
    }

    pub fn start_seconds(&self) -> f64 {
        self.order_key()
    }

    pub fn end_seconds(&self) -> Option<f64> {
        match &self.source {
            EmbeddingSource::Segment(segment) => Some(segment.end_seconds),
            EmbeddingSource::Frame(_) => None,
        }
    }

    pub fn snippet(&self) -> &str {
        match &self.source {
            EmbeddingSource::Segment(segment) => &segment.text,
            EmbeddingSource::Frame(_) => "",
        }
    }

    pub fn frame(&self) -> Option<&Frame> {
        match &self.source {
            EmbeddingSource::Frame(frame) => Some(frame),
            EmbeddingSource::Segment(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Queued,
    ExtractingAudio,
    Transcribing,
    ExtractingFrames,
    EmbeddingText,
    EmbeddingVisual,
    Indexing,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessingStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStage::Completed | ProcessingStage::Failed | ProcessingStage::Cancelled
        )
    }

    /// Progress fraction reached on entering the stage. Each of the seven
    /// working stages contributes an equal share.
    pub fn progress_floor(self) -> f32 {
        match self {
            ProcessingStage::Queued => 0.0,
            ProcessingStage::ExtractingAudio => 1.0 / 7.0,
            ProcessingStage::Transcribing => 2.0 / 7.0,
            ProcessingStage::ExtractingFrames => 3.0 / 7.0,
            ProcessingStage::EmbeddingText => 4.0 / 7.0,
            ProcessingStage::EmbeddingVisual => 5.0 / 7.0,
            ProcessingStage::Indexing => 6.0 / 7.0,
            ProcessingStage::Completed => 1.0,
            ProcessingStage::Failed | ProcessingStage::Cancelled => 0.0,
        }
    }

    fn successor(self) -> Option<ProcessingStage> {
        match self {
            ProcessingStage::Queued => Some(ProcessingStage::ExtractingAudio),
            ProcessingStage::ExtractingAudio => Some(ProcessingStage::Transcribing),
            ProcessingStage::Transcribing => Some(ProcessingStage::ExtractingFrames),
            ProcessingStage::ExtractingFrames => Some(ProcessingStage::EmbeddingText),
            ProcessingStage::EmbeddingText => Some(ProcessingStage::EmbeddingVisual),
            ProcessingStage::EmbeddingVisual => Some(ProcessingStage::Indexing),
            ProcessingStage::Indexing => Some(ProcessingStage::Completed),
            ProcessingStage::Completed | ProcessingStage::Failed | ProcessingStage::Cancelled => {
                None
            }
        }
    }

    /// Exhaustive transition table: forward one stage, a same-stage progress
    /// update, or straight to Failed/Cancelled. Terminal stages accept
    /// nothing.
    pub fn can_transition(self, next: ProcessingStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == self {
            return true;
        }
        if matches!(next, ProcessingStage::Failed | ProcessingStage::Cancelled) {
            return true;
        }
        self.successor() == Some(next)
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessingStage::Queued => "queued",
            ProcessingStage::ExtractingAudio => "extracting_audio",
            ProcessingStage::Transcribing => "transcribing",
            ProcessingStage::ExtractingFrames => "extracting_frames",
            ProcessingStage::EmbeddingText => "embedding_text",
            ProcessingStage::EmbeddingVisual => "embedding_visual",
            ProcessingStage::Indexing => "indexing",
            ProcessingStage::Completed => "completed",
            ProcessingStage::Failed => "failed",
            ProcessingStage::Cancelled => "cancelled",
        };
        write!(formatter, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub video_id: String,
    pub stage: ProcessingStage,
    pub progress: f32,
    pub message: String,
    pub terminal: bool,
}

impl ProcessingStatus {
    pub fn new(
        video_id: impl Into<String>,
        stage: ProcessingStage,
        progress: f32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            stage,
            progress,
            message: message.into(),
            terminal: stage.is_terminal(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Text,
    Visual,
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = crate::SearchError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(SearchMode::Text),
            "visual" => Ok(SearchMode::Visual),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(crate::SearchError::UnsupportedMode(other.to_string())),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Text => write!(formatter, "text"),
            SearchMode::Visual => write!(formatter, "visual"),
            SearchMode::Hybrid => write!(formatter, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub video_id: String,
    pub text: String,
    pub mode: SearchMode,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub start_seconds: f64,
    pub end_seconds: Option<f64>,
    pub text: String,
    pub score: f32,
    pub modality: Modality,
    pub frame: Option<Frame>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEvent {
    pub video_id: String,
    pub query: String,
    pub mode: SearchMode,
    pub recorded_at: DateTime<Utc>,
    pub result_count: usize,
    pub top_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoInfo {
    pub video_id: String,
    pub duration_seconds: f64,
    pub segment_count: usize,
    pub frame_count: usize,
    pub frame_interval_seconds: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub frame_interval_seconds: u32,
    pub max_concurrent_videos: usize,
    pub min_segment_chars: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            frame_interval_seconds: 1,
            max_concurrent_videos: 2,
            min_segment_chars: 3,
        }
    }
}
