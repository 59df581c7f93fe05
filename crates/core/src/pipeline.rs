use crate::collaborators::history::SearchHistoryStore;
use crate::error::{PipelineError, StatusError};
use crate::index::VectorIndex;
use crate::models::{
    EmbeddingRecord, EmbeddingSource, Modality, PipelineOptions, ProcessingStage,
    ProcessingStatus, VideoAsset, VideoInfo,
};
use crate::status::StatusStore;
use crate::traits::{MediaExtractor, TextEmbedder, Transcriber, VisualEmbedder};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub fn generate_video_id(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(Utc::now().to_rfc3339().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

struct ActivePipeline {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Drives videos through the ingestion stages. Every video gets its own
/// owned task, registered here so it can be cancelled; a semaphore bounds
/// how many pipelines run at once. A video id is processed by at most one
/// pipeline at a time.
pub struct IngestionCoordinator {
    status: Arc<StatusStore>,
    index: Arc<VectorIndex>,
    media: Arc<dyn MediaExtractor>,
    transcriber: Arc<dyn Transcriber>,
    text_embedder: Arc<dyn TextEmbedder>,
    visual_embedder: Arc<dyn VisualEmbedder>,
    history: Arc<SearchHistoryStore>,
    options: PipelineOptions,
    permits: Arc<Semaphore>,
    active: Mutex<HashMap<String, ActivePipeline>>,
    assets: Arc<Mutex<HashMap<String, VideoAsset>>>,
    catalog: Arc<Mutex<HashMap<String, VideoInfo>>>,
}

impl IngestionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        status: Arc<StatusStore>,
        index: Arc<VectorIndex>,
        media: Arc<dyn MediaExtractor>,
        transcriber: Arc<dyn Transcriber>,
        text_embedder: Arc<dyn TextEmbedder>,
        visual_embedder: Arc<dyn VisualEmbedder>,
        history: Arc<SearchHistoryStore>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            status,
            index,
            media,
            transcriber,
            text_embedder,
            visual_embedder,
            history,
            permits: Arc::new(Semaphore::new(options.max_concurrent_videos.max(1))),
            options,
            active: Mutex::new(HashMap::new()),
            assets: Arc::new(Mutex::new(HashMap::new())),
            catalog: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queues the video and returns as soon as its pipeline task is spawned.
    /// Fails if another pipeline already owns the id, or if the id carries a
    /// terminal status from an earlier run (failed videos must be deleted
    /// and resubmitted).
    pub fn start_processing(
        &self,
        video_id: &str,
        source_path: impl Into<PathBuf>,
    ) -> Result<(), PipelineError> {
        let mut active = self.active.lock().expect("registry lock poisoned");
        active.retain(|_, pipeline| !pipeline.handle.is_finished());
        if active.contains_key(video_id) {
            return Err(PipelineError::AlreadyProcessing(video_id.to_string()));
        }

        self.status.set(
            video_id,
            ProcessingStage::Queued,
            ProcessingStage::Queued.progress_floor(),
            "queued for processing",
        )?;

        let source_path = source_path.into();
        self.assets.lock().expect("asset lock poisoned").insert(
            video_id.to_string(),
            VideoAsset {
                video_id: video_id.to_string(),
                source_path: source_path.to_string_lossy().to_string(),
                // Unknown until the pipeline has seen the media.
                duration_seconds: 0.0,
                created_at: Utc::now(),
            },
        );

        let cancelled = Arc::new(AtomicBool::new(false));
        let run = PipelineRun {
            video_id: video_id.to_string(),
            source_path,
            cancelled: Arc::clone(&cancelled),
            status: Arc::clone(&self.status),
            index: Arc::clone(&self.index),
            media: Arc::clone(&self.media),
            transcriber: Arc::clone(&self.transcriber),
            text_embedder: Arc::clone(&self.text_embedder),
            visual_embedder: Arc::clone(&self.visual_embedder),
            assets: Arc::clone(&self.assets),
            catalog: Arc::clone(&self.catalog),
            options: self.options,
        };

        let permits = Arc::clone(&self.permits);
        let handle = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            run.execute().await;
        });

        info!(video_id, "pipeline spawned");
        active.insert(
            video_id.to_string(),
            ActivePipeline { cancelled, handle },
        );
        Ok(())
    }

    pub fn get_status(&self, video_id: &str) -> Result<ProcessingStatus, StatusError> {
        self.status.get(video_id)
    }

    pub fn video_info(&self, video_id: &str) -> Option<VideoInfo> {
        self.catalog
            .lock()
            .expect("catalog lock poisoned")
            .get(video_id)
            .cloned()
    }

    pub fn asset(&self, video_id: &str) -> Option<VideoAsset> {
        self.assets
            .lock()
            .expect("asset lock poisoned")
            .get(video_id)
            .cloned()
    }

    /// Removes everything known about the video: asset, status, both
    /// embedding spaces, search history and catalog row. A pipeline still in
    /// flight is cancelled first, and its rows are purged again once the
    /// task has actually stopped, so no stage result outlives the delete and
    /// the id becomes free for resubmission without a second call.
    pub fn delete_index(&self, video_id: &str) {
        let removed = self
            .active
            .lock()
            .expect("registry lock poisoned")
            .remove(video_id);

        match removed {
            Some(ActivePipeline { cancelled, handle }) if !handle.is_finished() => {
                cancelled.store(true, Ordering::SeqCst);
                handle.abort();
                self.status.cancel(video_id, "deleted while processing");
                warn!(video_id, "pipeline cancelled by delete");

                // The task may have passed a cancellation check right before
                // the flag was set; any index write it still lands must not
                // survive. Purge again after it terminates, and only then
                // drop the status row so the transition table keeps blocking
                // it in the meantime.
                let status = Arc::clone(&self.status);
                let index = Arc::clone(&self.index);
                let assets = Arc::clone(&self.assets);
                let catalog = Arc::clone(&self.catalog);
                let video_id = video_id.to_string();
                tokio::spawn(async move {
                    let _ = handle.await;
                    index.delete(&video_id);
                    assets.lock().expect("asset lock poisoned").remove(&video_id);
                    catalog
                        .lock()
                        .expect("catalog lock poisoned")
                        .remove(&video_id);
                    status.delete(&video_id);
                });
            }
            _ => self.status.delete(video_id),
        }

        self.index.delete(video_id);
        self.history.delete(video_id);
        self.assets
            .lock()
            .expect("asset lock poisoned")
            .remove(video_id);
        self.catalog
            .lock()
            .expect("catalog lock poisoned")
            .remove(video_id);
    }
}

struct PipelineRun {
    video_id: String,
    source_path: PathBuf,
    cancelled: Arc<AtomicBool>,
    status: Arc<StatusStore>,
    index: Arc<VectorIndex>,
    media: Arc<dyn MediaExtractor>,
    transcriber: Arc<dyn Transcriber>,
    text_embedder: Arc<dyn TextEmbedder>,
    visual_embedder: Arc<dyn VisualEmbedder>,
    assets: Arc<Mutex<HashMap<String, VideoAsset>>>,
    catalog: Arc<Mutex<HashMap<String, VideoInfo>>>,
    options: PipelineOptions,
}

impl PipelineRun {
    async fn execute(self) {
        match self.run().await {
            Ok(()) => info!(video_id = %self.video_id, "processing complete"),
            Err(PipelineError::Cancelled) => {
                info!(video_id = %self.video_id, "pipeline stopped after cancellation")
            }
            Err(failure) => {
                error!(video_id = %self.video_id, %failure, "pipeline failed");
                let progress = self
                    .status
                    .get(&self.video_id)
                    .map(|status| status.progress)
                    .unwrap_or(0.0);
                // Rejected when the status already turned terminal (a delete
                // raced us), in which case there is nothing left to record.
                let _ = self.status.set(
                    &self.video_id,
                    ProcessingStage::Failed,
                    progress,
                    failure.to_string(),
                );
            }
        }
    }

    async fn run(&self) -> Result<(), PipelineError> {
        self.advance(ProcessingStage::ExtractingAudio, "extracting audio track")?;
        let audio_path = self.media.extract_audio(&self.source_path).await?;

        self.advance(ProcessingStage::Transcribing, "transcribing speech")?;
        let mut segments = self
            .transcriber
            .transcribe(&self.video_id, &audio_path)
            .await?;
        segments.retain(|segment| segment.text.trim().len() >= self.options.min_segment_chars);

        self.advance(ProcessingStage::ExtractingFrames, "sampling frames")?;
        let frames = self
            .media
            .sample_frames(
                &self.video_id,
                &self.source_path,
                self.options.frame_interval_seconds,
            )
            .await?;

        self.advance(
            ProcessingStage::EmbeddingText,
            "embedding transcript segments",
        )?;
        let mut records = Vec::with_capacity(segments.len() + frames.len());
        for segment in &segments {
            self.guard()?;
            let vector = self.text_embedder.embed_text(&segment.text).await?;
            records.push(EmbeddingRecord {
                video_id: self.video_id.clone(),
                modality: Modality::Text,
                vector,
                source: EmbeddingSource::Segment(segment.clone()),
            });
        }

        self.advance(ProcessingStage::EmbeddingVisual, "encoding sampled frames")?;
        let floor = ProcessingStage::EmbeddingVisual.progress_floor();
        let ceiling = ProcessingStage::Indexing.progress_floor();
        for (position, frame) in frames.iter().enumerate() {
            self.guard()?;
            let vector = self
                .visual_embedder
                .embed_image(Path::new(&frame.image_path))
                .await?;
            records.push(EmbeddingRecord {
                video_id: self.video_id.clone(),
                modality: Modality::Visual,
                vector,
                source: EmbeddingSource::Frame(frame.clone()),
            });

            if (position + 1) % 25 == 0 {
                let within = (position + 1) as f32 / frames.len() as f32;
                self.report(
                    ProcessingStage::EmbeddingVisual,
                    floor + (ceiling - floor) * within,
                    format!("encoded {}/{} frames", position + 1, frames.len()),
                )?;
            }
        }

        self.advance(ProcessingStage::Indexing, "writing embedding records")?;
        for record in records {
            self.guard()?;
            self.index.insert(record)?;
        }

        let duration_seconds = segments
            .last()
            .map(|segment| segment.end_seconds)
            .unwrap_or(0.0)
            .max(
                frames
                    .last()
                    .map(|frame| frame.timestamp_seconds)
                    .unwrap_or(0.0),
            );
        self.catalog.lock().expect("catalog lock poisoned").insert(
            self.video_id.clone(),
            VideoInfo {
                video_id: self.video_id.clone(),
                duration_seconds,
                segment_count: segments.len(),
                frame_count: frames.len(),
                frame_interval_seconds: self.options.frame_interval_seconds,
            },
        );
        if let Some(asset) = self
            .assets
            .lock()
            .expect("asset lock poisoned")
            .get_mut(&self.video_id)
        {
            asset.duration_seconds = duration_seconds;
        }

        // The transcription scratch file has served its purpose.
        let _ = tokio::fs::remove_file(&audio_path).await;

        self.advance(ProcessingStage::Completed, "processing complete")?;
        Ok(())
    }

    fn guard(&self) -> Result<(), PipelineError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Status is written before the stage's work starts, so a concurrent
    /// reader always sees the stage currently executing.
    fn advance(&self, stage: ProcessingStage, message: &str) -> Result<(), PipelineError> {
        info!(video_id = %self.video_id, stage = %stage, "stage transition");
        self.report(stage, stage.progress_floor(), message.to_string())
    }

    fn report(
        &self,
        stage: ProcessingStage,
        progress: f32,
        message: String,
    ) -> Result<(), PipelineError> {
        self.guard()?;
        match self.status.set(&self.video_id, stage, progress, message) {
            Ok(()) => Ok(()),
            Err(StatusError::InvalidTransition { from, .. }) if from.is_terminal() => {
                Err(PipelineError::Cancelled)
            }
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, ExtractionError, TranscriptionError};
    use crate::models::{Frame, TranscriptSegment};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeMedia {
        frame_count: u32,
    }

    #[async_trait]
    impl MediaExtractor for FakeMedia {
        async fn extract_audio(&self, _source_path: &Path) -> Result<PathBuf, ExtractionError> {
            let path = std::env::temp_dir().join(format!("{}.wav", uuid::Uuid::new_v4()));
            std::fs::write(&path, b"riff")?;
            Ok(path)
        }

        async fn sample_frames(
            &self,
            video_id: &str,
            _source_path: &Path,
            interval_seconds: u32,
        ) -> Result<Vec<Frame>, ExtractionError> {
            Ok((0..self.frame_count)
                .map(|index| Frame {
                    video_id: video_id.to_string(),
                    frame_index: index,
                    timestamp_seconds: (index * interval_seconds) as f64,
                    image_path: format!("/tmp/{video_id}/frame_{index:05}.jpg"),
                })
                .collect())
        }
    }

    struct FakeTranscriber {
        segments: Vec<(f64, f64, &'static str)>,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(
            &self,
            video_id: &str,
            _audio_path: &Path,
        ) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
            Ok(self
                .segments
                .iter()
                .map(|(start, end, text)| TranscriptSegment {
                    video_id: video_id.to_string(),
                    start_seconds: *start,
                    end_seconds: *end,
                    text: text.to_string(),
                })
                .collect())
        }
    }

    struct FailingTranscriber;

    #[async_trait]
    impl Transcriber for FailingTranscriber {
        async fn transcribe(
            &self,
            _video_id: &str,
            _audio_path: &Path,
        ) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
            Err(TranscriptionError::Failed("model unavailable".to_string()))
        }
    }

    struct FakeTextEmbedder;

    #[async_trait]
    impl TextEmbedder for FakeTextEmbedder {
        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    struct FakeVisualEmbedder {
        delay: Duration,
    }

    #[async_trait]
    impl VisualEmbedder for FakeVisualEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.0, 1.0])
        }

        async fn embed_image(&self, _image_path: &Path) -> Result<Vec<f32>, EmbeddingError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(vec![0.0, 1.0])
        }
    }

    struct Harness {
        coordinator: IngestionCoordinator,
        status: Arc<StatusStore>,
        index: Arc<VectorIndex>,
    }

    fn harness(transcriber: Arc<dyn Transcriber>, frame_delay: Duration) -> Harness {
        let status = Arc::new(StatusStore::new());
        let index = Arc::new(VectorIndex::new());
        let coordinator = IngestionCoordinator::new(
            Arc::clone(&status),
            Arc::clone(&index),
            Arc::new(FakeMedia { frame_count: 10 }),
            transcriber,
            Arc::new(FakeTextEmbedder),
            Arc::new(FakeVisualEmbedder { delay: frame_delay }),
            Arc::new(SearchHistoryStore::new()),
            PipelineOptions::default(),
        );
        Harness {
            coordinator,
            status,
            index,
        }
    }

    fn talking_transcriber() -> Arc<dyn Transcriber> {
        Arc::new(FakeTranscriber {
            segments: vec![
                (0.0, 5.0, "welcome to the video"),
                (5.0, 10.0, "the main topic is hydraulic pumps"),
            ],
        })
    }

    async fn wait_for_terminal(status: &StatusStore, video_id: &str) -> ProcessingStatus {
        for _ in 0..300 {
            if let Ok(current) = status.get(video_id) {
                if current.terminal {
                    return current;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pipeline for {video_id} never reached a terminal stage");
    }

    #[tokio::test]
    async fn pipeline_completes_and_populates_both_modalities() {
        let harness = harness(talking_transcriber(), Duration::ZERO);
        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();

        let terminal = wait_for_terminal(&harness.status, "vid-1").await;
        assert_eq!(terminal.stage, ProcessingStage::Completed);
        assert_eq!(terminal.progress, 1.0);
        assert_eq!(harness.index.len("vid-1", Modality::Text), 2);
        assert_eq!(harness.index.len("vid-1", Modality::Visual), 10);

        let info = harness.coordinator.video_info("vid-1").unwrap();
        assert_eq!(info.segment_count, 2);
        assert_eq!(info.frame_count, 10);
        assert_eq!(info.duration_seconds, 10.0);
    }

    #[tokio::test]
    async fn progress_is_monotonic_until_terminal() {
        let harness = harness(
            talking_transcriber(),
            Duration::from_millis(2),
        );
        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();

        let mut last = 0.0f32;
        loop {
            let current = match harness.status.get("vid-1") {
                Ok(current) => current,
                Err(_) => continue,
            };
            assert!(
                current.progress >= last,
                "progress regressed from {last} to {}",
                current.progress
            );
            last = current.progress;
            if current.terminal {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn collaborator_failure_marks_video_failed_without_retry() {
        let harness = harness(Arc::new(FailingTranscriber), Duration::ZERO);
        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();

        let terminal = wait_for_terminal(&harness.status, "vid-1").await;
        assert_eq!(terminal.stage, ProcessingStage::Failed);
        assert!(terminal.message.contains("model unavailable"));
        assert!(harness.index.is_empty("vid-1"));
    }

    #[tokio::test]
    async fn a_video_id_is_owned_by_one_pipeline_at_a_time() {
        let harness = harness(talking_transcriber(), Duration::from_millis(20));
        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();

        let second = harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4");
        assert!(matches!(second, Err(PipelineError::AlreadyProcessing(_))));

        wait_for_terminal(&harness.status, "vid-1").await;
    }

    #[tokio::test]
    async fn failed_video_must_be_deleted_before_resubmission() {
        let harness = harness(Arc::new(FailingTranscriber), Duration::ZERO);
        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();
        wait_for_terminal(&harness.status, "vid-1").await;

        let resubmit = harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4");
        assert!(matches!(resubmit, Err(PipelineError::Status(_))));

        harness.coordinator.delete_index("vid-1");
        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();
        wait_for_terminal(&harness.status, "vid-1").await;
    }

    #[tokio::test]
    async fn delete_mid_pipeline_cancels_and_clears_the_index() {
        let harness = harness(talking_transcriber(), Duration::from_millis(30));
        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();

        // Let it reach the frame-encoding stage before pulling the plug.
        for _ in 0..200 {
            if let Ok(current) = harness.status.get("vid-1") {
                if current.stage == ProcessingStage::EmbeddingVisual {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        harness.coordinator.delete_index("vid-1");

        let status = harness.status.get("vid-1").unwrap();
        assert_eq!(status.stage, ProcessingStage::Cancelled);
        assert!(status.terminal);

        // Once the cancelled task is gone, nothing of the video remains and
        // the id is free again without another delete.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(harness.index.is_empty("vid-1"));
        assert!(harness.coordinator.video_info("vid-1").is_none());
        assert!(harness.coordinator.asset("vid-1").is_none());
        assert!(matches!(
            harness.status.get("vid-1"),
            Err(StatusError::NotFound(_))
        ));

        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();
        let terminal = wait_for_terminal(&harness.status, "vid-1").await;
        assert_eq!(terminal.stage, ProcessingStage::Completed);
        assert_eq!(harness.index.len("vid-1", Modality::Text), 2);
    }

    #[tokio::test]
    async fn asset_is_registered_at_submission_and_removed_on_delete() {
        let harness = harness(talking_transcriber(), Duration::ZERO);
        harness
            .coordinator
            .start_processing("vid-1", "/videos/demo.mp4")
            .unwrap();

        let asset = harness.coordinator.asset("vid-1").unwrap();
        assert_eq!(asset.source_path, "/videos/demo.mp4");
        assert_eq!(asset.duration_seconds, 0.0);

        wait_for_terminal(&harness.status, "vid-1").await;
        assert_eq!(
            harness.coordinator.asset("vid-1").unwrap().duration_seconds,
            10.0
        );

        harness.coordinator.delete_index("vid-1");
        assert!(harness.coordinator.asset("vid-1").is_none());
    }

    #[test]
    fn video_ids_are_short_and_unique_per_call() {
        let first = generate_video_id("/videos/demo.mp4");
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
