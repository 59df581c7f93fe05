use crate::error::StatusError;
use crate::models::{ProcessingStage, ProcessingStatus};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-video processing state. Polled concurrently by status readers while
/// exactly one pipeline task writes per video id, so a read-write lock over
/// the whole map is enough; there is no cross-video write contention.
#[derive(Default)]
pub struct StatusStore {
    inner: RwLock<HashMap<String, ProcessingStatus>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stage transition or an in-stage progress update. Transitions
    /// not in the stage table are rejected, which also stops any write
    /// arriving after a terminal stage. Progress never decreases while the
    /// video is still working.
    pub fn set(
        &self,
        video_id: &str,
        stage: ProcessingStage,
        progress: f32,
        message: impl Into<String>,
    ) -> Result<(), StatusError> {
        let mut map = self.inner.write().expect("status lock poisoned");

        let progress = match map.get(video_id) {
            Some(existing) => {
                if !existing.stage.can_transition(stage) {
                    return Err(StatusError::InvalidTransition {
                        video_id: video_id.to_string(),
                        from: existing.stage,
                        to: stage,
                    });
                }
                if stage.is_terminal() {
                    progress
                } else {
                    progress.max(existing.progress)
                }
            }
            None => progress,
        };

        map.insert(
            video_id.to_string(),
            ProcessingStatus::new(video_id, stage, progress, message),
        );
        Ok(())
    }

    /// Forces a terminal Cancelled stage while keeping the progress the
    /// pipeline had reached. A video that already finished stays as it is.
    pub fn cancel(&self, video_id: &str, message: impl Into<String>) {
        let mut map = self.inner.write().expect("status lock poisoned");
        if let Some(existing) = map.get(video_id) {
            if existing.stage.is_terminal() {
                return;
            }
            let progress = existing.progress;
            map.insert(
                video_id.to_string(),
                ProcessingStatus::new(video_id, ProcessingStage::Cancelled, progress, message),
            );
        }
    }

    pub fn get(&self, video_id: &str) -> Result<ProcessingStatus, StatusError> {
        self.inner
            .read()
            .expect("status lock poisoned")
            .get(video_id)
            .cloned()
            .ok_or_else(|| StatusError::NotFound(video_id.to_string()))
    }

    pub fn delete(&self, video_id: &str) {
        self.inner
            .write()
            .expect("status lock poisoned")
            .remove(video_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_video_reports_not_found() {
        let store = StatusStore::new();
        assert!(matches!(
            store.get("ghost"),
            Err(StatusError::NotFound(id)) if id == "ghost"
        ));
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = StatusStore::new();
        store
            .set("vid-1", ProcessingStage::Queued, 0.0, "queued")
            .unwrap();

        let status = store.get("vid-1").unwrap();
        assert_eq!(status.stage, ProcessingStage::Queued);
        assert!(!status.terminal);
        assert_eq!(status.message, "queued");
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let store = StatusStore::new();
        store
            .set("vid-1", ProcessingStage::Queued, 0.0, "queued")
            .unwrap();

        let result = store.set(
            "vid-1",
            ProcessingStage::Transcribing,
            0.3,
            "too far ahead",
        );
        assert!(matches!(
            result,
            Err(StatusError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn progress_never_decreases_before_terminal() {
        let store = StatusStore::new();
        store
            .set("vid-1", ProcessingStage::Queued, 0.0, "queued")
            .unwrap();
        store
            .set("vid-1", ProcessingStage::ExtractingAudio, 0.4, "audio")
            .unwrap();
        // An in-stage update with a smaller fraction is clamped up.
        store
            .set("vid-1", ProcessingStage::ExtractingAudio, 0.1, "audio")
            .unwrap();

        assert_eq!(store.get("vid-1").unwrap().progress, 0.4);
    }

    #[test]
    fn terminal_state_cannot_revert() {
        let store = StatusStore::new();
        store
            .set("vid-1", ProcessingStage::Queued, 0.0, "queued")
            .unwrap();
        store
            .set("vid-1", ProcessingStage::Failed, 0.2, "boom")
            .unwrap();

        assert!(store
            .set("vid-1", ProcessingStage::ExtractingAudio, 0.3, "zombie")
            .is_err());
        let status = store.get("vid-1").unwrap();
        assert_eq!(status.stage, ProcessingStage::Failed);
        assert!(status.terminal);
    }

    #[test]
    fn cancel_keeps_reached_progress_and_is_terminal() {
        let store = StatusStore::new();
        store
            .set("vid-1", ProcessingStage::Queued, 0.0, "queued")
            .unwrap();
        store
            .set("vid-1", ProcessingStage::ExtractingAudio, 0.14, "audio")
            .unwrap();

        store.cancel("vid-1", "deleted by caller");
        let status = store.get("vid-1").unwrap();
        assert_eq!(status.stage, ProcessingStage::Cancelled);
        assert_eq!(status.progress, 0.14);
        assert!(status.terminal);
    }

    #[test]
    fn cancel_does_not_overwrite_completed() {
        let store = StatusStore::new();
        store
            .set("vid-1", ProcessingStage::Queued, 0.0, "queued")
            .unwrap();
        let mut stage = ProcessingStage::Queued;
        while let Some(next) = match stage {
            ProcessingStage::Completed => None,
            current => {
                let next = [
                    ProcessingStage::ExtractingAudio,
                    ProcessingStage::Transcribing,
                    ProcessingStage::ExtractingFrames,
                    ProcessingStage::EmbeddingText,
                    ProcessingStage::EmbeddingVisual,
                    ProcessingStage::Indexing,
                    ProcessingStage::Completed,
                ]
                .into_iter()
                .find(|candidate| current.can_transition(*candidate) && *candidate != current);
                next
            }
        } {
            store
                .set("vid-1", next, next.progress_floor(), "advancing")
                .unwrap();
            stage = next;
        }

        store.cancel("vid-1", "late delete");
        assert_eq!(store.get("vid-1").unwrap().stage, ProcessingStage::Completed);
    }

    #[test]
    fn delete_removes_the_record() {
        let store = StatusStore::new();
        store
            .set("vid-1", ProcessingStage::Queued, 0.0, "queued")
            .unwrap();
        store.delete("vid-1");
        assert!(store.get("vid-1").is_err());
    }
}
