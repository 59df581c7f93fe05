use crate::error::ExtractionError;
use crate::models::Frame;
use crate::traits::MediaExtractor;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

/// Runs the `ffmpeg` binary for audio extraction and frame sampling.
/// Outputs land under the system temp directory; callers own the files.
pub struct FfmpegMedia {
    binary: PathBuf,
    work_dir: PathBuf,
}

impl Default for FfmpegMedia {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            work_dir: std::env::temp_dir(),
        }
    }
}

impl FfmpegMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            work_dir: work_dir.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), ExtractionError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ExtractionError::ToolMissing(self.binary.display().to_string())
                } else {
                    ExtractionError::Io(error)
                }
            })?;

        if !output.status.success() {
            return Err(ExtractionError::Failed(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .last()
                    .unwrap_or("no stderr")
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaExtractor for FfmpegMedia {
    async fn extract_audio(&self, source_path: &Path) -> Result<PathBuf, ExtractionError> {
        let audio_path = self
            .work_dir
            .join(format!("audio_{}.wav", Uuid::new_v4()));
        debug!(source = %source_path.display(), audio = %audio_path.display(), "extracting audio");

        // Whisper-style transcribers want 16 kHz mono PCM.
        self.run(&[
            "-i",
            &source_path.to_string_lossy(),
            "-vn",
            "-acodec",
            "pcm_s16le",
            "-ar",
            "16000",
            "-ac",
            "1",
            "-y",
            &audio_path.to_string_lossy(),
        ])
        .await?;

        Ok(audio_path)
    }

    async fn sample_frames(
        &self,
        video_id: &str,
        source_path: &Path,
        interval_seconds: u32,
    ) -> Result<Vec<Frame>, ExtractionError> {
        let frame_dir = self.work_dir.join(format!("frames_{video_id}"));
        tokio::fs::create_dir_all(&frame_dir)
            .await
            .map_err(ExtractionError::Io)?;
        debug!(source = %source_path.display(), dir = %frame_dir.display(), "sampling frames");

        let filter = format!("fps=1/{}", interval_seconds.max(1));
        let pattern = frame_dir.join("frame_%05d.jpg");
        self.run(&[
            "-i",
            &source_path.to_string_lossy(),
            "-vf",
            &filter,
            "-q:v",
            "2",
            "-y",
            &pattern.to_string_lossy(),
        ])
        .await?;

        let frames = collect_frames(video_id, &frame_dir, interval_seconds);
        if frames.is_empty() {
            return Err(ExtractionError::Failed(format!(
                "ffmpeg produced no frames for {}",
                source_path.display()
            )));
        }
        Ok(frames)
    }
}

/// Walks the output directory and rebuilds frame order from the file names
/// ffmpeg wrote. Timestamps follow from the sampling interval.
fn collect_frames(video_id: &str, frame_dir: &Path, interval_seconds: u32) -> Vec<Frame> {
    let mut paths: Vec<PathBuf> = WalkDir::new(frame_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().map(|ext| ext == "jpg").unwrap_or(false))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .enumerate()
        .map(|(index, path)| Frame {
            video_id: video_id.to_string(),
            frame_index: index as u32,
            timestamp_seconds: index as f64 * f64::from(interval_seconds),
            image_path: path.to_string_lossy().to_string(),
        })
        .collect()
}
