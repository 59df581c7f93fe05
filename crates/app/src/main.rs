use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use video_search_core::{
    generate_video_id, EndpointConfig, FfmpegMedia, HttpTextEmbedder, HttpTranscriber,
    HttpVisualEmbedder, IngestionCoordinator, PipelineOptions, SearchEngine, SearchHistoryStore,
    SearchMode, SearchQuery, StatusStore, VectorIndex,
};

#[derive(Parser)]
#[command(name = "video-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Transcription service URL
    #[arg(long, default_value = "http://localhost:8100/transcribe")]
    transcriber_url: String,

    /// Text embedding service URL
    #[arg(long, default_value = "http://localhost:8101/embed")]
    text_embedder_url: String,

    /// Joint text/image embedding service base URL
    #[arg(long, default_value = "http://localhost:8102/embed")]
    visual_embedder_url: String,

    /// Bearer token for the model services
    #[arg(long, env = "MODEL_API_KEY")]
    api_key: Option<String>,

    /// Seconds between sampled frames
    #[arg(long, default_value = "1")]
    frame_interval: u32,

    /// Maximum number of videos processed at once
    #[arg(long, default_value = "2")]
    max_concurrent: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Run a video through the full indexing pipeline and report its status.
    Process {
        /// Path to the video file
        #[arg(long)]
        video: String,
    },
    /// Index a video, then search it for a moment.
    Search {
        /// Path to the video file
        #[arg(long)]
        video: String,
        /// Search query
        #[arg(long)]
        query: String,
        /// Search mode: text, visual or hybrid
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Number of moments to return
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let status = Arc::new(StatusStore::new());
    let index = Arc::new(VectorIndex::new());
    let history = Arc::new(SearchHistoryStore::new());
    let text_embedder = Arc::new(HttpTextEmbedder::new(EndpointConfig::new(
        &cli.text_embedder_url,
        cli.api_key.clone(),
    )));
    let visual_embedder = Arc::new(HttpVisualEmbedder::new(EndpointConfig::new(
        &cli.visual_embedder_url,
        cli.api_key.clone(),
    )));

    let coordinator = IngestionCoordinator::new(
        Arc::clone(&status),
        Arc::clone(&index),
        Arc::new(FfmpegMedia::new()),
        Arc::new(HttpTranscriber::new(EndpointConfig::new(
            &cli.transcriber_url,
            cli.api_key.clone(),
        ))),
        text_embedder.clone(),
        visual_embedder.clone(),
        Arc::clone(&history),
        PipelineOptions {
            frame_interval_seconds: cli.frame_interval.max(1),
            max_concurrent_videos: cli.max_concurrent.max(1),
            ..PipelineOptions::default()
        },
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "video-search boot"
    );

    match cli.command {
        Command::Process { video } => {
            let video_id = index_video(&coordinator, &status, &video).await?;
            if let Some(info) = coordinator.video_info(&video_id) {
                println!(
                    "indexed {video_id}: {:.1}s, {} segments, {} frames",
                    info.duration_seconds, info.segment_count, info.frame_count
                );
            }
        }
        Command::Search {
            video,
            query,
            mode,
            top_k,
        } => {
            let mode: SearchMode = mode
                .parse()
                .map_err(|error| anyhow::anyhow!("{error}"))?;
            let video_id = index_video(&coordinator, &status, &video).await?;

            let engine = SearchEngine::new(
                Arc::clone(&status),
                Arc::clone(&index),
                text_embedder,
                visual_embedder,
                history,
            );
            let results = engine
                .search(&SearchQuery {
                    video_id: video_id.clone(),
                    text: query.clone(),
                    mode,
                    top_k,
                })
                .await
                .map_err(|error| anyhow::anyhow!("{error}"))?;

            println!("query: {query} ({mode}, video {video_id})");
            if results.is_empty() {
                println!("no moments found");
            }
            for (rank, hit) in results.iter().enumerate() {
                let span = match hit.end_seconds {
                    Some(end) => format!("{:.1}s-{:.1}s", hit.start_seconds, end),
                    None => format!("{:.1}s", hit.start_seconds),
                };
                println!(
                    "{}. [{}] score={:.4} at {span}",
                    rank + 1,
                    hit.modality,
                    hit.score
                );
                if !hit.text.is_empty() {
                    println!("   {}", hit.text);
                }
                if let Some(frame) = &hit.frame {
                    println!("   frame={}", frame.image_path);
                }
            }
        }
    }

    Ok(())
}

/// Kicks off processing and polls status until the pipeline reaches a
/// terminal stage, surfacing progress as it moves.
async fn index_video(
    coordinator: &IngestionCoordinator,
    status: &StatusStore,
    video: &str,
) -> anyhow::Result<String> {
    let video_id = generate_video_id(video);
    coordinator
        .start_processing(&video_id, video)
        .map_err(|error| anyhow::anyhow!("{error}"))?;

    let mut last_stage = None;
    loop {
        let current = status
            .get(&video_id)
            .map_err(|error| anyhow::anyhow!("{error}"))?;
        if last_stage != Some(current.stage) {
            println!(
                "[{:>3.0}%] {}: {}",
                current.progress * 100.0,
                current.stage,
                current.message
            );
            last_stage = Some(current.stage);
        }
        if current.terminal {
            if current.stage != video_search_core::ProcessingStage::Completed {
                anyhow::bail!("processing ended in {}: {}", current.stage, current.message);
            }
            return Ok(video_id);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
