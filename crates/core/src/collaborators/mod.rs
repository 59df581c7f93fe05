//! Concrete implementations of the pipeline's collaborator traits: the
//! ffmpeg media runner, HTTP transcription and embedding clients, and the
//! in-memory search history store.

pub mod ffmpeg;
pub mod history;
pub mod http;

pub use ffmpeg::FfmpegMedia;
pub use history::SearchHistoryStore;
pub use http::{EndpointConfig, HttpTextEmbedder, HttpTranscriber, HttpVisualEmbedder};
