use crate::error::{EmbeddingError, TranscriptionError};
use crate::models::TranscriptSegment;
use crate::traits::{TextEmbedder, Transcriber, VisualEmbedder};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Endpoint plus optional bearer token, shared by all the HTTP collaborators.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl EndpointConfig {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.and_then(|key| {
                let key = key.trim().to_string();
                if key.is_empty() {
                    None
                } else {
                    Some(key)
                }
            }),
        }
    }

    fn post(&self, client: &Client) -> reqwest::RequestBuilder {
        let mut request = client.post(&self.endpoint);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }
        request
    }
}

#[derive(Debug, Serialize)]
struct TranscribeRequest {
    audio_base64: String,
    media_format: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    segments: Vec<TranscribeSegment>,
}

#[derive(Debug, Deserialize)]
struct TranscribeSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Speech-to-text over a JSON endpoint. The audio file goes up base64-encoded
/// and comes back as timestamped segments.
pub struct HttpTranscriber {
    client: Client,
    config: EndpointConfig,
}

impl HttpTranscriber {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        video_id: &str,
        audio_path: &Path,
    ) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
        let audio = tokio::fs::read(audio_path).await?;
        debug!(video_id, bytes = audio.len(), "sending audio for transcription");

        let response = self
            .config
            .post(&self.client)
            .json(&TranscribeRequest {
                audio_base64: STANDARD.encode(audio),
                media_format: "wav".to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TranscriptionError::Failed(format!(
                "transcription endpoint {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: TranscribeResponse = response.json().await?;
        Ok(segments_from_response(video_id, payload))
    }
}

fn segments_from_response(video_id: &str, payload: TranscribeResponse) -> Vec<TranscriptSegment> {
    let mut segments: Vec<TranscriptSegment> = payload
        .segments
        .into_iter()
        .filter_map(|segment| {
            let text = segment.text.trim().to_string();
            if text.is_empty() || segment.end < segment.start {
                None
            } else {
                Some(TranscriptSegment {
                    video_id: video_id.to_string(),
                    start_seconds: segment.start,
                    end_seconds: segment.end,
                    text,
                })
            }
        })
        .collect();
    segments.sort_by(|left, right| left.start_seconds.total_cmp(&right.start_seconds));
    segments
}

#[derive(Debug, Serialize)]
struct EmbedTextRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct EmbedImageRequest {
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Sentence-embedding endpoint for transcript segments and text queries.
pub struct HttpTextEmbedder {
    client: Client,
    config: EndpointConfig,
}

impl HttpTextEmbedder {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TextEmbedder for HttpTextEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .config
            .post(&self.client)
            .json(&EmbedTextRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Failed(format!(
                "text embedding endpoint {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: EmbedResponse = response.json().await?;
        nonempty_embedding(payload, &self.config.endpoint)
    }
}

/// Joint text/image embedding endpoint. Text queries hit `<endpoint>/text`,
/// frame images hit `<endpoint>/image`, and both land in one vector space.
pub struct HttpVisualEmbedder {
    client: Client,
    config: EndpointConfig,
}

impl HttpVisualEmbedder {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn route(&self, suffix: &str) -> EndpointConfig {
        EndpointConfig {
            endpoint: format!("{}/{suffix}", self.config.endpoint.trim_end_matches('/')),
            api_key: self.config.api_key.clone(),
        }
    }
}

#[async_trait]
impl VisualEmbedder for HttpVisualEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let route = self.route("text");
        let response = route
            .post(&self.client)
            .json(&EmbedTextRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Failed(format!(
                "visual embedding endpoint {} returned {}",
                route.endpoint,
                response.status()
            )));
        }

        let payload: EmbedResponse = response.json().await?;
        nonempty_embedding(payload, &route.endpoint)
    }

    async fn embed_image(&self, image_path: &Path) -> Result<Vec<f32>, EmbeddingError> {
        let image = tokio::fs::read(image_path).await?;
        let route = self.route("image");
        let response = route
            .post(&self.client)
            .json(&EmbedImageRequest {
                image_base64: STANDARD.encode(image),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Failed(format!(
                "visual embedding endpoint {} returned {}",
                route.endpoint,
                response.status()
            )));
        }

        let payload: EmbedResponse = response.json().await?;
        nonempty_embedding(payload, &route.endpoint)
    }
}

fn nonempty_embedding(payload: EmbedResponse, endpoint: &str) -> Result<Vec<f32>, EmbeddingError> {
    if payload.embedding.is_empty() {
        return Err(EmbeddingError::Failed(format!(
            "embedding endpoint {endpoint} returned an empty vector"
        )));
    }
    Ok(payload.embedding)
}
